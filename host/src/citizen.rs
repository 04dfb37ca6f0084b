//! ==============================================================================
//! citizen.rs - citizen report submission and listing
//! ==============================================================================
//!
//! purpose:
//!     the two stateful citizen flows that sit beside the poll scheduler.
//!
//! submission (ReportSubmitter):
//!
//! ```text
//!     Idle ──submit──► Submitting ──ok──► SuccessPendingClose ──close delay──► Idle
//!                           │                  (validation message swapped
//!                           │                   in after a shorter delay)
//!                           └──err──► Error ──submit──► Submitting ...
//! ```
//!
//! listing (ReportListing):
//!     reports + statistics for (zone, status filter), refetched whenever
//!     either changes. votes are fire-and-forget followed by a refetch; the
//!     refetch is the only source of updated counts.
//!
//! relationships:
//!     - calls: feeds.rs (CitizenApi)
//!     - driven by: main.rs (/api/citizen/* routes)
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::{sleep_until, Instant};

use crate::domain::{
    CitizenReport, CitizenStatistics, ReportPayload, ReportStatus, ReportType, StatusFilter,
    Timestamp, Zone,
};
use crate::feeds::{CitizenApi, FeedError};

pub const SUCCESS_MESSAGE: &str =
    "Report submitted successfully! Thank you for helping your community.";
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to submit report";
pub const NETWORK_ERROR_MESSAGE: &str = "Network error. Please try again.";

// ==============================================================================
// draft
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error("description is required")]
    EmptyDescription,
    #[error("severity must be between 1 and 5, got {0}")]
    SeverityOutOfRange(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoAttachment {
    /// e.g. "image/jpeg"
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl PhotoAttachment {
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportDraft {
    pub report_type: ReportType,
    pub severity: u8,
    pub description: String,
    pub citizen_name: Option<String>,
    pub citizen_contact: Option<String>,
    pub photo: Option<PhotoAttachment>,
}

impl Default for ReportDraft {
    fn default() -> Self {
        Self {
            report_type: ReportType::Smoke,
            severity: 3,
            description: String::new(),
            citizen_name: None,
            citizen_contact: None,
            photo: None,
        }
    }
}

impl ReportDraft {
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.description.trim().is_empty() {
            return Err(DraftError::EmptyDescription);
        }
        if !(1..=5).contains(&self.severity) {
            return Err(DraftError::SeverityOutOfRange(self.severity));
        }
        Ok(())
    }

    /// encodes the photo and blanks empty optional fields
    pub fn to_payload(&self, zone: Zone) -> ReportPayload {
        ReportPayload {
            location: zone,
            latitude: None,
            longitude: None,
            report_type: self.report_type,
            severity: self.severity,
            description: self.description.clone(),
            photo_base64: self.photo.as_ref().map(PhotoAttachment::to_data_url),
            citizen_name: non_blank(&self.citizen_name),
            citizen_contact: non_blank(&self.citizen_contact),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn severity_label(severity: u8) -> &'static str {
    match severity {
        1 => "Minor",
        2 => "Low",
        3 => "Moderate",
        4 => "High",
        5 => "Severe",
        _ => "Unknown",
    }
}

// ==============================================================================
// submission
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionState {
    Idle,
    Submitting,
    SuccessPendingClose { message: String },
    Error { message: String },
}

#[derive(Debug, Clone, Copy)]
pub struct SubmissionDelays {
    /// success -> validation message replacement
    pub validation_message: Duration,
    /// success -> close callback
    pub close: Duration,
}

impl Default for SubmissionDelays {
    fn default() -> Self {
        Self {
            validation_message: Duration::from_millis(2000),
            close: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// accepted by the backend and closed
    Accepted { validated: bool },
    /// rejected or unreachable; the state holds the message
    Failed,
    /// a submission was already running or closing
    Busy,
}

pub struct ReportSubmitter {
    api: Arc<dyn CitizenApi>,
    delays: SubmissionDelays,
    state: watch::Sender<SubmissionState>,
}

impl ReportSubmitter {
    pub fn new(api: Arc<dyn CitizenApi>, delays: SubmissionDelays) -> Self {
        let (state, _) = watch::channel(SubmissionState::Idle);
        Self { api, delays, state }
    }

    pub fn state(&self) -> SubmissionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SubmissionState> {
        self.state.subscribe()
    }

    /// runs the whole flow, returning once the form has closed or failed.
    /// `on_success` runs after the close delay, just before returning to Idle.
    pub async fn submit<F>(
        &self,
        zone: Zone,
        draft: &ReportDraft,
        on_success: F,
    ) -> Result<SubmitOutcome, DraftError>
    where
        F: FnOnce() + Send,
    {
        draft.validate()?;

        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if matches!(
                state,
                SubmissionState::Submitting | SubmissionState::SuccessPendingClose { .. }
            ) {
                return false;
            }
            *state = SubmissionState::Submitting;
            claimed = true;
            true
        });
        if !claimed {
            return Ok(SubmitOutcome::Busy);
        }

        let payload = draft.to_payload(zone);
        let response = match self.api.submit_report(&payload).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, %zone, "citizen report submission failed");
                self.state.send_replace(SubmissionState::Error {
                    message: failure_message(&e),
                });
                return Ok(SubmitOutcome::Failed);
            }
        };

        let accepted_at = Instant::now();
        self.state.send_replace(SubmissionState::SuccessPendingClose {
            message: SUCCESS_MESSAGE.to_string(),
        });

        let validation = response.auto_validation.filter(|v| v.validated);
        let validated = validation.is_some();
        if let Some(validation) = validation {
            sleep_until(accepted_at + self.delays.validation_message).await;
            self.state.send_replace(SubmissionState::SuccessPendingClose {
                message: format!("✓ Report validated by sensors: {}", validation.notes),
            });
        }

        sleep_until(accepted_at + self.delays.close).await;
        on_success();
        self.state.send_replace(SubmissionState::Idle);
        tracing::info!(%zone, id = ?response.id, validated, "citizen report submitted");
        Ok(SubmitOutcome::Accepted { validated })
    }
}

fn failure_message(error: &FeedError) -> String {
    match error {
        FeedError::Status { .. } => error
            .detail()
            .unwrap_or(GENERIC_FAILURE_MESSAGE)
            .to_string(),
        FeedError::Transport { .. } | FeedError::Decode { .. } => NETWORK_ERROR_MESSAGE.to_string(),
    }
}

// ==============================================================================
// listing
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ListingState {
    pub zone: Zone,
    pub filter: StatusFilter,
    pub reports: Vec<CitizenReport>,
    pub statistics: Option<CitizenStatistics>,
    pub loading: bool,
}

pub struct ReportListing {
    api: Arc<dyn CitizenApi>,
    limit: u32,
    state: RwLock<ListingState>,
}

impl ReportListing {
    pub fn new(api: Arc<dyn CitizenApi>, zone: Zone, limit: u32) -> Self {
        Self {
            api,
            limit,
            state: RwLock::new(ListingState {
                zone,
                filter: StatusFilter::All,
                reports: Vec::new(),
                statistics: None,
                loading: true,
            }),
        }
    }

    pub async fn state(&self) -> ListingState {
        self.state.read().await.clone()
    }

    pub async fn set_zone(&self, zone: Zone) {
        {
            let mut state = self.state.write().await;
            if state.zone == zone && !state.loading {
                return;
            }
            state.zone = zone;
            state.loading = true;
        }
        self.refresh().await;
    }

    pub async fn set_filter(&self, filter: StatusFilter) {
        {
            let mut state = self.state.write().await;
            if state.filter == filter && !state.loading {
                return;
            }
            state.filter = filter;
            state.loading = true;
        }
        self.refresh().await;
    }

    /// reports and statistics, concurrently
    pub async fn refresh(&self) {
        let (zone, filter) = self.key().await;
        let (reports, statistics) = tokio::join!(
            self.api.reports(zone, filter, self.limit),
            self.api.statistics(zone),
        );

        let mut state = self.state.write().await;
        if (state.zone, state.filter) != (zone, filter) {
            tracing::debug!(%zone, "discarding citizen listing for a superseded selection");
            return;
        }
        match reports {
            Ok(reports) => state.reports = reports,
            Err(e) => tracing::warn!(error = %e, "citizen reports fetch failed"),
        }
        match statistics {
            Ok(statistics) => state.statistics = statistics,
            Err(e) => tracing::warn!(error = %e, "citizen statistics fetch failed"),
        }
        state.loading = false;
    }

    pub async fn refresh_reports(&self) {
        let (zone, filter) = self.key().await;
        let result = self.api.reports(zone, filter, self.limit).await;

        let mut state = self.state.write().await;
        if (state.zone, state.filter) != (zone, filter) {
            return;
        }
        match result {
            Ok(reports) => state.reports = reports,
            Err(e) => tracing::warn!(error = %e, "citizen reports fetch failed"),
        }
    }

    /// vote errors are logged only; the listing is refetched either way
    pub async fn vote(&self, report_id: i64, upvote: bool) {
        if let Err(e) = self.api.vote(report_id, upvote).await {
            tracing::warn!(error = %e, report_id, upvote, "vote failed");
        }
        self.refresh_reports().await;
    }

    async fn key(&self) -> (Zone, StatusFilter) {
        let state = self.state.read().await;
        (state.zone, state.filter)
    }
}

// ==============================================================================
// presentation helpers
// ==============================================================================

pub fn status_badge(status: ReportStatus, validated_by_sensor: bool) -> &'static str {
    match status {
        ReportStatus::Validated if validated_by_sensor => "Auto-Validated",
        ReportStatus::Validated => "Validated",
        ReportStatus::Resolved => "Resolved",
        ReportStatus::Dismissed => "Dismissed",
        ReportStatus::Pending | ReportStatus::Unknown => "Pending",
    }
}

/// "12m ago", "3h ago", "2d ago"
pub fn relative_age(timestamp: &Timestamp, now: DateTime<Utc>) -> Option<String> {
    let minutes = (now - timestamp.to_utc()?).num_minutes();
    let hours = minutes.div_euclid(60);
    let days = hours.div_euclid(24);
    Some(if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else {
        format!("{days}d ago")
    })
}
