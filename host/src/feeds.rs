//! ==============================================================================
//! feeds.rs - request/response wrappers for every backend feed
//! ==============================================================================
//!
//! purpose:
//!     one stateless call per feed kind. each call may fail on its own and
//!     nothing here retries; the scheduler simply tries again next period.
//!
//! relationships:
//!     - used by: scheduler.rs (FeedSource), citizen.rs (CitizenApi)
//!     - decodes into: domain.rs
//!
//! the traits exist so the scheduler and citizen flows can be driven by
//! scripted in-memory feeds in tests.
//!
//! ==============================================================================

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::domain::{
    CitizenReport, CitizenStatistics, Correlations, HistoryPoint, ReportPayload, SensorRecord,
    Snapshot, StatusFilter, SubmitResponse, Zone,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Snapshot,
    History,
    Sensors,
    Correlations,
    CitizenReports,
    CitizenStatistics,
    CitizenSubmit,
    Vote,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedKind::Snapshot => "snapshot",
            FeedKind::History => "history",
            FeedKind::Sensors => "sensors",
            FeedKind::Correlations => "correlations",
            FeedKind::CitizenReports => "citizen-reports",
            FeedKind::CitizenStatistics => "citizen-statistics",
            FeedKind::CitizenSubmit => "citizen-submit",
            FeedKind::Vote => "vote",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("{feed} request failed: {source}")]
    Transport {
        feed: FeedKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("{feed} returned status {status}")]
    Status {
        feed: FeedKind,
        status: u16,
        /// `detail` field of a JSON error body, when present
        detail: Option<String>,
    },

    #[error("{feed} response could not be decoded: {message}")]
    Decode { feed: FeedKind, message: String },
}

impl FeedError {
    pub fn feed(&self) -> FeedKind {
        match self {
            FeedError::Transport { feed, .. }
            | FeedError::Status { feed, .. }
            | FeedError::Decode { feed, .. } => *feed,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            FeedError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

// ==============================================================================
// feed traits
// ==============================================================================

/// the four dashboard feeds driven by the poll scheduler
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn snapshot(&self, zone: Zone) -> Result<Snapshot, FeedError>;

    /// most recent `limit` points, in whatever order the backend chooses
    async fn history(&self, limit: u32) -> Result<Vec<HistoryPoint>, FeedError>;

    async fn sensors(&self) -> Result<Vec<SensorRecord>, FeedError>;

    /// `Ok(None)` when the backend has no correlations to offer
    async fn correlations(&self) -> Result<Option<Correlations>, FeedError>;
}

/// citizen report endpoints
#[async_trait]
pub trait CitizenApi: Send + Sync {
    async fn submit_report(&self, payload: &ReportPayload) -> Result<SubmitResponse, FeedError>;

    async fn reports(
        &self,
        zone: Zone,
        filter: StatusFilter,
        limit: u32,
    ) -> Result<Vec<CitizenReport>, FeedError>;

    async fn statistics(&self, zone: Zone) -> Result<Option<CitizenStatistics>, FeedError>;

    async fn vote(&self, report_id: i64, upvote: bool) -> Result<(), FeedError>;
}

// ==============================================================================
// response envelopes
// ==============================================================================

#[derive(Deserialize)]
struct HistoryEnvelope {
    #[serde(default)]
    data: Vec<HistoryPoint>,
}

#[derive(Deserialize)]
struct SensorsEnvelope {
    #[serde(default)]
    sensors: Vec<SensorRecord>,
}

#[derive(Deserialize)]
struct CorrelationsEnvelope {
    #[serde(default)]
    correlations: Option<Correlations>,
}

#[derive(Deserialize)]
struct ReportsEnvelope {
    #[serde(default)]
    reports: Vec<CitizenReport>,
}

#[derive(Deserialize)]
struct StatisticsEnvelope {
    #[serde(default)]
    statistics: Option<CitizenStatistics>,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

// ==============================================================================
// http implementation
// ==============================================================================

/// JSON-over-HTTP client for the monitoring backend
#[derive(Clone)]
pub struct HttpFeedClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFeedClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        feed: FeedKind,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FeedError> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|source| FeedError::Transport { feed, source })?;
        decode(feed, resp).await
    }
}

/// reads the whole body, then maps non-2xx to `Status` (with `detail`) and
/// unparseable 2xx bodies to `Decode`
async fn decode<T: DeserializeOwned>(
    feed: FeedKind,
    resp: reqwest::Response,
) -> Result<T, FeedError> {
    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|source| FeedError::Transport { feed, source })?;

    if !status.is_success() {
        return Err(FeedError::Status {
            feed,
            status: status.as_u16(),
            detail: error_detail(&body),
        });
    }

    serde_json::from_slice(&body).map_err(|e| FeedError::Decode {
        feed,
        message: e.to_string(),
    })
}

fn error_detail(body: &[u8]) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
    match parsed.detail? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl FeedSource for HttpFeedClient {
    async fn snapshot(&self, zone: Zone) -> Result<Snapshot, FeedError> {
        self.get_json(FeedKind::Snapshot, "/api/monitor", &[("city", zone.to_string())])
            .await
    }

    async fn history(&self, limit: u32) -> Result<Vec<HistoryPoint>, FeedError> {
        let envelope: HistoryEnvelope = self
            .get_json(FeedKind::History, "/api/history", &[("limit", limit.to_string())])
            .await?;
        Ok(envelope.data)
    }

    async fn sensors(&self) -> Result<Vec<SensorRecord>, FeedError> {
        let envelope: SensorsEnvelope = self.get_json(FeedKind::Sensors, "/api/sensors", &[]).await?;
        Ok(envelope.sensors)
    }

    async fn correlations(&self) -> Result<Option<Correlations>, FeedError> {
        let envelope: CorrelationsEnvelope = self
            .get_json(FeedKind::Correlations, "/api/correlations", &[])
            .await?;
        Ok(envelope.correlations)
    }
}

#[async_trait]
impl CitizenApi for HttpFeedClient {
    async fn submit_report(&self, payload: &ReportPayload) -> Result<SubmitResponse, FeedError> {
        let feed = FeedKind::CitizenSubmit;
        let resp = self
            .client
            .post(self.url("/api/citizen/report"))
            .json(payload)
            .send()
            .await
            .map_err(|source| FeedError::Transport { feed, source })?;
        decode(feed, resp).await
    }

    async fn reports(
        &self,
        zone: Zone,
        filter: StatusFilter,
        limit: u32,
    ) -> Result<Vec<CitizenReport>, FeedError> {
        let query = [
            ("location", zone.to_string()),
            ("status", filter.query_value().to_string()),
            ("limit", limit.to_string()),
        ];
        let envelope: ReportsEnvelope = self
            .get_json(FeedKind::CitizenReports, "/api/citizen/reports", &query)
            .await?;
        Ok(envelope.reports)
    }

    async fn statistics(&self, zone: Zone) -> Result<Option<CitizenStatistics>, FeedError> {
        let envelope: StatisticsEnvelope = self
            .get_json(
                FeedKind::CitizenStatistics,
                "/api/citizen/statistics",
                &[("location", zone.to_string())],
            )
            .await?;
        Ok(envelope.statistics)
    }

    async fn vote(&self, report_id: i64, upvote: bool) -> Result<(), FeedError> {
        let feed = FeedKind::Vote;
        let resp = self
            .client
            .post(self.url(&format!("/api/citizen/report/{report_id}/vote")))
            .query(&[("upvote", upvote.to_string())])
            .send()
            .await
            .map_err(|source| FeedError::Transport { feed, source })?;

        // ack only; the body is not part of the contract
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(FeedError::Status {
                feed,
                status: resp.status().as_u16(),
                detail: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_detail_reads_string_and_structured_bodies() {
        assert_eq!(
            error_detail(br#"{"detail": "Description too short"}"#).as_deref(),
            Some("Description too short")
        );
        assert!(error_detail(br#"{"detail": [{"loc": ["body"]}]}"#).is_some());
        assert_eq!(error_detail(br#"{"detail": null}"#), None);
        assert_eq!(error_detail(b"<html>502</html>"), None);
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let client = HttpFeedClient::with_client(reqwest::Client::new(), "http://backend:8000/");
        assert_eq!(client.url("/api/sensors"), "http://backend:8000/api/sensors");
    }

    #[test]
    fn status_error_exposes_feed_and_detail() {
        let err = FeedError::Status {
            feed: FeedKind::CitizenSubmit,
            status: 422,
            detail: Some("bad severity".into()),
        };
        assert_eq!(err.feed(), FeedKind::CitizenSubmit);
        assert_eq!(err.detail(), Some("bad severity"));
        assert_eq!(err.to_string(), "citizen-submit returned status 422");
    }
}
