//! ==============================================================================
//! timeline.rs - bounded event log derived from alert transitions
//! ==============================================================================
//!
//! an event is recorded only when the snapshot's alert list actually changes
//! and the new list is non-empty. the event carries the first alert only.
//! newest first, at most TIMELINE_CAPACITY entries.
//!
//! ==============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, TimeZone};

use crate::domain::{RiskAssessment, Severity, TimelineEvent};

pub const TIMELINE_CAPACITY: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct TimelineRecorder {
    events: VecDeque<TimelineEvent>,
    /// alert list seen on the previous observation
    last_alerts: Option<Vec<String>>,
}

impl TimelineRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// feeds one snapshot's risk block; returns the event if one was recorded
    pub fn observe<Tz>(&mut self, risk: &RiskAssessment, at: DateTime<Tz>) -> Option<&TimelineEvent>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        if self.last_alerts.as_deref() == Some(risk.alerts.as_slice()) {
            return None;
        }
        self.last_alerts = Some(risk.alerts.clone());

        let first = risk.alerts.first()?;
        self.events.push_front(TimelineEvent {
            time: at.format("%I:%M %p").to_string(),
            severity: Severity::from_risk_score(risk.score),
            message: first.clone(),
        });
        self.events.truncate(TIMELINE_CAPACITY);
        self.events.front()
    }

    /// newest first
    pub fn events(&self) -> impl Iterator<Item = &TimelineEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
