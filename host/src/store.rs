//! ==============================================================================
//! store.rs - view model store shared by the poll loops and the web server
//! ==============================================================================
//!
//! purpose:
//!     holds the latest successfully fetched value of every dashboard feed,
//!     plus the state derived from them (forecast, timeline).
//!
//! rules:
//!     - one slot per feed; `apply` replaces a slot unconditionally
//!     - a failed fetch never clears a slot (last-good-value)
//!     - a snapshot held from a previous zone is kept but does not count as
//!       the active zone's snapshot (forecast, boot error, view status)
//!     - every result is tagged with the ZoneEpoch it was issued under and is
//!       dropped unless that epoch is still the active one
//!     - snapshot or history updates recompute the forecast; alert changes
//!       feed the timeline. both happen under the same write lock, before the
//!       revision is published to watchers
//!
//! sharing:
//!     arc<rwlock<>> shared with the web server handlers, plus a watch channel
//!     so readers can wait for the next revision instead of polling.
//!
//! ==============================================================================

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tokio::sync::{watch, RwLock};

use crate::domain::{Correlations, ForecastPoint, HistoryPoint, SensorRecord, Snapshot, Zone};
use crate::feeds::{FeedError, FeedKind};
use crate::forecast::{self, EntropyRandom, RandomSource};
use crate::timeline::TimelineRecorder;

/// identifies one start() session of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ZoneEpoch {
    pub zone: Zone,
    pub generation: u64,
}

/// a successful fetch result, ready to be stored
#[derive(Debug, Clone)]
pub enum FeedUpdate {
    Snapshot(Snapshot),
    History(Vec<HistoryPoint>),
    Sensors(Vec<SensorRecord>),
    Correlations(Option<Correlations>),
}

impl FeedUpdate {
    pub fn kind(&self) -> FeedKind {
        match self {
            FeedUpdate::Snapshot(_) => FeedKind::Snapshot,
            FeedUpdate::History(_) => FeedKind::History,
            FeedUpdate::Sensors(_) => FeedKind::Sensors,
            FeedUpdate::Correlations(_) => FeedKind::Correlations,
        }
    }
}

/// everything a reader can observe, cloned out under the read lock
#[derive(Debug, Clone, Serialize)]
pub struct StoreState {
    pub epoch: ZoneEpoch,
    pub snapshot: Option<Snapshot>,
    /// zone the held snapshot was fetched for
    pub snapshot_zone: Option<Zone>,
    /// newest first
    pub history: Vec<HistoryPoint>,
    pub sensors: Vec<SensorRecord>,
    pub correlations: Option<Correlations>,
    pub forecast: Vec<ForecastPoint>,
    pub timeline: Vec<crate::domain::TimelineEvent>,
    /// initial sequential load finished for the active epoch
    pub loaded: bool,
    /// set when the snapshot feed fails while no snapshot for the active zone is held
    pub boot_error: Option<String>,
    pub last_update_ms: u64,
    pub revision: u64,
}

struct Inner {
    epoch: ZoneEpoch,
    snapshot: Option<Snapshot>,
    snapshot_zone: Option<Zone>,
    history: Vec<HistoryPoint>,
    sensors: Vec<SensorRecord>,
    correlations: Option<Correlations>,
    forecast: Vec<ForecastPoint>,
    timeline: TimelineRecorder,
    loaded: bool,
    boot_error: Option<String>,
    last_update_ms: u64,
    revision: u64,
    rng: Box<dyn RandomSource>,
}

impl Inner {
    /// the held snapshot, only if it was fetched for the active zone
    fn current_snapshot(&self) -> Option<&Snapshot> {
        self.snapshot
            .as_ref()
            .filter(|_| self.snapshot_zone == Some(self.epoch.zone))
    }

    fn recompute_forecast(&mut self) {
        let snapshot = self.current_snapshot().cloned();
        self.forecast = forecast::forecast(snapshot.as_ref(), &self.history, self.rng.as_mut());
    }
}

/// cheap to clone; all clones share one store
#[derive(Clone)]
pub struct ViewModelStore {
    inner: Arc<RwLock<Inner>>,
    revisions: Arc<watch::Sender<u64>>,
}

impl ViewModelStore {
    pub fn new(zone: Zone) -> Self {
        Self::with_random(zone, Box::new(EntropyRandom::new()))
    }

    pub fn with_random(zone: Zone, rng: Box<dyn RandomSource>) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                epoch: ZoneEpoch { zone, generation: 0 },
                snapshot: None,
                snapshot_zone: None,
                history: Vec::new(),
                sensors: Vec::new(),
                correlations: None,
                forecast: Vec::new(),
                timeline: TimelineRecorder::new(),
                loaded: false,
                boot_error: None,
                last_update_ms: 0,
                revision: 0,
                rng,
            })),
            revisions: Arc::new(tx),
        }
    }

    /// opens a new epoch; results tagged with any earlier epoch are dropped from now on
    pub async fn begin_zone(&self, zone: Zone) -> ZoneEpoch {
        let mut inner = self.inner.write().await;
        inner.epoch = ZoneEpoch {
            zone,
            generation: inner.epoch.generation + 1,
        };
        inner.loaded = false;
        inner.boot_error = None;
        inner.recompute_forecast();
        let epoch = inner.epoch;
        self.publish(&mut inner);
        epoch
    }

    pub async fn active_epoch(&self) -> ZoneEpoch {
        self.inner.read().await.epoch
    }

    /// stores a fetch result; returns false when it was issued under a stale epoch
    pub async fn apply(&self, epoch: ZoneEpoch, update: FeedUpdate) -> bool {
        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            tracing::debug!(feed = %update.kind(), zone = %epoch.zone, "discarding result from stale zone session");
            return false;
        }

        match update {
            FeedUpdate::Snapshot(snapshot) => {
                inner.timeline.observe(&snapshot.risk, Local::now());
                inner.snapshot = Some(snapshot);
                inner.snapshot_zone = Some(epoch.zone);
                inner.boot_error = None;
                inner.recompute_forecast();
            }
            FeedUpdate::History(points) => {
                inner.history = normalize_history(points);
                inner.recompute_forecast();
            }
            FeedUpdate::Sensors(sensors) => inner.sensors = sensors,
            FeedUpdate::Correlations(correlations) => inner.correlations = correlations,
        }

        inner.last_update_ms = now_ms();
        self.publish(&mut inner);
        true
    }

    /// records a failed fetch; slots keep their last good value
    pub async fn record_failure(&self, epoch: ZoneEpoch, error: &FeedError) {
        let feed = error.feed();
        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            tracing::debug!(%feed, zone = %epoch.zone, "ignoring failure from stale zone session");
            return;
        }

        match feed {
            FeedKind::Correlations => {
                tracing::debug!(error = %error, "correlations unavailable (non-critical)");
            }
            FeedKind::Snapshot if inner.current_snapshot().is_none() => {
                tracing::warn!(error = %error, zone = %epoch.zone, "no snapshot for this zone yet, surfacing connection error");
                inner.boot_error = Some(error.to_string());
                self.publish(&mut inner);
            }
            _ => tracing::warn!(error = %error, "feed refresh failed, keeping last good value"),
        }
    }

    pub async fn finish_initial_load(&self, epoch: ZoneEpoch) -> bool {
        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            return false;
        }
        inner.loaded = true;
        self.publish(&mut inner);
        true
    }

    pub async fn state(&self) -> StoreState {
        let inner = self.inner.read().await;
        StoreState {
            epoch: inner.epoch,
            snapshot: inner.snapshot.clone(),
            snapshot_zone: inner.snapshot_zone,
            history: inner.history.clone(),
            sensors: inner.sensors.clone(),
            correlations: inner.correlations,
            forecast: inner.forecast.clone(),
            timeline: inner.timeline.events().cloned().collect(),
            loaded: inner.loaded,
            boot_error: inner.boot_error.clone(),
            last_update_ms: inner.last_update_ms,
            revision: inner.revision,
        }
    }

    /// fires once per store mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revisions.subscribe()
    }

    fn publish(&self, inner: &mut Inner) {
        inner.revision += 1;
        self.revisions.send_replace(inner.revision);
    }
}

/// newest first by parsed timestamp; unparseable points keep their order, last
pub fn normalize_history(mut points: Vec<HistoryPoint>) -> Vec<HistoryPoint> {
    points.sort_by(|a, b| match (a.timestamp.to_utc(), b.timestamp.to_utc()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    points
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CurrentReadings, RiskAssessment, Timestamp};
    use crate::forecast::{SequenceRandom, Trend};

    fn store() -> ViewModelStore {
        ViewModelStore::with_random(Zone::Kollam, Box::new(SequenceRandom::constant(0.5)))
    }

    fn snapshot(pm25: f64, alerts: &[&str]) -> Snapshot {
        Snapshot {
            current: CurrentReadings {
                temperature: Some(28.0),
                humidity: Some(65.0),
                pm25,
                wind_speed: Some(9.0),
                noise: 62.0,
            },
            risk: RiskAssessment {
                score: 60.0,
                level: "Moderate".into(),
                alerts: alerts.iter().map(|a| a.to_string()).collect(),
            },
        }
    }

    fn point(hour: u32, pm25: f64) -> HistoryPoint {
        HistoryPoint {
            timestamp: Timestamp::Text(format!("2024-05-01T{hour:02}:00:00Z")),
            pm25,
            wind_kph: 10.0,
            noise: 60.0,
            temperature: None,
        }
    }

    fn transport_free_error(feed: FeedKind) -> FeedError {
        FeedError::Status { feed, status: 500, detail: None }
    }

    #[tokio::test]
    async fn stale_epoch_results_are_discarded() {
        let store = store();
        let old = store.begin_zone(Zone::Kollam).await;
        let new = store.begin_zone(Zone::Kannur).await;

        assert!(!store.apply(old, FeedUpdate::Snapshot(snapshot(40.0, &[]))).await);
        assert!(store.state().await.snapshot.is_none());

        assert!(store.apply(new, FeedUpdate::Snapshot(snapshot(41.0, &[]))).await);
        let state = store.state().await;
        assert_eq!(state.snapshot_zone, Some(Zone::Kannur));
        assert_eq!(state.snapshot.unwrap().current.pm25, 41.0);
    }

    #[tokio::test]
    async fn same_zone_restart_still_discards_the_older_session() {
        let store = store();
        let first = store.begin_zone(Zone::Kollam).await;
        store.begin_zone(Zone::Kannur).await;
        let third = store.begin_zone(Zone::Kollam).await;
        assert_eq!(first.zone, third.zone);
        assert!(!store.apply(first, FeedUpdate::Sensors(Vec::new())).await);
        assert!(store.apply(third, FeedUpdate::Sensors(Vec::new())).await);
    }

    #[tokio::test]
    async fn failure_keeps_last_good_value() {
        let store = store();
        let epoch = store.begin_zone(Zone::Kollam).await;
        store.apply(epoch, FeedUpdate::Snapshot(snapshot(33.0, &[]))).await;
        store.apply(epoch, FeedUpdate::History(vec![point(1, 30.0)])).await;

        store.record_failure(epoch, &transport_free_error(FeedKind::Snapshot)).await;
        store.record_failure(epoch, &transport_free_error(FeedKind::History)).await;

        let state = store.state().await;
        assert_eq!(state.snapshot.unwrap().current.pm25, 33.0);
        assert_eq!(state.history.len(), 1);
        assert!(state.boot_error.is_none());
    }

    #[tokio::test]
    async fn boot_error_only_without_any_snapshot() {
        let store = store();
        let epoch = store.begin_zone(Zone::Kollam).await;
        store.record_failure(epoch, &transport_free_error(FeedKind::Snapshot)).await;
        assert!(store.state().await.boot_error.is_some());

        // a later success clears it
        store.apply(epoch, FeedUpdate::Snapshot(snapshot(20.0, &[]))).await;
        assert!(store.state().await.boot_error.is_none());
    }

    #[tokio::test]
    async fn previous_zone_snapshot_does_not_mask_boot_error() {
        let store = store();
        let kollam = store.begin_zone(Zone::Kollam).await;
        store.apply(kollam, FeedUpdate::Snapshot(snapshot(111.0, &[]))).await;
        assert_eq!(store.state().await.forecast.len(), 6);

        let kannur = store.begin_zone(Zone::Kannur).await;
        // kollam's forecast is not carried into kannur
        assert!(store.state().await.forecast.is_empty());
        store.apply(kannur, FeedUpdate::History(vec![point(1, 30.0), point(2, 35.0)])).await;
        assert!(store.state().await.forecast.is_empty());

        store.record_failure(kannur, &transport_free_error(FeedKind::Snapshot)).await;
        let state = store.state().await;
        assert!(state.boot_error.is_some());
        // last good value is still held, tagged with its zone
        assert_eq!(state.snapshot_zone, Some(Zone::Kollam));
        assert_eq!(state.snapshot.unwrap().current.pm25, 111.0);
    }

    #[tokio::test]
    async fn correlations_failure_is_not_an_error() {
        let store = store();
        let epoch = store.begin_zone(Zone::Kollam).await;
        store.apply(epoch, FeedUpdate::Snapshot(snapshot(20.0, &[]))).await;
        store.record_failure(epoch, &transport_free_error(FeedKind::Correlations)).await;
        let state = store.state().await;
        assert!(state.correlations.is_none());
        assert!(state.boot_error.is_none());
        assert!(state.snapshot.is_some());
    }

    #[tokio::test]
    async fn snapshot_and_history_drive_forecast() {
        let store = store();
        let epoch = store.begin_zone(Zone::Kollam).await;
        assert!(store.state().await.forecast.is_empty());

        store.apply(epoch, FeedUpdate::History(vec![point(1, 20.0), point(2, 40.0)])).await;
        assert!(store.state().await.forecast.is_empty());

        store.apply(epoch, FeedUpdate::Snapshot(snapshot(40.0, &[]))).await;
        let forecast = store.state().await.forecast;
        assert_eq!(forecast.len(), 6);
        // trend 10/step from the normalized pair, zero jitter
        assert_eq!(forecast[0].predicted, 50.0);
    }

    #[tokio::test]
    async fn alerts_feed_the_timeline_once_per_change() {
        let store = store();
        let epoch = store.begin_zone(Zone::Kollam).await;
        for _ in 0..3 {
            store.apply(epoch, FeedUpdate::Snapshot(snapshot(40.0, &["Smoke"]))).await;
        }
        store.apply(epoch, FeedUpdate::Snapshot(snapshot(40.0, &["Noise", "Smoke"]))).await;
        let timeline = store.state().await.timeline;
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].message, "Noise");
        assert_eq!(timeline[1].message, "Smoke");
    }

    #[tokio::test]
    async fn every_mutation_bumps_the_revision() {
        let store = store();
        let mut rx = store.subscribe();
        let epoch = store.begin_zone(Zone::Kollam).await;
        assert!(rx.has_changed().unwrap());
        let seen = *rx.borrow_and_update();

        store.apply(epoch, FeedUpdate::Sensors(Vec::new())).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), seen + 1);

        // stale results publish nothing
        let stale = ZoneEpoch { zone: Zone::Kollam, generation: 0 };
        store.apply(stale, FeedUpdate::Sensors(Vec::new())).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn normalization_is_order_independent() {
        // recent pm25 = 40, the fifth-newest = 20, lookback 5
        let ascending: Vec<_> = (0..6).map(|h| point(h, if h == 5 { 40.0 } else { 20.0 })).collect();
        let mut descending = ascending.clone();
        descending.reverse();

        let mut rng = SequenceRandom::constant(0.5);
        for input in [ascending, descending] {
            let normalized = normalize_history(input);
            assert_eq!(normalized[0].pm25, 40.0);
            let trend = Trend::from_history(&normalized, &mut rng);
            assert_eq!(trend.pm25, 4.0);
        }
    }

    #[test]
    fn unparseable_timestamps_sort_last_in_input_order() {
        let mut odd = point(0, 1.0);
        odd.timestamp = Timestamp::Text("n/a".into());
        let mut odd2 = point(0, 2.0);
        odd2.timestamp = Timestamp::Text("??".into());
        let out = normalize_history(vec![odd, point(3, 3.0), odd2, point(4, 4.0)]);
        let order: Vec<_> = out.iter().map(|p| p.pm25).collect();
        assert_eq!(order, vec![4.0, 3.0, 1.0, 2.0]);
    }
}
