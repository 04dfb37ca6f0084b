//! ==============================================================================
//! scheduler.rs - dual-cadence poll scheduler
//! ==============================================================================
//!
//! purpose:
//!     keeps the view model store fresh for the selected zone.
//!
//! lifecycle of one start(zone):
//!
//! ```text
//!     begin epoch ──► initial load (sequential)
//!                     snapshot → history → sensors → correlations
//!                          │
//!                          ▼
//!                     loaded ──► fast loop  (every 5s: snapshot, history, correlations)
//!                            └─► slow loop  (every 10s: sensors)
//! ```
//!
//! cancellation:
//!     both loops live in one task owned by a Session guard; stop(), start()
//!     and dropping the scheduler all abort it. fetches are spawned detached,
//!     so a request already on the wire still completes, but its result is
//!     tagged with the old epoch and the store drops it.
//!
//! relationships:
//!     - calls: feeds.rs (FeedSource)
//!     - writes: store.rs (apply / record_failure)
//!     - driven by: main.rs (zone selection, retry)
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::domain::Zone;
use crate::feeds::{FeedKind, FeedSource};
use crate::store::{FeedUpdate, ViewModelStore, ZoneEpoch};

/// fixed polling periods and request parameters
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub fast: Duration,
    pub slow: Duration,
    pub history_limit: u32,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(5),
            slow: Duration::from_secs(10),
            history_limit: 24,
        }
    }
}

/// smallest timer period; `interval_at` rejects zero
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// the feeds this scheduler refreshes; citizen endpoints are driven elsewhere
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolledFeed {
    Snapshot,
    History,
    Sensors,
    Correlations,
}

impl PolledFeed {
    fn kind(self) -> FeedKind {
        match self {
            PolledFeed::Snapshot => FeedKind::Snapshot,
            PolledFeed::History => FeedKind::History,
            PolledFeed::Sensors => FeedKind::Sensors,
            PolledFeed::Correlations => FeedKind::Correlations,
        }
    }
}

const INITIAL_LOAD_ORDER: [PolledFeed; 4] = [
    PolledFeed::Snapshot,
    PolledFeed::History,
    PolledFeed::Sensors,
    PolledFeed::Correlations,
];

const FAST_FEEDS: [PolledFeed; 3] = [
    PolledFeed::Snapshot,
    PolledFeed::History,
    PolledFeed::Correlations,
];

/// one running start() session; aborting on drop covers every exit path
struct Session {
    epoch: ZoneEpoch,
    task: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct PollScheduler {
    source: Arc<dyn FeedSource>,
    store: ViewModelStore,
    cadence: Cadence,
    session: Option<Session>,
}

impl PollScheduler {
    pub fn new(source: Arc<dyn FeedSource>, store: ViewModelStore, cadence: Cadence) -> Self {
        Self {
            source,
            store,
            cadence,
            session: None,
        }
    }

    pub fn store(&self) -> &ViewModelStore {
        &self.store
    }

    pub fn active_zone(&self) -> Option<Zone> {
        self.session.as_ref().map(|s| s.epoch.zone)
    }

    /// stops any running session, then starts polling `zone`
    pub async fn start(&mut self, zone: Zone) -> ZoneEpoch {
        self.stop();
        let epoch = self.store.begin_zone(zone).await;
        tracing::info!(%zone, generation = epoch.generation, "starting feed polling");

        let task = tokio::spawn(run_session(
            self.source.clone(),
            self.store.clone(),
            self.cadence,
            epoch,
        ));
        self.session = Some(Session { epoch, task });
        epoch
    }

    /// idempotent
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!(zone = %session.epoch.zone, "stopping feed polling");
        }
    }

    /// manual retry after a connection error: restart the active zone
    pub async fn retry(&mut self) -> Option<ZoneEpoch> {
        let zone = self.active_zone()?;
        Some(self.start(zone).await)
    }
}

async fn run_session(
    source: Arc<dyn FeedSource>,
    store: ViewModelStore,
    cadence: Cadence,
    epoch: ZoneEpoch,
) {
    for feed in INITIAL_LOAD_ORDER {
        let fetch = tokio::spawn(refresh(
            source.clone(),
            store.clone(),
            epoch,
            feed,
            cadence.history_limit,
        ));
        // a panicking fetch only loses that feed
        if let Err(e) = fetch.await {
            tracing::error!(feed = %feed.kind(), error = %e, "initial fetch task failed");
        }
    }
    if store.finish_initial_load(epoch).await {
        tracing::info!(zone = %epoch.zone, "initial load complete");
    }

    // each feed is its own task: results land as they arrive, in any order
    let fast = periodic(cadence.fast, || {
        for feed in FAST_FEEDS {
            tokio::spawn(refresh(
                source.clone(),
                store.clone(),
                epoch,
                feed,
                cadence.history_limit,
            ));
        }
    });
    let slow = periodic(cadence.slow, || {
        tokio::spawn(refresh(
            source.clone(),
            store.clone(),
            epoch,
            PolledFeed::Sensors,
            cadence.history_limit,
        ));
    });
    tokio::join!(fast, slow);
}

/// fires `on_tick` every `period` (at least MIN_PERIOD), first after one full period
async fn periodic<F: FnMut()>(period: Duration, mut on_tick: F) {
    let period = period.max(MIN_PERIOD);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        on_tick();
    }
}

async fn refresh(
    source: Arc<dyn FeedSource>,
    store: ViewModelStore,
    epoch: ZoneEpoch,
    feed: PolledFeed,
    history_limit: u32,
) {
    let result = match feed {
        PolledFeed::Snapshot => source.snapshot(epoch.zone).await.map(FeedUpdate::Snapshot),
        PolledFeed::History => source.history(history_limit).await.map(FeedUpdate::History),
        PolledFeed::Sensors => source.sensors().await.map(FeedUpdate::Sensors),
        PolledFeed::Correlations => source.correlations().await.map(FeedUpdate::Correlations),
    };

    match result {
        Ok(update) => {
            store.apply(epoch, update).await;
        }
        Err(e) => store.record_failure(epoch, &e).await,
    }
}
