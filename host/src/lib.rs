//! ==============================================================================
//! enviro_dash - feed synchronization and forecasting engine
//! ==============================================================================
//!
//! keeps a consistent view of several independently failing monitoring feeds
//! for one selected zone, and derives a six-step forecast and an alert
//! timeline from them.
//!
//! modules, leaves first:
//!     domain     wire and derived records
//!     feeds      one request/response wrapper per feed (FeedSource, CitizenApi)
//!     forecast   trend forecaster with injectable randomness
//!     timeline   bounded alert-transition log
//!     store      last-good-value slots + derived state + change notification
//!     scheduler  initial load, then fast (5s) and slow (10s) poll cycles
//!     citizen    report submission state machine and listing
//!     view       read model for the dashboard
//!     config     dashboard.toml
//!
//! ==============================================================================

pub mod citizen;
pub mod config;
pub mod domain;
pub mod feeds;
pub mod forecast;
pub mod scheduler;
pub mod store;
pub mod timeline;
pub mod view;
