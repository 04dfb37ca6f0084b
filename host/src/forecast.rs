//! ==============================================================================
//! forecast.rs - short-horizon trend forecaster
//! ==============================================================================
//!
//! purpose:
//!     extrapolates the latest snapshot six hours ahead using the recent
//!     history trend plus a per-step random jitter. heuristic only.
//!
//! algorithm (per recompute, no state carried between runs):
//!     1. no snapshot -> no forecast
//!     2. trend per metric from history[0] and history[min(len,5)-1],
//!        or a small random trend when fewer than 2 points exist
//!     3. step i = 1..6: clamp(current + trend*i + jitter_i) to metric bounds
//!     4. metric cycles PM2.5 -> Noise -> Temperature by i mod 3
//!     5. status from fixed thresholds, confidence max(60, 98 - 5i)
//!
//! relationships:
//!     - called by: store.rs on every snapshot or history update
//!     - expects: history already normalized newest-first (store.rs)
//!
//! ==============================================================================

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::{ForecastMetric, ForecastPoint, HistoryPoint, Snapshot};

pub const FORECAST_STEPS: u32 = 6;

/// trend lookback window, in history points
const LOOKBACK: usize = 5;

const PM25_BOUNDS: (f64, f64) = (5.0, 150.0);
const NOISE_BOUNDS: (f64, f64) = (40.0, 95.0);
const TEMPERATURE_BOUNDS: (f64, f64) = (10.0, 50.0);
const DEFAULT_TEMPERATURE: f64 = 25.0;

/// temperature jitter is damped relative to the other metrics
const TEMPERATURE_JITTER_SCALE: f64 = 0.1;

// ==============================================================================
// randomness
// ==============================================================================

/// uniform draws in [0, 1); injectable so tests can pin the jitter
pub trait RandomSource: Send + Sync {
    fn next_unit(&mut self) -> f64;
}

/// default source, seeded from the OS
pub struct EntropyRandom(StdRng);

impl EntropyRandom {
    pub fn new() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl Default for EntropyRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for EntropyRandom {
    fn next_unit(&mut self) -> f64 {
        self.0.gen::<f64>()
    }
}

/// replays a fixed cycle of draws
#[derive(Debug, Clone)]
pub struct SequenceRandom {
    values: Vec<f64>,
    next: usize,
}

impl SequenceRandom {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values, next: 0 }
    }

    /// every draw returns `value`
    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }
}

impl RandomSource for SequenceRandom {
    fn next_unit(&mut self) -> f64 {
        if self.values.is_empty() {
            return 0.5;
        }
        let v = self.values[self.next % self.values.len()];
        self.next += 1;
        v
    }
}

/// maps a unit draw onto [-half_width, half_width]
fn symmetric(rng: &mut dyn RandomSource, half_width: f64) -> f64 {
    (rng.next_unit() - 0.5) * 2.0 * half_width
}

// ==============================================================================
// trend
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    pub pm25: f64,
    pub noise: f64,
    pub temperature: f64,
}

impl Trend {
    /// per-step change; `history` must be newest-first
    pub fn from_history(history: &[HistoryPoint], rng: &mut dyn RandomSource) -> Self {
        if history.len() < 2 {
            return Self {
                pm25: symmetric(rng, 1.0),
                noise: symmetric(rng, 1.0),
                temperature: symmetric(rng, 0.25),
            };
        }

        let lookback = history.len().min(LOOKBACK);
        let recent = &history[0];
        let older = &history[lookback - 1];
        let span = lookback as f64;

        let temperature = match (recent.temperature, older.temperature) {
            (Some(newer), Some(old)) => (newer - old) / span,
            _ => symmetric(rng, 0.25),
        };

        Self {
            pm25: (recent.pm25 - older.pm25) / span,
            noise: (recent.noise - older.noise) / span,
            temperature,
        }
    }
}

// ==============================================================================
// forecast
// ==============================================================================

pub fn metric_for_step(step: u32) -> ForecastMetric {
    match step % 3 {
        1 => ForecastMetric::Pm25,
        2 => ForecastMetric::Noise,
        _ => ForecastMetric::Temperature,
    }
}

pub fn confidence_for_step(step: u32) -> u32 {
    98u32.saturating_sub(5 * step).max(60)
}

pub fn status_for(metric: ForecastMetric, value: f64) -> &'static str {
    match metric {
        ForecastMetric::Pm25 if value > 55.0 => "Unhealthy",
        ForecastMetric::Pm25 if value > 35.0 => "Moderate",
        ForecastMetric::Pm25 => "Good",
        ForecastMetric::Noise if value > 75.0 => "Elevated",
        ForecastMetric::Noise if value > 65.0 => "Moderate",
        ForecastMetric::Noise => "Normal",
        ForecastMetric::Temperature if value > 35.0 => "Hot",
        ForecastMetric::Temperature if value > 30.0 => "Warm",
        ForecastMetric::Temperature => "Comfortable",
    }
}

fn format_value(metric: ForecastMetric, value: f64) -> String {
    match metric {
        ForecastMetric::Pm25 => format!("{value:.1} µg/m³"),
        ForecastMetric::Noise => format!("{value:.0} dB"),
        ForecastMetric::Temperature => format!("{value:.1}°C"),
    }
}

/// full six-step forecast; empty when there is no snapshot yet
pub fn forecast(
    snapshot: Option<&Snapshot>,
    history: &[HistoryPoint],
    rng: &mut dyn RandomSource,
) -> Vec<ForecastPoint> {
    let Some(snapshot) = snapshot else {
        return Vec::new();
    };

    let current = &snapshot.current;
    let trend = Trend::from_history(history, rng);
    let temperature = current.temperature.unwrap_or(DEFAULT_TEMPERATURE);

    (1..=FORECAST_STEPS)
        .map(|step| {
            let i = f64::from(step);
            let jitter = symmetric(rng, 1.0);

            let metric = metric_for_step(step);
            let predicted = match metric {
                ForecastMetric::Pm25 => {
                    clamp(current.pm25 + trend.pm25 * i + jitter, PM25_BOUNDS)
                }
                ForecastMetric::Noise => {
                    clamp(current.noise + trend.noise * i + jitter, NOISE_BOUNDS)
                }
                ForecastMetric::Temperature => clamp(
                    temperature + trend.temperature * i + jitter * TEMPERATURE_JITTER_SCALE,
                    TEMPERATURE_BOUNDS,
                ),
            };

            ForecastPoint {
                time: format!("+{step}h"),
                metric,
                value: format_value(metric, predicted),
                confidence: format!("{}%", confidence_for_step(step)),
                status: status_for(metric, predicted).to_string(),
                predicted,
            }
        })
        .collect()
}

fn clamp(value: f64, (lo, hi): (f64, f64)) -> f64 {
    if value.is_nan() {
        return lo;
    }
    value.clamp(lo, hi)
}
