//! ==============================================================================
//! view.rs - read model served to the dashboard
//! ==============================================================================
//!
//! purpose:
//!     turns one StoreState into everything the presentation layer needs:
//!     load status, metric gauges, risk band, chart series, zone sensors and
//!     map center, correlations, forecast and timeline.
//!
//! relationships:
//!     - reads: store.rs (StoreState)
//!     - served by: main.rs (GET /api, GET /)
//!
//! ==============================================================================

use chrono::Local;
use serde::Serialize;

use crate::domain::{
    Correlations, ForecastPoint, HistoryPoint, SensorRecord, Snapshot, TimelineEvent, Zone,
};
use crate::store::StoreState;

/// used when the zone has no sensors with coordinates
pub const DEFAULT_MAP_CENTER: (f64, f64) = (10.8505, 76.2711);

const TOP_ALERTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadStatus {
    Loading,
    /// no snapshot has ever been obtained; offer a manual retry
    ConnectionError { message: String },
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GaugeLevel {
    Safe,
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gauge {
    pub label: &'static str,
    pub unit: &'static str,
    pub value: Option<f64>,
    pub level: GaugeLevel,
    /// bar fill in [0, 1]
    pub fill: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskBand {
    Low,
    Elevated,
    High,
    Critical,
}

impl RiskBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            RiskBand::Critical
        } else if score >= 50.0 {
            RiskBand::High
        } else if score >= 30.0 {
            RiskBand::Elevated
        } else {
            RiskBand::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskPanel {
    pub score: f64,
    pub level: String,
    pub band: RiskBand,
    pub top_alerts: Vec<String>,
}

/// oldest first, ready for a line chart
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    pub pm25: Vec<f64>,
    pub wind_kph: Vec<f64>,
    pub noise: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorrelationCell {
    pub value: f64,
    /// |r| > 0.6
    pub strong: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorrelationPanel {
    pub pm25_wind: CorrelationCell,
    pub pm25_noise: CorrelationCell,
    pub wind_noise: CorrelationCell,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub zone: Zone,
    pub status: LoadStatus,
    pub gauges: Vec<Gauge>,
    pub risk: Option<RiskPanel>,
    pub chart: ChartSeries,
    pub sensors: Vec<SensorRecord>,
    pub map_center: (f64, f64),
    pub correlations: Option<CorrelationPanel>,
    pub forecast: Vec<ForecastPoint>,
    pub timeline: Vec<TimelineEvent>,
    pub last_update_ms: u64,
}

impl DashboardView {
    pub fn from_state(state: &StoreState) -> Self {
        let zone = state.epoch.zone;
        let snapshot = current_snapshot(state);
        let sensors: Vec<SensorRecord> = state
            .sensors
            .iter()
            .filter(|s| s.is_in(zone))
            .cloned()
            .collect();

        Self {
            zone,
            status: load_status(state),
            gauges: snapshot.map(gauges).unwrap_or_default(),
            risk: snapshot.map(risk_panel),
            chart: chart_series(&state.history),
            map_center: map_center(&sensors),
            sensors,
            correlations: state.correlations.map(correlation_panel),
            forecast: if snapshot.is_some() {
                state.forecast.clone()
            } else {
                Vec::new()
            },
            timeline: state.timeline.clone(),
            last_update_ms: state.last_update_ms,
        }
    }
}

/// a snapshot retained from a previous zone is not shown for the active one
fn current_snapshot(state: &StoreState) -> Option<&Snapshot> {
    state
        .snapshot
        .as_ref()
        .filter(|_| state.snapshot_zone == Some(state.epoch.zone))
}

fn load_status(state: &StoreState) -> LoadStatus {
    match (current_snapshot(state), &state.boot_error) {
        (None, Some(message)) if state.loaded => LoadStatus::ConnectionError {
            message: message.clone(),
        },
        (Some(_), _) if state.loaded => LoadStatus::Ready,
        _ => LoadStatus::Loading,
    }
}

/// inclusive upper bounds for Safe and Warning
fn level(value: f64, (safe, warning): (f64, f64)) -> GaugeLevel {
    if value <= safe {
        GaugeLevel::Safe
    } else if value <= warning {
        GaugeLevel::Warning
    } else {
        GaugeLevel::Danger
    }
}

fn gauge(
    label: &'static str,
    unit: &'static str,
    value: Option<f64>,
    thresholds: (f64, f64),
    full_scale: f64,
) -> Gauge {
    let v = value.unwrap_or(0.0);
    Gauge {
        label,
        unit,
        value,
        level: level(v, thresholds),
        fill: (v / full_scale).clamp(0.0, 1.0),
    }
}

fn gauges(snapshot: &Snapshot) -> Vec<Gauge> {
    let c = &snapshot.current;
    vec![
        gauge("Temperature", "°C", c.temperature, (30.0, 38.0), 50.0),
        gauge("Humidity", "%", c.humidity, (70.0, 85.0), 100.0),
        gauge("PM2.5", "µg/m³", Some(c.pm25), (25.0, 55.0), 100.0),
        gauge("Wind", "km/h", c.wind_speed, (20.0, 40.0), 100.0),
        gauge("Noise", "dB", Some(c.noise), (70.0, 80.0), 120.0),
        gauge("Risk", "/100", Some(snapshot.risk.score), (30.0, 70.0), 100.0),
    ]
}

fn risk_panel(snapshot: &Snapshot) -> RiskPanel {
    let risk = &snapshot.risk;
    RiskPanel {
        score: risk.score,
        level: risk.level.clone(),
        band: RiskBand::from_score(risk.score),
        top_alerts: risk.alerts.iter().take(TOP_ALERTS).cloned().collect(),
    }
}

/// `history` is newest first; the chart wants the reverse
fn chart_series(history: &[HistoryPoint]) -> ChartSeries {
    let mut series = ChartSeries::default();
    for point in history.iter().rev() {
        series.labels.push(
            point
                .timestamp
                .to_utc()
                .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
                .unwrap_or_default(),
        );
        series.pm25.push(point.pm25);
        series.wind_kph.push(point.wind_kph);
        series.noise.push(point.noise);
    }
    series
}

fn map_center(zone_sensors: &[SensorRecord]) -> (f64, f64) {
    zone_sensors
        .first()
        .and_then(|s| s.lat.zip(s.longitude()))
        .unwrap_or(DEFAULT_MAP_CENTER)
}

fn correlation_panel(c: Correlations) -> CorrelationPanel {
    let cell = |value: f64| CorrelationCell {
        value,
        strong: value.abs() > 0.6,
    };
    CorrelationPanel {
        pm25_wind: cell(c.pm25_wind),
        pm25_noise: cell(c.pm25_noise),
        wind_noise: cell(c.wind_noise),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CurrentReadings, RiskAssessment, Timestamp};
    use crate::store::ZoneEpoch;

    fn empty_state(zone: Zone) -> StoreState {
        StoreState {
            epoch: ZoneEpoch { zone, generation: 1 },
            snapshot: None,
            snapshot_zone: None,
            history: Vec::new(),
            sensors: Vec::new(),
            correlations: None,
            forecast: Vec::new(),
            timeline: Vec::new(),
            loaded: false,
            boot_error: None,
            last_update_ms: 0,
            revision: 0,
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            current: CurrentReadings {
                temperature: Some(39.0),
                humidity: Some(70.0),
                pm25: 30.0,
                wind_speed: None,
                noise: 150.0,
            },
            risk: RiskAssessment {
                score: 55.0,
                level: "High".into(),
                alerts: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            },
        }
    }

    fn sensor(id: &str, location: &str, lat: f64, lon: Option<f64>) -> SensorRecord {
        SensorRecord {
            id: id.into(),
            name: format!("Sensor {id}"),
            sensor_type: "air".into(),
            status: "active".into(),
            location: location.into(),
            lat: Some(lat),
            lon,
            lng: None,
            pm25: Some(20.0),
            noise: Some(50.0),
        }
    }

    #[test]
    fn load_status_transitions() {
        let mut state = empty_state(Zone::Kollam);
        assert_eq!(load_status(&state), LoadStatus::Loading);

        state.boot_error = Some("snapshot returned status 502".into());
        // still loading until the initial pass finishes
        assert_eq!(load_status(&state), LoadStatus::Loading);
        state.loaded = true;
        assert!(matches!(load_status(&state), LoadStatus::ConnectionError { .. }));

        state.boot_error = None;
        state.snapshot = Some(snapshot());
        state.snapshot_zone = Some(Zone::Kollam);
        assert_eq!(load_status(&state), LoadStatus::Ready);

        // zone switch: old snapshot retained, new zone still loading
        state.epoch = ZoneEpoch { zone: Zone::Kannur, generation: 2 };
        state.loaded = false;
        assert_eq!(load_status(&state), LoadStatus::Loading);

        // new zone finished loading without a snapshot of its own
        state.loaded = true;
        assert_eq!(load_status(&state), LoadStatus::Loading);
        state.boot_error = Some("snapshot returned status 500".into());
        assert!(matches!(load_status(&state), LoadStatus::ConnectionError { .. }));
    }

    #[test]
    fn previous_zone_snapshot_is_not_rendered() {
        let mut state = empty_state(Zone::Kannur);
        state.snapshot = Some(snapshot());
        state.snapshot_zone = Some(Zone::Kollam);
        state.loaded = true;
        let view = DashboardView::from_state(&state);
        assert!(view.gauges.is_empty());
        assert!(view.risk.is_none());
        assert!(view.forecast.is_empty());

        state.snapshot_zone = Some(Zone::Kannur);
        let view = DashboardView::from_state(&state);
        assert_eq!(view.gauges.len(), 6);
        assert_eq!(view.status, LoadStatus::Ready);
    }

    #[test]
    fn gauges_use_inclusive_thresholds_and_clamped_fill() {
        let g = gauges(&snapshot());
        let by_label = |label: &str| g.iter().find(|x| x.label == label).unwrap().clone();

        assert_eq!(by_label("Temperature").level, GaugeLevel::Danger);
        assert_eq!(by_label("Humidity").level, GaugeLevel::Safe);
        assert_eq!(by_label("PM2.5").level, GaugeLevel::Warning);
        assert_eq!(by_label("Wind").value, None);
        assert_eq!(by_label("Wind").level, GaugeLevel::Safe);
        assert_eq!(by_label("Noise").fill, 1.0);
        assert_eq!(by_label("Risk").level, GaugeLevel::Warning);
        assert_eq!(by_label("PM2.5").fill, 0.3);
    }

    #[test]
    fn risk_panel_keeps_three_alerts() {
        let panel = risk_panel(&snapshot());
        assert_eq!(panel.band, RiskBand::High);
        assert_eq!(panel.top_alerts, vec!["a", "b", "c"]);
        assert_eq!(RiskBand::from_score(70.0), RiskBand::Critical);
        assert_eq!(RiskBand::from_score(30.0), RiskBand::Elevated);
        assert_eq!(RiskBand::from_score(29.9), RiskBand::Low);
    }

    #[test]
    fn chart_is_chronological() {
        let point = |ms: i64, pm25: f64| HistoryPoint {
            timestamp: Timestamp::Millis(ms),
            pm25,
            wind_kph: 1.0,
            noise: 50.0,
            temperature: None,
        };
        let series = chart_series(&[point(3_000_000, 3.0), point(2_000_000, 2.0), point(1_000_000, 1.0)]);
        assert_eq!(series.pm25, vec![1.0, 2.0, 3.0]);
        assert_eq!(series.labels.len(), 3);
    }

    #[test]
    fn sensors_are_filtered_to_the_zone_and_center_the_map() {
        let mut state = empty_state(Zone::Kannur);
        state.sensors = vec![
            sensor("1", "Kollam", 8.9, Some(76.6)),
            sensor("2", "Kannur", 11.87, Some(75.37)),
            sensor("3", "Kannur", 11.9, Some(75.4)),
        ];
        let view = DashboardView::from_state(&state);
        assert_eq!(view.sensors.len(), 2);
        assert_eq!(view.map_center, (11.87, 75.37));

        state.epoch.zone = Zone::Kasaragod;
        assert_eq!(DashboardView::from_state(&state).map_center, DEFAULT_MAP_CENTER);
    }

    #[test]
    fn correlations_flag_strong_pairs() {
        let panel = correlation_panel(Correlations {
            pm25_wind: -0.65,
            pm25_noise: 0.6,
            wind_noise: 0.1,
        });
        assert!(panel.pm25_wind.strong);
        assert!(!panel.pm25_noise.strong);
        assert!(!panel.wind_noise.strong);

        let view = DashboardView::from_state(&empty_state(Zone::Kollam));
        assert!(view.correlations.is_none());
        assert!(view.gauges.is_empty());
    }
}
