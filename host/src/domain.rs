//! ==============================================================================
//! domain.rs - shared data model for the monitoring feeds
//! ==============================================================================
//!
//! purpose:
//!     the wire shapes returned by the monitoring backend and the derived
//!     records the engine produces from them (forecast rows, timeline events).
//!
//! relationships:
//!     - decoded by: feeds.rs (HttpFeedClient)
//!     - held by: store.rs (one slot per feed)
//!     - derived by: forecast.rs, timeline.rs, view.rs
//!     - citizen records: citizen.rs
//!
//! ==============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ==============================================================================
// zones
// ==============================================================================

/// region scoping every per-zone feed query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Zone {
    Thiruvananthapuram,
    Kollam,
    Pathanamthitta,
    Alappuzha,
    Ernakulam,
    Thrissur,
    Palakkad,
    Kannur,
    Kasaragod,
}

impl Zone {
    pub const ALL: [Zone; 9] = [
        Zone::Thiruvananthapuram,
        Zone::Kollam,
        Zone::Pathanamthitta,
        Zone::Alappuzha,
        Zone::Ernakulam,
        Zone::Thrissur,
        Zone::Palakkad,
        Zone::Kannur,
        Zone::Kasaragod,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Zone::Thiruvananthapuram => "Thiruvananthapuram",
            Zone::Kollam => "Kollam",
            Zone::Pathanamthitta => "Pathanamthitta",
            Zone::Alappuzha => "Alappuzha",
            Zone::Ernakulam => "Ernakulam",
            Zone::Thrissur => "Thrissur",
            Zone::Palakkad => "Palakkad",
            Zone::Kannur => "Kannur",
            Zone::Kasaragod => "Kasaragod",
        }
    }
}

impl Default for Zone {
    fn default() -> Self {
        Zone::Thiruvananthapuram
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown zone: {0}")]
pub struct UnknownZone(pub String);

impl FromStr for Zone {
    type Err = UnknownZone;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Zone::ALL
            .into_iter()
            .find(|z| z.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownZone(s.to_string()))
    }
}

// ==============================================================================
// live snapshot
// ==============================================================================

/// current readings for one zone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentReadings {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub pm25: f64,
    #[serde(default)]
    pub wind_speed: Option<f64>,
    #[serde(default)]
    pub noise: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0-100
    #[serde(default)]
    pub score: f64,
    #[serde(default = "default_risk_level")]
    pub level: String,
    #[serde(default)]
    pub alerts: Vec<String>,
}

fn default_risk_level() -> String {
    "Low".to_string()
}

impl Default for RiskAssessment {
    fn default() -> Self {
        Self {
            score: 0.0,
            level: default_risk_level(),
            alerts: Vec::new(),
        }
    }
}

/// `GET /api/monitor?city=` response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub current: CurrentReadings,
    #[serde(rename = "risk_assessment", default)]
    pub risk: RiskAssessment,
}

// ==============================================================================
// history
// ==============================================================================

/// backend timestamps arrive as iso strings (with or without offset) or epoch millis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Millis(i64),
    Text(String),
}

impl Timestamp {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Timestamp::Text(text) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                    return Some(dt.with_timezone(&Utc));
                }
                ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                    .map(|naive| naive.and_utc())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: Timestamp,
    #[serde(default)]
    pub pm25: f64,
    #[serde(default)]
    pub wind_kph: f64,
    #[serde(default)]
    pub noise: f64,
    #[serde(default)]
    pub temperature: Option<f64>,
}

// ==============================================================================
// sensor inventory
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub sensor_type: String,
    #[serde(default)]
    pub status: String,
    /// district name as reported by the backend
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub pm25: Option<f64>,
    #[serde(default)]
    pub noise: Option<f64>,
}

impl SensorRecord {
    /// backends disagree on `lon` vs `lng`
    pub fn longitude(&self) -> Option<f64> {
        self.lon.or(self.lng)
    }

    pub fn is_in(&self, zone: Zone) -> bool {
        self.location == zone.name()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    })
}

// ==============================================================================
// correlations
// ==============================================================================

/// pairwise pearson coefficients, each in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correlations {
    pub pm25_wind: f64,
    pub pm25_noise: f64,
    pub wind_noise: f64,
}

// ==============================================================================
// derived records
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForecastMetric {
    #[serde(rename = "PM2.5")]
    Pm25,
    Noise,
    Temperature,
}

impl fmt::Display for ForecastMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ForecastMetric::Pm25 => "PM2.5",
            ForecastMetric::Noise => "Noise",
            ForecastMetric::Temperature => "Temperature",
        })
    }
}

/// one row of the short-horizon forecast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    /// "+1h" .. "+6h"
    pub time: String,
    pub metric: ForecastMetric,
    /// formatted with unit, e.g. "42.3 µg/m³"
    pub value: String,
    /// e.g. "85%"
    pub confidence: String,
    pub status: String,
    /// unformatted prediction backing `value`
    pub predicted: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Danger,
}

impl Severity {
    pub fn from_risk_score(score: f64) -> Self {
        if score >= 70.0 {
            Severity::Danger
        } else if score >= 50.0 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEvent {
    /// local wall-clock time, e.g. "03:45 PM"
    pub time: String,
    pub severity: Severity,
    pub message: String,
}

// ==============================================================================
// citizen reports
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Smoke,
    Odor,
    Noise,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Validated,
    Resolved,
    Dismissed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitizenReport {
    pub id: i64,
    pub report_type: ReportType,
    pub severity: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub citizen_name: Option<String>,
    #[serde(default)]
    pub citizen_contact: Option<String>,
    pub status: ReportStatus,
    #[serde(default)]
    pub validated_by_sensor: bool,
    #[serde(default)]
    pub validation_notes: Option<String>,
    #[serde(default)]
    pub upvotes: i64,
    #[serde(default)]
    pub downvotes: i64,
    pub timestamp: Timestamp,
}

/// listing filter; `All` is sent as an empty `status` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Pending,
    Validated,
}

impl StatusFilter {
    pub fn query_value(self) -> &'static str {
        match self {
            StatusFilter::All => "",
            StatusFilter::Pending => "pending",
            StatusFilter::Validated => "validated",
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(StatusFilter::All),
            "pending" => Ok(StatusFilter::Pending),
            "validated" => Ok(StatusFilter::Validated),
            other => Err(format!("unknown status filter: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitizenStatistics {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub recent_24h: u64,
    #[serde(default)]
    pub by_status: BTreeMap<String, u64>,
}

/// `POST /api/citizen/report` body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPayload {
    pub location: Zone,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub report_type: ReportType,
    pub severity: u8,
    pub description: String,
    /// data url or null
    pub photo_base64: Option<String>,
    pub citizen_name: Option<String>,
    pub citizen_contact: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoValidation {
    #[serde(default)]
    pub validated: bool,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub auto_validation: Option<AutoValidation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_parses_case_insensitively() {
        assert_eq!("ernakulam".parse::<Zone>().unwrap(), Zone::Ernakulam);
        assert_eq!(" Kannur ".parse::<Zone>().unwrap(), Zone::Kannur);
        assert!("Chennai".parse::<Zone>().is_err());
        assert_eq!(Zone::ALL.len(), 9);
    }

    #[test]
    fn snapshot_decodes_backend_shape() {
        let raw = r#"{
            "current": {"temperature": 31.2, "humidity": 70, "pm25": 48.5, "wind_speed": 12.0, "noise": 66},
            "risk_assessment": {"score": 72, "level": "High", "alerts": ["PM2.5 spike", "Noise"]}
        }"#;
        let snap: Snapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snap.current.pm25, 48.5);
        assert_eq!(snap.current.temperature, Some(31.2));
        assert_eq!(snap.risk.alerts[0], "PM2.5 spike");
    }

    #[test]
    fn snapshot_without_risk_falls_back_to_low() {
        let snap: Snapshot = serde_json::from_str(r#"{"current": {"pm25": 10, "noise": 50}}"#).unwrap();
        assert_eq!(snap.risk.level, "Low");
        assert!(snap.risk.alerts.is_empty());
    }

    #[test]
    fn timestamps_parse_in_every_backend_form() {
        let rfc = Timestamp::Text("2024-05-01T10:00:00+05:30".into()).to_utc().unwrap();
        let naive = Timestamp::Text("2024-05-01T04:30:00".into()).to_utc().unwrap();
        let millis = Timestamp::Millis(rfc.timestamp_millis()).to_utc().unwrap();
        assert_eq!(rfc, naive);
        assert_eq!(rfc, millis);
        assert!(Timestamp::Text("yesterday".into()).to_utc().is_none());
    }

    #[test]
    fn sensor_accepts_numeric_id_and_lng() {
        let raw = r#"{"id": 4, "name": "S4", "type": "air", "status": "active",
                      "location": "Kollam", "lat": 8.89, "lng": 76.61, "pm25": 30, "noise": 55}"#;
        let sensor: SensorRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(sensor.id, "4");
        assert_eq!(sensor.longitude(), Some(76.61));
        assert!(sensor.is_in(Zone::Kollam));
        assert!(!sensor.is_in(Zone::Kannur));
    }

    #[test]
    fn sensor_without_coordinates_does_not_fail_the_inventory() {
        let raw = r#"[
            {"id": 1, "name": "S1", "location": "Kollam", "lat": 8.89, "lon": 76.61},
            {"id": 2, "name": "S2", "location": "Kollam"}
        ]"#;
        let sensors: Vec<SensorRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].lat, Some(8.89));
        assert_eq!(sensors[1].lat, None);
        assert_eq!(sensors[1].longitude(), None);
    }

    #[test]
    fn unknown_report_status_is_tolerated() {
        let raw = r#"{"id": 1, "report_type": "smoke", "severity": 3, "status": "archived",
                      "timestamp": "2024-05-01T10:00:00Z"}"#;
        let report: CitizenReport = serde_json::from_str(raw).unwrap();
        assert_eq!(report.status, ReportStatus::Unknown);
        assert_eq!(report.upvotes, 0);
    }

    #[test]
    fn severity_thresholds() {
        assert_eq!(Severity::from_risk_score(70.0), Severity::Danger);
        assert_eq!(Severity::from_risk_score(69.9), Severity::Warning);
        assert_eq!(Severity::from_risk_score(50.0), Severity::Warning);
        assert_eq!(Severity::from_risk_score(49.0), Severity::Info);
    }
}
