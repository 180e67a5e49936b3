//! Strongly-typed records for the transit incident domain.
//!
//! The original system passed rows around as untyped dictionaries; here every
//! entity that crosses a repository boundary is a concrete struct, and the
//! wire format for inbound reports is a dedicated `ReportMessage` type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A lat/lon pair. Serializes as `{"latitude": .., "longitude": ..}`, matching
/// the JSON shape the report producer sends.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLon {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// The closed set of report types. Seeded once at startup; unknown names
/// encountered later are a fatal input error, never silently created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportType {
    Delay,
    Maintenance,
    Accident,
    Solved,
    Other,
}

impl ReportType {
    pub const ALL: [ReportType; 5] = [
        ReportType::Delay,
        ReportType::Maintenance,
        ReportType::Accident,
        ReportType::Solved,
        ReportType::Other,
    ];

    /// The exact row value stored in `report_types.name`.
    pub fn db_name(self) -> &'static str {
        match self {
            ReportType::Delay => "Delay",
            ReportType::Maintenance => "Maintenance",
            ReportType::Accident => "Accident",
            ReportType::Solved => "Solved",
            ReportType::Other => "Other",
        }
    }

    pub fn from_db_name(name: &str) -> Option<Self> {
        ReportType::ALL.into_iter().find(|t| t.db_name() == name)
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.db_name())
    }
}

/// Incident lifecycle status. `Pending` is declared but never written by the
/// core pipeline — it is reserved for external admin workflows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Active,
    Resolved,
    Pending,
}

impl IncidentStatus {
    pub fn db_name(self) -> &'static str {
        match self {
            IncidentStatus::Active => "active",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Pending => "pending",
        }
    }

    pub fn from_db_name(name: &str) -> Option<Self> {
        match name {
            "active" => Some(IncidentStatus::Active),
            "resolved" => Some(IncidentStatus::Resolved),
            "pending" => Some(IncidentStatus::Pending),
            _ => None,
        }
    }
}

/// Inbound report as submitted by a producer, round-tripping through JSON
/// with field names exactly as listed in the spec.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportMessage {
    pub user_name: String,
    pub user_location: LatLon,
    pub location_name: String,
    pub location_pos: LatLon,
    pub report_type: ReportType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_minutes: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub trust_score: f64,
    pub reports_made: i64,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub coords_lat: f64,
    pub coords_lon: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Report {
    pub id: i64,
    pub user_id: i64,
    pub location_id: i64,
    pub type_id: i64,
    pub delay_minutes: Option<i64>,
    pub incident_id: Option<i64>,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Incident {
    pub id: i64,
    pub location_id: i64,
    pub type_id: i64,
    pub avg_delay: Option<f64>,
    pub trust_score: f64,
    pub status: String,
    pub created_at: chrono::NaiveDateTime,
    pub last_updated: chrono::NaiveDateTime,
}

impl Incident {
    pub fn status(&self) -> IncidentStatus {
        IncidentStatus::from_db_name(&self.status).unwrap_or(IncidentStatus::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_message_round_trips_through_json() {
        let msg = ReportMessage {
            user_name: "alice".into(),
            user_location: LatLon::new(50.06143, 19.93658),
            location_name: "L1".into(),
            location_pos: LatLon::new(50.06143, 19.93658),
            report_type: ReportType::Delay,
            delay_minutes: Some(10),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"report_type\":\"DELAY\""));
        assert!(json.contains("\"latitude\":50.06143"));
        let back: ReportMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn report_message_allows_missing_delay() {
        let raw = r#"{
            "user_name": "bob",
            "user_location": {"latitude": 60.0, "longitude": 20.0},
            "location_name": "L2",
            "location_pos": {"latitude": 60.0, "longitude": 20.0},
            "report_type": "ACCIDENT"
        }"#;
        let msg: ReportMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.delay_minutes, None);
        assert_eq!(msg.report_type, ReportType::Accident);
    }

    #[test]
    fn report_type_db_name_round_trips() {
        for t in ReportType::ALL {
            assert_eq!(ReportType::from_db_name(t.db_name()), Some(t));
        }
        assert_eq!(ReportType::from_db_name("bogus"), None);
    }

    #[test]
    fn lat_lon_validity() {
        assert!(LatLon::new(50.0, 19.0).is_valid());
        assert!(!LatLon::new(91.0, 19.0).is_valid());
        assert!(!LatLon::new(50.0, 181.0).is_valid());
    }
}
