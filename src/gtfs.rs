//! GTFS-Realtime `FeedMessage` emission. The wire types are hand-written
//! `prost::Message` structs covering only the fields this pipeline
//! populates, the same approach the teacher takes for its own packet
//! format rather than compiling upstream `.proto` files at build time.

use prost::Message;

use crate::model::{Incident, IncidentStatus};
use crate::store::Store;

/// Incidents older than this are no longer considered fresh enough to
/// publish, even if still `active`.
pub const FRESHNESS_WINDOW_MINUTES: i64 = 60;

/// Delay beyond which a stop is reported `SKIPPED` rather than merely
/// `SCHEDULED` with a large offset.
pub const SKIP_THRESHOLD_MINUTES: f64 = 30.0;

#[derive(Clone, PartialEq, Message)]
pub struct FeedHeader {
    #[prost(string, tag = "1")]
    pub gtfs_realtime_version: String,
    #[prost(enumeration = "Incrementality", tag = "2")]
    pub incrementality: i32,
    #[prost(uint64, tag = "3")]
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum Incrementality {
    FullDataset = 0,
    Differential = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct FeedEntity {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "3")]
    pub trip_update: Option<TripUpdate>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TripUpdate {
    #[prost(message, optional, tag = "1")]
    pub trip: Option<TripDescriptor>,
    #[prost(message, repeated, tag = "2")]
    pub stop_time_update: Vec<StopTimeUpdate>,
    #[prost(uint64, optional, tag = "4")]
    pub timestamp: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TripDescriptor {
    #[prost(string, optional, tag = "1")]
    pub trip_id: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StopTimeUpdate {
    #[prost(string, optional, tag = "4")]
    pub stop_id: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub arrival: Option<StopTimeEvent>,
    #[prost(message, optional, tag = "3")]
    pub departure: Option<StopTimeEvent>,
    #[prost(enumeration = "ScheduleRelationship", optional, tag = "5")]
    pub schedule_relationship: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StopTimeEvent {
    #[prost(int32, optional, tag = "1")]
    pub delay: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum ScheduleRelationship {
    Scheduled = 0,
    Skipped = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct FeedMessage {
    #[prost(message, required, tag = "1")]
    pub header: FeedHeader,
    #[prost(message, repeated, tag = "2")]
    pub entity: Vec<FeedEntity>,
}

/// Splits a location name of the form `trip@stop` into its GTFS trip and
/// stop identifiers. Locations not following this convention are skipped
/// from the feed entirely, since no trip/stop pair can be derived.
fn split_trip_stop(location_name: &str) -> Option<(&str, &str)> {
    location_name.split_once('@')
}

fn to_entity(incident: &Incident, location_name: &str, now_unix: u64) -> Option<FeedEntity> {
    let avg_delay = incident.avg_delay?;
    if avg_delay <= 0.0 {
        return None;
    }
    let (trip_id, stop_id) = split_trip_stop(location_name)?;

    let delay_seconds = (avg_delay * 60.0).round() as i32;
    let schedule_relationship = if avg_delay > SKIP_THRESHOLD_MINUTES {
        ScheduleRelationship::Skipped
    } else {
        ScheduleRelationship::Scheduled
    };

    Some(FeedEntity {
        id: format!("incident_{}", incident.id),
        trip_update: Some(TripUpdate {
            trip: Some(TripDescriptor {
                trip_id: Some(trip_id.to_string()),
            }),
            stop_time_update: vec![StopTimeUpdate {
                stop_id: Some(stop_id.to_string()),
                arrival: Some(StopTimeEvent {
                    delay: Some(delay_seconds),
                }),
                departure: Some(StopTimeEvent {
                    delay: Some(delay_seconds),
                }),
                schedule_relationship: Some(schedule_relationship as i32),
            }],
            timestamp: Some(now_unix),
        }),
    })
}

/// Builds the feed from every `active` incident updated within the
/// freshness window, carrying a positive average delay and a location name
/// that parses as `trip@stop`. `Solved` incidents never reach this point:
/// the aggregator resolves them on the write path.
pub async fn build_feed(store: &Store, now: chrono::NaiveDateTime) -> Result<FeedMessage, crate::error::PipelineError> {
    let cutoff = now - chrono::Duration::minutes(FRESHNESS_WINDOW_MINUTES);
    let incidents = store.active_incidents_updated_since(cutoff).await?;
    let now_unix = now.and_utc().timestamp().max(0) as u64;

    let entity = incidents
        .iter()
        .filter(|(incident, _)| incident.status() == IncidentStatus::Active)
        .filter_map(|(incident, name)| to_entity(incident, name, now_unix))
        .collect();

    Ok(FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            incrementality: Incrementality::FullDataset as i32,
            timestamp: now_unix,
        },
        entity,
    })
}

pub fn encode_feed(feed: &FeedMessage) -> Vec<u8> {
    feed.encode_to_vec()
}
