//! Concrete end-to-end scenarios against a real temp-file SQLite store,
//! covering accept/reject, incident merging, resolution, and feed
//! emission.

use transit_incidents::aggregator::Aggregator;
use transit_incidents::decider;
use transit_incidents::gtfs;
use transit_incidents::model::{IncidentStatus, LatLon, ReportMessage, ReportType};
use transit_incidents::reputation;
use transit_incidents::store::Store;

async fn fresh_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.db");
    let store = Store::connect(path.to_str().unwrap()).await.unwrap();
    (store, dir)
}

fn report(user_name: &str, location: &str, pos: LatLon, report_type: ReportType, delay: Option<i64>) -> ReportMessage {
    ReportMessage {
        user_name: user_name.to_string(),
        user_location: pos,
        location_name: location.to_string(),
        location_pos: pos,
        report_type,
        delay_minutes: delay,
    }
}

/// S1: a fresh database, a trusted user's first report at a new location,
/// is accepted and opens a new incident.
#[tokio::test]
async fn s1_fresh_db_accept_opens_incident() {
    let (store, _dir) = fresh_store().await;
    let uid = store.create_user("alice", "alice@example.com").await.unwrap();
    let user = store.user_by_id(uid).await.unwrap().unwrap();

    let pos = LatLon::new(50.06143, 19.93658);
    let msg = report("alice", "T1@S1", pos, ReportType::Delay, Some(10));

    let (accept, _prob) = decider::decide(&msg, &user).unwrap();
    assert!(accept);

    let incident_id = Aggregator::new(&store).routine(&msg, uid).await.unwrap();
    let incident = store.incident(incident_id).await.unwrap().unwrap();
    assert_eq!(incident.status(), IncidentStatus::Active);
}

/// S2: a second accepted report at the same location merges into the
/// existing active incident rather than opening a new one.
#[tokio::test]
async fn s2_second_report_merges_into_active_incident() {
    let (store, _dir) = fresh_store().await;
    let uid = store.create_user("alice", "alice@example.com").await.unwrap();
    let pos = LatLon::new(50.06143, 19.93658);

    let aggregator = Aggregator::new(&store);
    let first = aggregator
        .routine(&report("alice", "T1@S1", pos, ReportType::Delay, Some(10)), uid)
        .await
        .unwrap();
    let second = aggregator
        .routine(&report("alice", "T1@S1", pos, ReportType::Delay, Some(12)), uid)
        .await
        .unwrap();

    assert_eq!(first, second);
    let reports = store.reports_by_incident(second).await.unwrap();
    assert_eq!(reports.len(), 2);
}

/// S3: a low-trust user is instant-rejected regardless of distance.
#[tokio::test]
async fn s3_instant_reject_on_low_trust() {
    let (store, _dir) = fresh_store().await;
    let uid = store.create_user("bob", "bob@example.com").await.unwrap();
    store.update_trust_score(uid, 0.2).await.unwrap();
    let user = store.user_by_id(uid).await.unwrap().unwrap();

    let pos = LatLon::new(50.06143, 19.93658);
    let msg = report("bob", "T1@S1", pos, ReportType::Delay, Some(5));

    let (accept, prob) = decider::decide(&msg, &user).unwrap();
    assert!(!accept);
    assert_eq!(prob, 0.0);
}

/// S4: a report whose user and location are too far apart is
/// instant-rejected regardless of trust.
#[tokio::test]
async fn s4_instant_reject_on_distance() {
    let (store, _dir) = fresh_store().await;
    let uid = store.create_user("carol", "carol@example.com").await.unwrap();
    let user = store.user_by_id(uid).await.unwrap().unwrap();

    let msg = report(
        "carol",
        "T1@S1",
        LatLon::new(50.06143, 19.93658),
        ReportType::Delay,
        Some(5),
    );
    let mut far_msg = msg.clone();
    far_msg.user_location = LatLon::new(0.0, 0.0);

    let (accept, prob) = decider::decide(&far_msg, &user).unwrap();
    assert!(!accept);
    assert_eq!(prob, 0.0);
}

/// S5: once the dominant type resolves to `Solved`, the incident
/// transitions to `resolved`; a later report at the same location opens a
/// brand new incident rather than reopening the old one.
#[tokio::test]
async fn s5_solved_resolves_then_reopens() {
    let (store, _dir) = fresh_store().await;
    let uid = store.create_user("dave", "dave@example.com").await.unwrap();
    let pos = LatLon::new(50.06143, 19.93658);
    let aggregator = Aggregator::new(&store);

    let first = aggregator
        .routine(&report("dave", "T1@S1", pos, ReportType::Delay, Some(10)), uid)
        .await
        .unwrap();
    let same = aggregator
        .routine(&report("dave", "T1@S1", pos, ReportType::Solved, None), uid)
        .await
        .unwrap();
    assert_eq!(first, same);

    let resolved = store.incident(same).await.unwrap().unwrap();
    assert_eq!(resolved.status(), IncidentStatus::Resolved);
    assert!(store.active_incident_by_location(resolved.location_id).await.unwrap().is_none());

    let reopened = aggregator
        .routine(&report("dave", "T1@S1", pos, ReportType::Delay, Some(8)), uid)
        .await
        .unwrap();
    assert_ne!(reopened, same);
    let new_incident = store.incident(reopened).await.unwrap().unwrap();
    assert_eq!(new_incident.status(), IncidentStatus::Active);
}

/// S6: the GTFS feed emits exactly one entity for a single fresh incident
/// with a positive average delay and a `trip@stop`-shaped location name.
#[tokio::test]
async fn s6_gtfs_emits_single_entity() {
    let (store, _dir) = fresh_store().await;
    let uid = store.create_user("erin", "erin@example.com").await.unwrap();
    let pos = LatLon::new(50.06143, 19.93658);

    let incident_id = Aggregator::new(&store)
        .routine(&report("erin", "T1@S1", pos, ReportType::Delay, Some(10)), uid)
        .await
        .unwrap();

    let new_score = reputation::compute_new_score(1.0, true);
    store.update_trust_score(uid, new_score).await.unwrap();

    let now = chrono::Utc::now().naive_utc();
    let feed = gtfs::build_feed(&store, now).await.unwrap();

    assert_eq!(feed.entity.len(), 1);
    let entity = &feed.entity[0];
    assert_eq!(entity.id, format!("incident_{incident_id}"));
    let trip_update = entity.trip_update.as_ref().unwrap();
    assert_eq!(trip_update.trip.as_ref().unwrap().trip_id.as_deref(), Some("T1"));
    let stu = &trip_update.stop_time_update[0];
    assert_eq!(stu.stop_id.as_deref(), Some("S1"));
    assert!(stu.arrival.is_some());
    assert_eq!(stu.arrival.as_ref().unwrap().delay, stu.departure.as_ref().unwrap().delay);
}
