//! Pure gating function over a `ReportMessage` and the reporter's user
//! record. No I/O; deterministic; the only way this fails is `InvalidInput`
//! on out-of-range coordinates.

use crate::error::PipelineError;
use crate::model::{LatLon, ReportMessage, User};

const EARTH_RADIUS_KM: f64 = 6371.0;

pub const DIST_MAX_KM: f64 = 10.0;
pub const TIME_MAX_MIN: f64 = 360.0;
pub const TRUST_MIN: f64 = 0.7;
pub const DECIDE_MIN: f64 = 0.5;
pub const PRIOR: f64 = 0.9;
pub const PRIOR_WEIGHT: f64 = 1.0;
pub const LOW_THRESHOLD: f64 = 0.5;

/// Great-circle distance in kilometers between two points.
pub fn haversine_km(a: LatLon, b: LatLon) -> f64 {
    let (lat1, lon1) = (a.latitude.to_radians(), a.longitude.to_radians());
    let (lat2, lon2) = (b.latitude.to_radians(), b.longitude.to_radians());

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// The reporter's adjusted reputation: low-trust users are not rehabilitated
/// by the prior, but high-trust users with a small sample are smoothed
/// toward it.
fn adjusted_trust(user: &User) -> f64 {
    let t = user.trust_score;
    let n = user.reports_made as f64;
    if t <= LOW_THRESHOLD {
        return t;
    }
    (PRIOR_WEIGHT * PRIOR + n * t) / (PRIOR_WEIGHT + n)
}

fn instant_reject(distance_km: f64, time_diff_min: f64, trust: f64) -> bool {
    distance_km > DIST_MAX_KM || time_diff_min > TIME_MAX_MIN || trust < TRUST_MIN
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Decide whether to trust `msg`, given the reporter's current record.
/// Returns `(accept, probability)`. `probability` is `0.0` on an instant
/// reject.
pub fn decide(msg: &ReportMessage, user: &User) -> Result<(bool, f64), PipelineError> {
    if !msg.user_location.is_valid() || !msg.location_pos.is_valid() {
        return Err(PipelineError::InvalidInput(format!(
            "coordinates out of range for report from {}",
            msg.user_name
        )));
    }

    let distance = haversine_km(msg.user_location, msg.location_pos);
    let time_diff = msg.delay_minutes.map(|d| d as f64).unwrap_or(0.0);
    let trust = adjusted_trust(user);

    if instant_reject(distance, time_diff, trust) {
        return Ok((false, 0.0));
    }

    let score = 2.0 * trust - distance / DIST_MAX_KM - time_diff / TIME_MAX_MIN;
    let prob = sigmoid(score);
    Ok((prob >= DECIDE_MIN, prob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(trust_score: f64, reports_made: i64) -> User {
        User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            trust_score,
            reports_made,
            created_at: Utc::now().naive_utc(),
        }
    }

    fn msg(user_loc: LatLon, report_loc: LatLon, delay: Option<i64>) -> ReportMessage {
        ReportMessage {
            user_name: "alice".into(),
            user_location: user_loc,
            location_name: "L1".into(),
            location_pos: report_loc,
            report_type: crate::model::ReportType::Delay,
            delay_minutes: delay,
        }
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = LatLon::new(50.06143, 19.93658);
        let b = LatLon::new(52.2297, 21.0122);
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-9);
    }

    #[test]
    fn haversine_same_point_is_zero() {
        let a = LatLon::new(50.06143, 19.93658);
        assert!(haversine_km(a, a) < 1e-9);
    }

    #[test]
    fn accepts_close_report_from_trusted_user() {
        let pos = LatLon::new(50.06143, 19.93658);
        let m = msg(pos, pos, Some(10));
        let u = user(0.9, 0);
        let (accept, prob) = decide(&m, &u).unwrap();
        assert!(accept);
        assert!(prob >= DECIDE_MIN);
    }

    #[test]
    fn rejects_when_distance_too_large() {
        let m = msg(LatLon::new(0.0, 0.0), LatLon::new(50.0, 20.0), Some(10));
        let u = user(0.9, 0);
        let (accept, prob) = decide(&m, &u).unwrap();
        assert!(!accept);
        assert_eq!(prob, 0.0);
    }

    #[test]
    fn rejects_low_trust_user_regardless_of_distance() {
        let pos = LatLon::new(50.06143, 19.93658);
        let m = msg(pos, pos, Some(10));
        let u = user(0.3, 5);
        let (accept, prob) = decide(&m, &u).unwrap();
        assert!(!accept);
        assert_eq!(prob, 0.0);
    }

    #[test]
    fn rejects_stale_delay() {
        let pos = LatLon::new(50.06143, 19.93658);
        let m = msg(pos, pos, Some(400));
        let u = user(0.9, 0);
        let (accept, _) = decide(&m, &u).unwrap();
        assert!(!accept);
    }

    #[test]
    fn rejects_invalid_coordinates() {
        let m = msg(LatLon::new(95.0, 0.0), LatLon::new(0.0, 0.0), None);
        let u = user(0.9, 0);
        assert!(matches!(decide(&m, &u), Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn decide_is_pure_and_idempotent() {
        let pos = LatLon::new(50.06143, 19.93658);
        let m = msg(pos, LatLon::new(50.07, 19.95), Some(15));
        let u = user(0.8, 3);
        let r1 = decide(&m, &u).unwrap();
        let r2 = decide(&m, &u).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn small_sample_high_trust_is_smoothed_toward_prior() {
        // trust_score above LOW_THRESHOLD, zero reports: raw == PRIOR exactly.
        let u = user(1.0, 0);
        assert!((adjusted_trust(&u) - PRIOR).abs() < 1e-12);
    }

    #[test]
    fn low_trust_is_not_rehabilitated_by_prior() {
        let u = user(0.2, 100);
        assert_eq!(adjusted_trust(&u), 0.2);
    }
}
