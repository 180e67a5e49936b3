//! Incident lifecycle: folds each accepted report into the active incident
//! at its location, or opens a new one. The original implementation left
//! the recomputation step (`AggregatorHelper.update_incident`) as a set of
//! `TODO` stubs; this is the completed version.

use chrono::{NaiveDateTime, Utc};

use crate::error::PipelineError;
use crate::model::{IncidentStatus, ReportMessage, ReportType};
use crate::store::{ReportWithReporter, Store};

pub struct Aggregator<'a> {
    store: &'a Store,
}

impl<'a> Aggregator<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Folds one accepted report into the incident state at its location.
    /// Returns the id of the incident it now belongs to.
    pub async fn routine(&self, msg: &ReportMessage, user_id: i64) -> Result<i64, PipelineError> {
        // Step A: resolve or create the location.
        let location_id = match self.store.location_id_by_name(&msg.location_name).await? {
            Some(id) => id,
            None => self.store.add_location(&msg.location_name, msg.location_pos).await?,
        };

        // Step B: persist the report itself.
        let type_id = self.store.type_id(msg.report_type).await?;
        let (report_id, _created_at) = self
            .store
            .insert_report_and_increment(user_id, location_id, type_id, msg.delay_minutes)
            .await?;

        // Step C: look for an already-active incident at this location.
        let incident_id = match self.store.active_incident_by_location(location_id).await? {
            Some(incident) => incident.id,
            // Step D: none exists, open one seeded by this single report.
            // trust_score starts at 0 and is immediately superseded by the
            // Step-E recompute below.
            None => {
                let avg_delay = msg.delay_minutes.map(|d| d as f64);
                self.store
                    .insert_incident(location_id, type_id, avg_delay, 0.0, IncidentStatus::Active)
                    .await?
            }
        };

        self.store.assign_report_to_incident(report_id, incident_id).await?;

        // Step E: recompute the incident from its full, current report set.
        self.recompute(incident_id).await?;

        Ok(incident_id)
    }

    /// Step E: re-derive an incident's type, average delay, and trust score
    /// from every report currently assigned to it, then write all four
    /// fields (type, avg_delay, trust, last_updated) in one transaction.
    /// Exposed directly (not just through `routine`) so a recomputation can
    /// be re-run over an unchanged report set to check it is idempotent.
    pub async fn recompute(&self, incident_id: i64) -> Result<(), PipelineError> {
        let reports = self.store.reports_with_reporters(incident_id).await?;
        if reports.is_empty() {
            return Ok(());
        }

        let now = Utc::now().naive_utc();
        let dominant_type = dominant_type(&reports);
        let avg_delay = average_remaining_delay(&reports, now);
        let trust_score = weighted_trust(&reports, avg_delay, now);

        let type_id = self.store.type_id(dominant_type).await?;
        self.store.recompute_incident(incident_id, type_id, avg_delay, trust_score).await?;

        if dominant_type == ReportType::Solved {
            self.store.set_incident_status(incident_id, IncidentStatus::Resolved).await?;
        }

        Ok(())
    }
}

/// The majority report type among an incident's reports. A single `Solved`
/// report immediately overrides the count, since resolution is reported
/// deliberately rather than inferred statistically. Ties among non-`Solved`
/// types break toward the type most recently reported.
fn dominant_type(reports: &[ReportWithReporter]) -> ReportType {
    if reports.iter().any(|r| type_of(r) == ReportType::Solved) {
        return ReportType::Solved;
    }

    let mut best: Option<(ReportType, usize, NaiveDateTime)> = None;
    for t in ReportType::ALL {
        let matching: Vec<&ReportWithReporter> = reports.iter().filter(|r| type_of(r) == t).collect();
        if matching.is_empty() {
            continue;
        }
        let count = matching.len();
        let latest = matching.iter().map(|r| r.report.created_at).max().unwrap();
        let replace = match &best {
            None => true,
            Some((_, best_count, best_latest)) => {
                count > *best_count || (count == *best_count && latest > *best_latest)
            }
        };
        if replace {
            best = Some((t, count, latest));
        }
    }
    best.map(|(t, _, _)| t).unwrap_or(ReportType::Other)
}

fn type_of(r: &ReportWithReporter) -> ReportType {
    ReportType::from_db_name(&r.report_type_name).unwrap_or(ReportType::Other)
}

/// Mean of each report's delay, decayed by the time elapsed since it was
/// filed, floored at zero. A report estimating "10 minutes late" five
/// minutes ago contributes roughly 5 remaining minutes now. Reports without
/// a delay estimate do not participate; if none provide one, returns `None`.
fn average_remaining_delay(reports: &[ReportWithReporter], now: NaiveDateTime) -> Option<f64> {
    let mut remaining = Vec::new();
    for r in reports {
        if let Some(delay) = r.report.delay_minutes {
            let elapsed_min = (now - r.report.created_at).num_seconds() as f64 / 60.0;
            remaining.push((delay as f64 - elapsed_min).max(0.0));
        }
    }
    if remaining.is_empty() {
        return None;
    }
    Some(remaining.iter().sum::<f64>() / remaining.len() as f64)
}

/// Each report's weight is its reporter's trust score, boosted by their
/// history (`reports_made`), then discounted if its own normalized delay is
/// an outlier relative to the incident's `avg_delay`. The score is the mean
/// of each weight expressed as a fraction of the largest weight present —
/// a fraction of maximum achievable corroboration, not a probability.
fn weighted_trust(reports: &[ReportWithReporter], avg_delay: Option<f64>, now: NaiveDateTime) -> f64 {
    let weights: Vec<f64> = reports
        .iter()
        .map(|r| {
            let mut w = r.reporter_trust_score * (1.0 + r.reporter_reports_made as f64 / 100.0);
            if let (Some(mu), Some(delay)) = (avg_delay, r.report.delay_minutes) {
                if mu > 0.0 {
                    let elapsed_min = (now - r.report.created_at).num_seconds() as f64 / 60.0;
                    let d = (delay as f64 - elapsed_min).max(0.0);
                    let attenuation = (1.0 - (d - mu).abs() / mu).max(0.5);
                    w *= attenuation;
                }
            }
            w
        })
        .collect();

    let w_max = weights.iter().cloned().fold(0.0_f64, f64::max);
    let w_max = if w_max > 0.0 { w_max } else { 1.0 };
    let n = reports.len() as f64;

    (weights.iter().map(|w| w / w_max).sum::<f64>() / n).clamp(0.0, 1.0)
}
