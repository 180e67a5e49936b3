//! The consumer loop: drains the queue, applies the `Decider`, updates the
//! reporter's reputation regardless of outcome, and folds accepted reports
//! into the `Aggregator`. Mirrors `core/routine.py`'s `process_report`.

use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::decider;
use crate::error::PipelineError;
use crate::model::ReportMessage;
use crate::queue::QueueReceiver;
use crate::reputation;
use crate::store::Store;

pub struct Routine {
    store: Store,
}

impl Routine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Runs until the queue is closed or a fatal error is hit. Per-message
    /// errors are logged and the loop continues.
    pub async fn run(&self, mut rx: QueueReceiver) {
        while let Some(msg) = rx.recv().await {
            if let Err(err) = self.process_report(msg).await {
                if err.is_fatal() {
                    tracing::error!(error = %err, "routine stopping on fatal error");
                    return;
                }
                warn!(error = %err, "dropped report");
            }
        }
        info!("queue closed, routine exiting");
    }

    async fn process_report(&self, msg: ReportMessage) -> Result<(), PipelineError> {
        let user = self
            .store
            .user_by_name(&msg.user_name)
            .await?
            .ok_or_else(|| PipelineError::UnknownUser(msg.user_name.clone()))?;

        let (accepted, probability) = decider::decide(&msg, &user)?;
        let new_score = reputation::compute_new_score(user.trust_score, accepted);
        self.store.update_trust_score(user.id, new_score).await?;

        if !accepted {
            info!(user = %msg.user_name, probability, "report rejected");
            return Ok(());
        }

        let aggregator = Aggregator::new(&self.store);
        let incident_id = aggregator.routine(&msg, user.id).await?;
        info!(user = %msg.user_name, incident_id, probability, "report folded into incident");
        Ok(())
    }
}
