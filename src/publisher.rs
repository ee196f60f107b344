//! Scheduled publication sweep.
//!
//! Walks every update whose current revision is SCHEDULED, skips those whose
//! date has not passed yet and publishes the rest through [`RevisionEngine::revise_from`], appending
//! right after the revision the sweep examined. The usual transition check
//! applies, and the store's uniqueness guarantee rejects the publish if the
//! update changed in between. Two overlapping sweeps racing on one update
//! produce a single publish.
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::PublisherConfig;
use crate::engine::RevisionEngine;
use crate::error::{Result, UpdateError};
use crate::revision::Revision;
use crate::status::UpdateStatus;
use crate::store::RevisionStore;
use crate::types::{LogicalId, TimeStamp};

#[derive(Debug)]
pub struct SweepFailure {
    pub owner_id: String,
    pub logical_id: LogicalId,
    pub error: UpdateError,
}

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Currently scheduled updates seen by the sweep.
    pub examined: usize,
    /// Revisions appended by this sweep.
    pub published: Vec<Revision>,
    /// Candidates whose scheduled date had not passed yet.
    pub not_due: usize,
    pub failures: Vec<SweepFailure>,
}

pub struct SchedulePublisher<S> {
    engine: Arc<RevisionEngine<S>>,
    config: PublisherConfig,
}

impl<S: RevisionStore> SchedulePublisher<S> {
    pub fn new(engine: Arc<RevisionEngine<S>>, config: PublisherConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Publish every scheduled update due before `now`.
    ///
    /// A failed publish is recorded in the report and the sweep moves on. A
    /// failure to fetch a batch ends the sweep with that error.
    pub fn publish_due_scheduled_updates(&self, now: TimeStamp) -> Result<SweepReport> {
        let projector = self.engine.projector();
        let mut report = SweepReport::default();
        let mut resume_after = None;

        loop {
            let batch = projector.scheduled(resume_after.as_ref(), self.config.batch_size)?;
            debug!(batch = batch.items.len(), more = batch.has_more(), "scheduled batch fetched");

            for revision in &batch.items {
                report.examined += 1;
                if !revision.is_due(now) {
                    report.not_due += 1;
                    continue;
                }
                self.publish(revision, &mut report);
            }

            if !batch.has_more() {
                break;
            }
            resume_after = batch.resume_after;
        }

        info!(
            examined = report.examined,
            published = report.published.len(),
            not_due = report.not_due,
            failed = report.failures.len(),
            "scheduled sweep finished"
        );
        Ok(report)
    }

    fn publish(&self, revision: &Revision, report: &mut SweepReport) {
        let candidate = revision
            .to_draft()
            .set_status(UpdateStatus::Published)
            .clear_scheduled_date();

        match self.engine.revise_from(revision, candidate) {
            Ok(published) => report.published.push(published),
            Err(error) => {
                warn!(
                    owner_id = revision.owner_id(),
                    logical_id = %revision.logical_id(),
                    %error,
                    "failed to publish scheduled update"
                );
                report.failures.push(SweepFailure {
                    owner_id: revision.owner_id().to_string(),
                    logical_id: *revision.logical_id(),
                    error,
                });
            }
        }
    }
}
