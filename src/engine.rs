//! Service layer API for update revision operations
use std::sync::Arc;

use tracing::info;

use crate::error::{Result, UpdateError};
use crate::projector::{LatestProjector, ListQuery, Page};
use crate::revision::{NewRevision, Revision, UpdateDraft};
use crate::status::UpdateStatus;
use crate::store::RevisionStore;
use crate::types::LogicalId;

pub struct RevisionEngine<S> {
    store: Arc<S>,
    projector: LatestProjector<S>,
}

impl<S: RevisionStore> RevisionEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        let projector = LatestProjector::new(Arc::clone(&store));
        Self { store, projector }
    }

    pub fn projector(&self) -> &LatestProjector<S> {
        &self.projector
    }

    /// Start a new logical update.
    ///
    /// Always a fresh logical id, revision 1 and status DRAFT, whatever the
    /// draft carries.
    pub fn create_update(&self, draft: UpdateDraft) -> Result<Revision> {
        draft.validate()?;

        let revision = NewRevision::new(LogicalId::new(), 1, draft.set_status(UpdateStatus::Draft));
        let stored = self.store.append(revision)?;

        info!(
            owner_id = stored.owner_id(),
            logical_id = %stored.logical_id(),
            "update created"
        );
        Ok(stored)
    }

    /// Append the next revision of an existing update.
    ///
    /// The draft's status must be reachable from the current status. A logical
    /// id carried by the draft is ignored in favour of `logical_id`.
    pub fn revise_update(&self, logical_id: &LogicalId, draft: UpdateDraft) -> Result<Revision> {
        draft.validate()?;

        let current = self.get_by_logical_id(logical_id, draft.owner_id())?;
        self.append_after(&current, draft)
    }

    /// Append the revision that directly follows `current`.
    ///
    /// Fails with [`UpdateError::DuplicateRevision`] when `current` is no
    /// longer the latest revision of its update.
    pub fn revise_from(&self, current: &Revision, draft: UpdateDraft) -> Result<Revision> {
        draft.validate()?;
        self.append_after(current, draft)
    }

    fn append_after(&self, current: &Revision, draft: UpdateDraft) -> Result<Revision> {
        if !current.status().is_compatible(draft.status()) {
            return Err(UpdateError::InvalidTransition {
                from: current.status(),
                to: draft.status(),
            });
        }

        let revision = NewRevision::new(
            *current.logical_id(),
            current.revision_number() + 1,
            draft.set_owner_id(current.owner_id()),
        );
        let stored = self.store.append(revision)?;

        info!(
            owner_id = stored.owner_id(),
            logical_id = %stored.logical_id(),
            revision = stored.revision_number(),
            from = %current.status(),
            to = %stored.status(),
            "update revised"
        );
        Ok(stored)
    }

    /// Current revision of an update.
    pub fn get_by_logical_id(&self, logical_id: &LogicalId, owner_id: &str) -> Result<Revision> {
        self.store
            .find_latest(owner_id, logical_id)?
            .ok_or(UpdateError::NotFound {
                logical_id: *logical_id,
            })
    }

    /// All revisions of an update, oldest first.
    pub fn get_history(&self, logical_id: &LogicalId, owner_id: &str) -> Result<Vec<Revision>> {
        let history = self.store.history(owner_id, logical_id)?;
        if history.is_empty() {
            return Err(UpdateError::NotFound {
                logical_id: *logical_id,
            });
        }
        Ok(history)
    }

    pub fn list_updates(&self, owner_id: &str, query: &ListQuery) -> Result<Page<Revision>> {
        self.projector.list_latest(owner_id, query)
    }

    pub fn get_latest_published_for_segment(
        &self,
        owner_id: &str,
        segment_id: &str,
    ) -> Result<Revision> {
        self.projector
            .latest_published_by_segment(owner_id, segment_id)?
            .ok_or(UpdateError::NoPublishedUpdate)
    }

    pub fn get_latest_published_for_default_segment(&self, owner_id: &str) -> Result<Revision> {
        self.projector
            .latest_published_default_segment(owner_id)?
            .ok_or(UpdateError::NoPublishedUpdate)
    }
}
