use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tempfile::{TempDir, tempdir};
use update_revisions::config::PublisherConfig;
use update_revisions::revision::NewRevision;
use update_revisions::store::{LatestScan, ScanCursor};
use update_revisions::{
    LogicalId, Revision, RevisionEngine, RevisionStore, SchedulePublisher, SledRevisionStore,
    TimeStamp, UpdateDraft, UpdateError, UpdateStatus,
};

/// Sled store that refuses to append revisions of selected updates.
struct FlakyStore {
    inner: SledRevisionStore,
    refused: Mutex<HashSet<LogicalId>>,
}

impl FlakyStore {
    fn refuse(&self, logical_id: LogicalId) {
        self.refused.lock().unwrap().insert(logical_id);
    }
}

impl RevisionStore for FlakyStore {
    fn append(&self, revision: NewRevision) -> update_revisions::error::Result<Revision> {
        if self.refused.lock().unwrap().contains(revision.logical_id()) {
            return Err(UpdateError::DuplicateRevision {
                logical_id: *revision.logical_id(),
                revision_number: revision.revision_number(),
            });
        }
        self.inner.append(revision)
    }
    fn find_latest(
        &self,
        owner_id: &str,
        logical_id: &LogicalId,
    ) -> update_revisions::error::Result<Option<Revision>> {
        self.inner.find_latest(owner_id, logical_id)
    }
    fn history(
        &self,
        owner_id: &str,
        logical_id: &LogicalId,
    ) -> update_revisions::error::Result<Vec<Revision>> {
        self.inner.history(owner_id, logical_id)
    }
    fn scan(&self, owner_id: Option<&str>) -> update_revisions::error::Result<Vec<Revision>> {
        self.inner.scan(owner_id)
    }
    fn scan_latest(
        &self,
        after: Option<&ScanCursor>,
        limit: usize,
        keep: &dyn Fn(&Revision) -> bool,
    ) -> update_revisions::error::Result<LatestScan> {
        self.inner.scan_latest(after, limit, keep)
    }
}

fn new_engine() -> anyhow::Result<(TempDir, Arc<RevisionEngine<SledRevisionStore>>)> {
    let temp_dir = tempdir()?;
    let store = SledRevisionStore::open(temp_dir.path().join("updates.db"))?;
    Ok((temp_dir, Arc::new(RevisionEngine::new(Arc::new(store)))))
}

fn hours_from_now(hours: i64) -> TimeStamp {
    TimeStamp::from(Utc::now() + Duration::hours(hours))
}

fn schedule<S: RevisionStore>(
    engine: &Arc<RevisionEngine<S>>,
    owner: &str,
    at: TimeStamp,
) -> anyhow::Result<Revision> {
    let created = engine.create_update(UpdateDraft::new(owner, "nightly", "pkg").set_segment_id("beta"))?;
    Ok(engine.revise_update(
        created.logical_id(),
        created
            .to_draft()
            .set_status(UpdateStatus::Scheduled)
            .set_scheduled_date(at),
    )?)
}

#[test]
fn publishes_due_updates_and_leaves_future_ones() -> anyhow::Result<()> {
    let (_dir, engine) = new_engine()?;
    let due = schedule(&engine, "user", hours_from_now(-1))?;
    let later = schedule(&engine, "user", hours_from_now(1))?;

    let publisher = SchedulePublisher::new(Arc::clone(&engine), PublisherConfig::default());
    let report = publisher.publish_due_scheduled_updates(TimeStamp::now())?;

    assert_eq!(report.examined, 2);
    assert_eq!(report.published.len(), 1);
    assert_eq!(report.not_due, 1);
    assert!(report.failures.is_empty());

    let published = engine.get_by_logical_id(due.logical_id(), "user")?;
    assert_eq!(published.status(), UpdateStatus::Published);
    assert_eq!(published.scheduled_date(), None);
    assert_eq!(published.revision_number(), due.revision_number() + 1);
    assert_eq!(published.segment_id(), Some("beta"));
    assert_eq!(report.published[0], published);

    let untouched = engine.get_by_logical_id(later.logical_id(), "user")?;
    assert_eq!(untouched, later);

    // now visible as the segment's published update
    assert_eq!(engine.get_latest_published_for_segment("user", "beta")?, published);

    Ok(())
}

#[test]
fn walks_every_batch_without_skipping() -> anyhow::Result<()> {
    let (_dir, engine) = new_engine()?;
    let mut scheduled = Vec::new();
    for n in 0..7 {
        scheduled.push(schedule(&engine, &format!("owner-{}", n % 3), hours_from_now(-2))?);
    }

    let config = PublisherConfig {
        batch_size: 2,
        ..PublisherConfig::default()
    };
    let publisher = SchedulePublisher::new(Arc::clone(&engine), config);
    let report = publisher.publish_due_scheduled_updates(TimeStamp::now())?;

    assert_eq!(report.examined, 7);
    assert_eq!(report.published.len(), 7);
    assert_eq!(report.not_due, 0);
    for revision in &scheduled {
        let current = engine.get_by_logical_id(revision.logical_id(), revision.owner_id())?;
        assert_eq!(current.status(), UpdateStatus::Published);
    }

    Ok(())
}

#[test]
fn second_sweep_finds_nothing_to_do() -> anyhow::Result<()> {
    let (_dir, engine) = new_engine()?;
    let due = schedule(&engine, "user", hours_from_now(-1))?;

    let publisher = SchedulePublisher::new(Arc::clone(&engine), PublisherConfig::default());
    publisher.publish_due_scheduled_updates(TimeStamp::now())?;
    let report = publisher.publish_due_scheduled_updates(TimeStamp::now())?;

    assert_eq!(report.examined, 0);
    assert!(report.published.is_empty());
    assert_eq!(engine.get_history(due.logical_id(), "user")?.len(), 3);

    Ok(())
}

#[test]
fn sweep_time_decides_what_is_due() -> anyhow::Result<()> {
    let (_dir, engine) = new_engine()?;
    let due_in_an_hour = schedule(&engine, "user", hours_from_now(1))?;

    let publisher = SchedulePublisher::new(Arc::clone(&engine), PublisherConfig::default());
    let report = publisher.publish_due_scheduled_updates(TimeStamp::now())?;
    assert!(report.published.is_empty());
    assert_eq!(report.not_due, 1);

    let report = publisher.publish_due_scheduled_updates(hours_from_now(2))?;
    assert_eq!(report.published.len(), 1);
    assert_eq!(report.not_due, 0);
    assert_eq!(
        engine.get_by_logical_id(due_in_an_hour.logical_id(), "user")?.status(),
        UpdateStatus::Published
    );

    Ok(())
}

#[test]
fn a_failed_publish_does_not_stop_the_sweep() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let store = Arc::new(FlakyStore {
        inner: SledRevisionStore::open(temp_dir.path().join("updates.db"))?,
        refused: Mutex::new(HashSet::new()),
    });
    let engine = Arc::new(RevisionEngine::new(Arc::clone(&store)));

    let scheduled: Vec<Revision> = (0..4)
        .map(|_| schedule(&engine, "user", hours_from_now(-1)))
        .collect::<anyhow::Result<_>>()?;
    let blocked = scheduled[1].clone();
    store.refuse(*blocked.logical_id());

    let config = PublisherConfig {
        batch_size: 1,
        ..PublisherConfig::default()
    };
    let publisher = SchedulePublisher::new(Arc::clone(&engine), config);
    let report = publisher.publish_due_scheduled_updates(TimeStamp::now())?;

    assert_eq!(report.published.len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].logical_id, *blocked.logical_id());
    assert!(matches!(
        report.failures[0].error,
        UpdateError::DuplicateRevision { .. }
    ));

    let still_scheduled = engine.get_by_logical_id(blocked.logical_id(), "user")?;
    assert_eq!(still_scheduled.status(), UpdateStatus::Scheduled);

    Ok(())
}
