//! Durable, append-only revision persistence.
//!
//! The store is the only shared mutable resource. Implementations must:
//! - reject an append whose (owner, logical id, revision number) already exists,
//!   atomically, so that two racing revise calls have one winner
//! - assign storage id and creation date, creation dates never going backwards
//! - make a caller's own appends visible to its following reads
//!
//! Revisions are never updated or deleted.
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use sled::Tree;
use tracing::debug;

use crate::error::{Result, UpdateError};
use crate::revision::{NewRevision, Revision};
use crate::types::{LogicalId, TimeStamp};
use crate::utils;

const REVISIONS_TREE: &str = "revisions";
const META_TREE: &str = "meta";
const LAST_CREATED_KEY: &[u8] = b"last_created";
/// `sha256(owner)` hex followed by the logical id bytes.
const UPDATE_PREFIX_LEN: usize = 64 + 16;

/// Position in store key order after which [`RevisionStore::scan_latest`] resumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanCursor(Vec<u8>);

/// One bounded run of [`RevisionStore::scan_latest`].
#[derive(Debug, Clone, Default)]
pub struct LatestScan {
    pub revisions: Vec<Revision>,
    /// Set when the scan stopped at its limit. The next scan may come back empty.
    pub resume_after: Option<ScanCursor>,
}

pub trait RevisionStore: Send + Sync {
    /// Persist a new revision, stamping storage id and creation date.
    fn append(&self, revision: NewRevision) -> Result<Revision>;

    /// Revision with the highest revision number for the logical update.
    fn find_latest(&self, owner_id: &str, logical_id: &LogicalId) -> Result<Option<Revision>>;

    /// Every revision of the logical update, ascending by revision number.
    fn history(&self, owner_id: &str, logical_id: &LogicalId) -> Result<Vec<Revision>>;

    /// Collection scan, restricted to one owner when given. No ordering promised.
    fn scan(&self, owner_id: Option<&str>) -> Result<Vec<Revision>>;

    /// Latest revision of each update across all owners, in store key order,
    /// starting after `after`. Stops once `limit` revisions accepted by `keep`
    /// have been collected; rejected revisions are not retained.
    fn scan_latest(
        &self,
        after: Option<&ScanCursor>,
        limit: usize,
        keep: &dyn Fn(&Revision) -> bool,
    ) -> Result<LatestScan>;
}

/// [`RevisionStore`] backed by a sled tree.
///
/// Key layout: `sha256(owner) hex ‖ logical id bytes ‖ revision number (BE)`.
/// The owner part is fixed width so prefix scans never bleed into another owner.
///
/// The highest creation date handed out is kept in a `meta` tree, so creation
/// dates keep increasing across restarts even if the clock went backwards.
pub struct SledRevisionStore {
    instance: Arc<sled::Db>,
    revisions: Tree,
    meta: Tree,
    last_created: AtomicI64,
}

impl SledRevisionStore {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self> {
        let revisions = instance.open_tree(REVISIONS_TREE)?;
        let meta = instance.open_tree(META_TREE)?;
        let last_created = meta
            .get(LAST_CREATED_KEY)?
            .and_then(|bytes| read_nanos(&bytes))
            .unwrap_or(i64::MIN);

        Ok(Self {
            instance,
            revisions,
            meta,
            last_created: AtomicI64::new(last_created),
        })
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::new(Arc::new(db))
    }

    pub fn db(&self) -> &Arc<sled::Db> {
        &self.instance
    }

    /// Current time, bumped past the previous stamp if the clock has not moved.
    fn next_creation_date(&self) -> TimeStamp {
        let now = TimeStamp::now().nanos().unwrap_or(i64::MAX);
        let mut assigned = now;
        // fetch_update only errors when the closure returns None
        let _ = self
            .last_created
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                assigned = now.max(last.saturating_add(1));
                Some(assigned)
            });

        TimeStamp::from_nanos(assigned)
    }

    fn decode(bytes: &[u8]) -> Result<Revision> {
        Ok(minicbor::decode(bytes)?)
    }

    fn decode_all(iter: sled::Iter) -> Result<Vec<Revision>> {
        iter.map(|entry| {
            let (_, value) = entry?;
            Self::decode(&value)
        })
        .collect()
    }
}

fn read_nanos(bytes: &[u8]) -> Option<i64> {
    bytes.try_into().ok().map(i64::from_be_bytes)
}

fn owner_prefix(owner_id: &str) -> Vec<u8> {
    sha256::digest(owner_id).into_bytes()
}

fn update_prefix(owner_id: &str, logical_id: &LogicalId) -> Vec<u8> {
    let mut key = owner_prefix(owner_id);
    key.extend_from_slice(logical_id.as_bytes());
    key
}

fn revision_key(owner_id: &str, logical_id: &LogicalId, revision_number: u32) -> Vec<u8> {
    let mut key = update_prefix(owner_id, logical_id);
    key.extend_from_slice(&revision_number.to_be_bytes());
    key
}

/// Smallest key sorting after every revision key of the update `prefix`.
fn past_update(prefix: &[u8]) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(&u32::MAX.to_be_bytes());
    key.push(0);
    key
}

impl RevisionStore for SledRevisionStore {
    fn append(&self, revision: NewRevision) -> Result<Revision> {
        let key = revision_key(
            revision.owner_id(),
            revision.logical_id(),
            revision.revision_number(),
        );
        let stored = revision.into_revision(utils::new_storage_id()?, self.next_creation_date());
        let value = minicbor::to_vec(&stored).map_err(|e| UpdateError::Encoding(e.to_string()))?;

        // insert-if-absent, the uniqueness guarantee on (owner, logical id, revision)
        if self
            .revisions
            .compare_and_swap(key, None::<&[u8]>, Some(value))?
            .is_err()
        {
            return Err(UpdateError::DuplicateRevision {
                logical_id: *stored.logical_id(),
                revision_number: stored.revision_number(),
            });
        }
        let created = stored.creation_date().nanos().unwrap_or(i64::MAX);
        self.meta.fetch_and_update(LAST_CREATED_KEY, |previous| {
            let previous = previous.and_then(read_nanos).unwrap_or(i64::MIN);
            Some(previous.max(created).to_be_bytes().to_vec())
        })?;
        self.instance.flush()?;

        debug!(
            storage_id = stored.storage_id(),
            logical_id = %stored.logical_id(),
            revision = stored.revision_number(),
            "revision appended"
        );
        Ok(stored)
    }

    fn find_latest(&self, owner_id: &str, logical_id: &LogicalId) -> Result<Option<Revision>> {
        match self
            .revisions
            .scan_prefix(update_prefix(owner_id, logical_id))
            .next_back()
        {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(Self::decode(&value)?))
            }
            None => Ok(None),
        }
    }

    fn history(&self, owner_id: &str, logical_id: &LogicalId) -> Result<Vec<Revision>> {
        Self::decode_all(self.revisions.scan_prefix(update_prefix(owner_id, logical_id)))
    }

    fn scan(&self, owner_id: Option<&str>) -> Result<Vec<Revision>> {
        match owner_id {
            Some(owner_id) => Self::decode_all(self.revisions.scan_prefix(owner_prefix(owner_id))),
            None => Self::decode_all(self.revisions.iter()),
        }
    }

    fn scan_latest(
        &self,
        after: Option<&ScanCursor>,
        limit: usize,
        keep: &dyn Fn(&Revision) -> bool,
    ) -> Result<LatestScan> {
        let limit = limit.max(1);
        let mut lower = after.map(|cursor| past_update(&cursor.0));
        let mut scan = LatestScan::default();

        loop {
            let first = match &lower {
                Some(bound) => self.revisions.range(bound.as_slice()..).next(),
                None => self.revisions.iter().next(),
            };
            let Some(entry) = first else {
                break;
            };
            let (key, _) = entry?;
            let prefix = key
                .get(..UPDATE_PREFIX_LEN)
                .ok_or_else(|| minicbor::decode::Error::message("revision key is too short"))?
                .to_vec();
            lower = Some(past_update(&prefix));

            // revision numbers are big endian, so the run's last key is the latest
            let Some(entry) = self.revisions.scan_prefix(&prefix).next_back() else {
                continue;
            };
            let (_, value) = entry?;
            let revision = Self::decode(&value)?;
            if keep(&revision) {
                scan.revisions.push(revision);
                if scan.revisions.len() == limit {
                    scan.resume_after = Some(ScanCursor(prefix));
                    break;
                }
            }
        }

        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::UpdateDraft;
    use crate::status::UpdateStatus;
    use tempfile::tempdir;

    fn temp_store() -> (tempfile::TempDir, SledRevisionStore) {
        let dir = tempdir().unwrap();
        let store = SledRevisionStore::open(dir.path().join("store.db")).unwrap();
        (dir, store)
    }

    fn draft(owner: &str) -> UpdateDraft {
        UpdateDraft::new(owner, "firmware", "pkg-1")
    }

    #[test]
    fn duplicate_revision_number_is_rejected() {
        let (_dir, store) = temp_store();
        let id = LogicalId::new();

        store.append(NewRevision::new(id, 1, draft("user"))).unwrap();
        let second = store.append(NewRevision::new(id, 1, draft("user").set_status(UpdateStatus::Published)));

        assert!(matches!(
            second,
            Err(UpdateError::DuplicateRevision { revision_number: 1, .. })
        ));
        assert_eq!(store.history("user", &id).unwrap().len(), 1);
    }

    #[test]
    fn find_latest_returns_highest_revision_in_owner_scope() {
        let (_dir, store) = temp_store();
        let id = LogicalId::new();

        for n in 1..=3 {
            store.append(NewRevision::new(id, n, draft("user"))).unwrap();
        }
        // same logical id under another owner is a different update
        store.append(NewRevision::new(id, 1, draft("other"))).unwrap();

        let latest = store.find_latest("user", &id).unwrap().unwrap();
        assert_eq!(latest.revision_number(), 3);
        assert_eq!(store.find_latest("other", &id).unwrap().unwrap().revision_number(), 1);
        assert!(store.find_latest("nobody", &id).unwrap().is_none());
    }

    #[test]
    fn creation_dates_strictly_increase() {
        let (_dir, store) = temp_store();
        let id = LogicalId::new();

        let dates: Vec<_> = (1..=20)
            .map(|n| store.append(NewRevision::new(id, n, draft("user"))).unwrap().creation_date())
            .collect();

        assert!(dates.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn creation_dates_continue_after_the_stored_high_mark() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        let ahead = TimeStamp::now().nanos().unwrap() + 3_600_000_000_000;

        {
            let store = SledRevisionStore::open(&path).unwrap();
            store.append(NewRevision::new(LogicalId::new(), 1, draft("user"))).unwrap();
            // a previous run whose clock was an hour ahead
            store.meta.insert(LAST_CREATED_KEY, ahead.to_be_bytes().to_vec()).unwrap();
        }

        let store = SledRevisionStore::open(&path).unwrap();
        let next = store.append(NewRevision::new(LogicalId::new(), 1, draft("user"))).unwrap();
        assert!(next.creation_date().nanos().unwrap() > ahead);
    }

    #[test]
    fn scan_latest_reads_one_revision_per_update_and_resumes() {
        let (_dir, store) = temp_store();
        let mut ids = Vec::new();
        for owner in ["a", "b", "c"] {
            for _ in 0..2 {
                let id = LogicalId::new();
                for n in 1..=3 {
                    store.append(NewRevision::new(id, n, draft(owner))).unwrap();
                }
                ids.push(id);
            }
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let scan = store.scan_latest(cursor.as_ref(), 4, &|_: &Revision| true).unwrap();
            assert!(scan.revisions.len() <= 4);
            assert!(scan.revisions.iter().all(|r| r.revision_number() == 3));
            seen.extend(scan.revisions.iter().map(|r| *r.logical_id()));
            match scan.resume_after {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        seen.sort();
        ids.sort();
        assert_eq!(seen, ids);
    }

    #[test]
    fn scan_latest_only_counts_kept_revisions() {
        let (_dir, store) = temp_store();
        for n in 0..6 {
            let status = if n % 2 == 0 { UpdateStatus::Published } else { UpdateStatus::Draft };
            store
                .append(NewRevision::new(LogicalId::new(), 1, draft("user").set_status(status)))
                .unwrap();
        }

        let scan = store
            .scan_latest(None, 10, &|r: &Revision| r.status() == UpdateStatus::Published)
            .unwrap();
        assert_eq!(scan.revisions.len(), 3);
        assert!(scan.resume_after.is_none());
    }

    #[test]
    fn scan_respects_owner_scope() {
        let (_dir, store) = temp_store();

        store.append(NewRevision::new(LogicalId::new(), 1, draft("a"))).unwrap();
        store.append(NewRevision::new(LogicalId::new(), 1, draft("ab"))).unwrap();
        store.append(NewRevision::new(LogicalId::new(), 1, draft("ab"))).unwrap();

        assert_eq!(store.scan(Some("a")).unwrap().len(), 1);
        assert_eq!(store.scan(Some("ab")).unwrap().len(), 2);
        assert_eq!(store.scan(None).unwrap().len(), 3);
    }
}
