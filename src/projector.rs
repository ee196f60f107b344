//! Current-state views over the revision log.
//!
//! Every query runs the same pipeline: reduce all revisions in scope to the
//! latest one per logical update, then filter, then sort, then paginate.
//! Filters never see historical revisions, so an update that was published and
//! is now archived does not match a `published` filter.
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::revision::{Revision, compare_properties};
use crate::status::UpdateStatus;
use crate::store::{RevisionStore, ScanCursor};
use crate::types::{LogicalId, TimeStamp};

/// Segment literal selecting updates without a segment.
pub const OTHER_SEGMENT: &str = "other";
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Identity of a logical update, ordered by owner then logical id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateKey {
    pub owner_id: String,
    pub logical_id: LogicalId,
}

impl UpdateKey {
    pub fn of(revision: &Revision) -> Self {
        Self {
            owner_id: revision.owner_id().to_string(),
            logical_id: *revision.logical_id(),
        }
    }
}

/// Keep only the highest revision number of each logical update.
///
/// Output is ordered by [`UpdateKey`].
pub fn project_latest(revisions: impl IntoIterator<Item = Revision>) -> Vec<Revision> {
    let mut latest: BTreeMap<UpdateKey, Revision> = BTreeMap::new();

    for revision in revisions {
        let key = UpdateKey::of(&revision);
        match latest.get(&key) {
            Some(current) if current.revision_number() >= revision.revision_number() => {}
            _ => {
                latest.insert(key, revision);
            }
        }
    }

    latest.into_values().collect()
}

/// Accepted statuses; empty accepts all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFilter(Vec<UpdateStatus>);

impl StatusFilter {
    pub fn any() -> Self {
        Self::default()
    }
    pub fn only(status: UpdateStatus) -> Self {
        Self(vec![status])
    }
    /// Fails on the first literal that names no status.
    pub fn parse<I, S>(literals: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let statuses = literals
            .into_iter()
            .map(|literal| UpdateStatus::parse(literal.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(statuses))
    }
    pub fn matches(&self, revision: &Revision) -> bool {
        self.0.is_empty() || self.0.contains(&revision.status())
    }
}

/// Union of segment conditions; empty accepts all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentFilter {
    segment_ids: Vec<String>,
    include_default: bool,
}

impl SegmentFilter {
    pub fn any() -> Self {
        Self::default()
    }
    /// [`OTHER_SEGMENT`] selects the default segment, anything else an exact id.
    pub fn from_literals<I, S>(literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::default();
        for literal in literals {
            match literal.as_ref() {
                OTHER_SEGMENT => filter.include_default = true,
                id => filter.segment_ids.push(id.to_string()),
            }
        }
        filter
    }
    fn is_unrestricted(&self) -> bool {
        self.segment_ids.is_empty() && !self.include_default
    }
    pub fn matches(&self, revision: &Revision) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        match revision.segment_id() {
            None => self.include_default,
            Some(id) => self.segment_ids.iter().any(|wanted| wanted == id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    StorageId,
    LogicalId,
    OwnerId,
    Name,
    Description,
    PackageId,
    SegmentId,
    RevisionNumber,
    CreationDate,
    Status,
    ScheduledDate,
    AdditionalProperties,
}

impl SortField {
    /// Accepts wire names and field names.
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "id" | "storageId" | "storage_id" => SortField::StorageId,
            "uuid" | "logicalId" | "logical_id" => SortField::LogicalId,
            "userId" | "ownerId" | "owner_id" => SortField::OwnerId,
            "name" => SortField::Name,
            "description" => SortField::Description,
            "packageId" | "package_id" => SortField::PackageId,
            "segmentId" | "segment_id" => SortField::SegmentId,
            "revisionId" | "revisionNumber" | "revision_number" => SortField::RevisionNumber,
            "creationDate" | "creation_date" => SortField::CreationDate,
            "status" => SortField::Status,
            "scheduledDate" | "scheduled_date" => SortField::ScheduledDate,
            "additionalProperties" | "additional_properties" => SortField::AdditionalProperties,
            _ => return None,
        };
        Some(field)
    }

    fn compare(&self, a: &Revision, b: &Revision) -> Ordering {
        match self {
            SortField::StorageId => a.storage_id().cmp(b.storage_id()),
            SortField::LogicalId => a.logical_id().cmp(b.logical_id()),
            SortField::OwnerId => a.owner_id().cmp(b.owner_id()),
            SortField::Name => a.name().cmp(b.name()),
            SortField::Description => a.description().cmp(&b.description()),
            SortField::PackageId => a.package_id().cmp(b.package_id()),
            SortField::SegmentId => a.segment_id().cmp(&b.segment_id()),
            SortField::RevisionNumber => a.revision_number().cmp(&b.revision_number()),
            SortField::CreationDate => a.creation_date().cmp(&b.creation_date()),
            SortField::Status => a.status().name().cmp(b.status().name()),
            SortField::ScheduledDate => a.scheduled_date().cmp(&b.scheduled_date()),
            SortField::AdditionalProperties => {
                compare_properties(a.additional_properties(), b.additional_properties())
            }
        }
    }
}

/// Requested ordering, by field name. Unknown names are dropped with a warning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort {
    orders: Vec<(String, Direction)>,
}

impl Sort {
    pub const FALLBACK: (SortField, Direction) = (SortField::CreationDate, Direction::Desc);

    pub fn unsorted() -> Self {
        Self::default()
    }
    pub fn by(field: &str, direction: Direction) -> Self {
        Self::unsorted().then(field, direction)
    }
    pub fn then(mut self, field: &str, direction: Direction) -> Self {
        self.orders.push((field.to_string(), direction));
        self
    }

    fn resolve(&self) -> Vec<(SortField, Direction)> {
        let resolved: Vec<_> = self
            .orders
            .iter()
            .filter_map(|(name, direction)| match SortField::from_name(name) {
                Some(field) => Some((field, *direction)),
                None => {
                    warn!(sort_field = %name, "You can't sort updates using {name}");
                    None
                }
            })
            .collect();

        if resolved.is_empty() {
            vec![Self::FALLBACK]
        } else {
            resolved
        }
    }
}

fn compare_by(orders: &[(SortField, Direction)], a: &Revision, b: &Revision) -> Ordering {
    orders
        .iter()
        .map(|(field, direction)| match direction {
            Direction::Asc => field.compare(a, b),
            Direction::Desc => field.compare(b, a),
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| UpdateKey::of(a).cmp(&UpdateKey::of(b)))
}

/// Zero-based page number and page size. A size of 0 is raised to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: usize,
    size: usize,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size: size.max(1),
        }
    }
    pub fn page(&self) -> usize {
        self.page
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn skip(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches before pagination.
    pub total_count: usize,
    pub page: usize,
    pub size: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        self.total_count.div_ceil(self.size.max(1))
    }
    pub fn has_next(&self) -> bool {
        self.page.saturating_add(1) < self.total_pages()
    }
}

/// Parameters of [`LatestProjector::list_latest`], as received from a client.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    statuses: Vec<String>,
    segments: Vec<String>,
    sort: Sort,
    page: PageRequest,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn status(mut self, literal: &str) -> Self {
        self.statuses.push(literal.to_string());
        self
    }
    pub fn segment(mut self, literal: &str) -> Self {
        self.segments.push(literal.to_string());
        self
    }
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }
    pub fn page(mut self, page: usize, size: usize) -> Self {
        self.page = PageRequest::new(page, size);
        self
    }
}

/// One batch of the scheduled sweep.
#[derive(Debug, Clone)]
pub struct ScheduledBatch {
    pub items: Vec<Revision>,
    /// Where the next batch starts, `None` once the sequence is exhausted.
    /// A full batch always carries one, even when nothing follows it.
    pub resume_after: Option<ScanCursor>,
}

impl ScheduledBatch {
    pub fn has_more(&self) -> bool {
        self.resume_after.is_some()
    }
}

pub struct LatestProjector<S> {
    store: Arc<S>,
}

impl<S: RevisionStore> LatestProjector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn latest_in_scope(&self, owner_id: Option<&str>) -> Result<Vec<Revision>> {
        let revisions = self.store.scan(owner_id)?;
        let scanned = revisions.len();
        let latest = project_latest(revisions);
        debug!(owner_id, scanned, updates = latest.len(), "projected latest revisions");
        Ok(latest)
    }

    /// Filtered, sorted and paginated current state of an owner's updates.
    pub fn list_latest(&self, owner_id: &str, query: &ListQuery) -> Result<Page<Revision>> {
        let statuses = StatusFilter::parse(&query.statuses)?;
        let segments = SegmentFilter::from_literals(&query.segments);
        let orders = query.sort.resolve();

        let mut matching: Vec<Revision> = self
            .latest_in_scope(Some(owner_id))?
            .into_iter()
            .filter(|revision| statuses.matches(revision) && segments.matches(revision))
            .collect();
        matching.sort_by(|a, b| compare_by(&orders, a, b));

        let total_count = matching.len();
        let items = matching
            .into_iter()
            .skip(query.page.skip())
            .take(query.page.size())
            .collect();

        Ok(Page {
            items,
            total_count,
            page: query.page.page(),
            size: query.page.size(),
        })
    }

    fn latest_published_where(
        &self,
        owner_id: &str,
        segment: impl Fn(Option<&str>) -> bool,
    ) -> Result<Option<Revision>> {
        Ok(self
            .latest_in_scope(Some(owner_id))?
            .into_iter()
            .filter(|revision| {
                revision.status() == UpdateStatus::Published && segment(revision.segment_id())
            })
            .max_by(|a, b| {
                a.creation_date()
                    .cmp(&b.creation_date())
                    .then_with(|| a.logical_id().cmp(b.logical_id()))
            }))
    }

    /// Most recently created update currently published to `segment_id`.
    pub fn latest_published_by_segment(
        &self,
        owner_id: &str,
        segment_id: &str,
    ) -> Result<Option<Revision>> {
        self.latest_published_where(owner_id, |segment| segment == Some(segment_id))
    }

    /// Same as [`Self::latest_published_by_segment`] for updates without a segment.
    pub fn latest_published_default_segment(&self, owner_id: &str) -> Result<Option<Revision>> {
        self.latest_published_where(owner_id, |segment| segment.is_none())
    }

    fn scheduled_where(
        &self,
        after: Option<&ScanCursor>,
        batch_size: usize,
        keep: &dyn Fn(&Revision) -> bool,
    ) -> Result<ScheduledBatch> {
        let scan = self.store.scan_latest(after, batch_size, keep)?;
        debug!(
            items = scan.revisions.len(),
            more = scan.resume_after.is_some(),
            "scheduled batch scanned"
        );

        Ok(ScheduledBatch {
            items: scan.revisions,
            resume_after: scan.resume_after,
        })
    }

    /// One batch of updates, across all owners, that are currently scheduled
    /// with a scheduled date before `instant`, in store key order.
    ///
    /// At most `batch_size` revisions are held at a time, whatever the size of
    /// the log.
    pub fn scheduled_due_before(
        &self,
        instant: TimeStamp,
        after: Option<&ScanCursor>,
        batch_size: usize,
    ) -> Result<ScheduledBatch> {
        self.scheduled_where(after, batch_size, &|revision: &Revision| revision.is_due(instant))
    }

    /// One batch of updates, across all owners, whose current status is
    /// SCHEDULED, due or not.
    pub fn scheduled(&self, after: Option<&ScanCursor>, batch_size: usize) -> Result<ScheduledBatch> {
        self.scheduled_where(after, batch_size, &|revision: &Revision| {
            revision.status() == UpdateStatus::Scheduled
        })
    }

    /// Lazy sequence over [`Self::scheduled_due_before`], fetching a batch at a time.
    pub fn scheduled_due(&self, instant: TimeStamp, batch_size: usize) -> ScheduledDue<'_, S> {
        ScheduledDue {
            projector: self,
            instant,
            batch_size,
            buffer: VecDeque::new(),
            resume_after: None,
            exhausted: false,
        }
    }
}

pub struct ScheduledDue<'a, S> {
    projector: &'a LatestProjector<S>,
    instant: TimeStamp,
    batch_size: usize,
    buffer: VecDeque<Revision>,
    resume_after: Option<ScanCursor>,
    exhausted: bool,
}

impl<S: RevisionStore> Iterator for ScheduledDue<'_, S> {
    type Item = Result<Revision>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.projector.scheduled_due_before(
                self.instant,
                self.resume_after.as_ref(),
                self.batch_size,
            ) {
                Ok(batch) => {
                    self.exhausted = !batch.has_more();
                    self.resume_after = batch.resume_after;
                    self.buffer.extend(batch.items);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
