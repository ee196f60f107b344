//! Revision records and the drafts they are built from
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::status::UpdateStatus;
use crate::types::{LogicalId, TimeStamp};

/// Open property bag carried through untouched.
pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub enum PropertyValue {
    #[n(0)]
    Null,
    #[n(1)]
    Bool(#[n(0)] bool),
    #[n(2)]
    Integer(#[n(0)] i64),
    #[n(3)]
    Float(#[n(0)] f64),
    #[n(4)]
    String(#[n(0)] String),
    #[n(5)]
    List(#[n(0)] Vec<PropertyValue>),
    #[n(6)]
    Map(#[n(0)] Properties),
}

/// Client side content of an update, the input to create and revise calls.
///
/// Carries no revision number, storage id or creation date: those are only
/// ever assigned by the engine and the store.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDraft {
    logical_id: Option<LogicalId>,
    owner_id: String,
    name: String,
    description: Option<String>,
    package_id: String,
    segment_id: Option<String>,
    additional_properties: Properties,
    status: UpdateStatus,
    scheduled_date: Option<TimeStamp>,
}

/// A revision about to be appended. The store adds identity and creation date.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRevision {
    logical_id: LogicalId,
    owner_id: String,
    revision_number: u32,
    name: String,
    description: Option<String>,
    package_id: String,
    segment_id: Option<String>,
    additional_properties: Properties,
    status: UpdateStatus,
    scheduled_date: Option<TimeStamp>,
}

/// One immutable, stored snapshot of a logical update.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Revision {
    #[n(0)]
    storage_id: String,
    #[n(1)]
    logical_id: LogicalId,
    #[n(2)]
    owner_id: String,
    #[n(3)]
    revision_number: u32,
    #[n(4)]
    name: String,
    #[n(5)]
    description: Option<String>,
    #[n(6)]
    package_id: String,
    #[n(7)]
    segment_id: Option<String>,
    #[n(8)]
    additional_properties: Properties,
    #[n(9)]
    status: UpdateStatus,
    #[n(10)]
    scheduled_date: Option<TimeStamp>,
    #[n(11)]
    creation_date: TimeStamp,
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}
impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}
impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}
impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}
impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl PropertyValue {
    fn kind_rank(&self) -> u8 {
        match self {
            PropertyValue::Null => 0,
            PropertyValue::Bool(_) => 1,
            PropertyValue::Integer(_) => 2,
            PropertyValue::Float(_) => 3,
            PropertyValue::String(_) => 4,
            PropertyValue::List(_) => 5,
            PropertyValue::Map(_) => 6,
        }
    }

    /// Total order used when sorting on properties. Values of different kinds
    /// order by kind (null, bool, integer, float, string, list, map), so an
    /// integer never equals a float. Floats use [`f64::total_cmp`].
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a.cmp(b),
            (PropertyValue::Integer(a), PropertyValue::Integer(b)) => a.cmp(b),
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.total_cmp(b),
            (PropertyValue::String(a), PropertyValue::String(b)) => a.cmp(b),
            (PropertyValue::List(a), PropertyValue::List(b)) => {
                lexicographic(a.iter(), b.iter(), |x, y| x.total_cmp(y))
            }
            (PropertyValue::Map(a), PropertyValue::Map(b)) => compare_properties(a, b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

/// Entry by entry in key order, a shorter map first when it is a prefix.
pub fn compare_properties(a: &Properties, b: &Properties) -> Ordering {
    lexicographic(a.iter(), b.iter(), |(key_a, value_a), (key_b, value_b)| {
        key_a.cmp(key_b).then_with(|| value_a.total_cmp(value_b))
    })
}

fn lexicographic<T>(
    mut a: impl Iterator<Item = T>,
    mut b: impl Iterator<Item = T>,
    compare: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match compare(&x, &y) {
                Ordering::Equal => continue,
                ordering => return ordering,
            },
        }
    }
}

impl UpdateDraft {
    /// Construct a draft with the required fields, status defaults to DRAFT
    pub fn new(owner_id: &str, name: &str, package_id: &str) -> Self {
        Self {
            logical_id: None,
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            description: None,
            package_id: package_id.to_string(),
            segment_id: None,
            additional_properties: Properties::new(),
            status: UpdateStatus::Draft,
            scheduled_date: None,
        }
    }
    pub fn with_logical_id(mut self, logical_id: LogicalId) -> Self {
        self.logical_id = Some(logical_id);
        self
    }
    pub fn set_owner_id(mut self, owner_id: &str) -> Self {
        self.owner_id = owner_id.to_string();
        self
    }
    pub fn set_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
    pub fn set_package_id(mut self, package_id: &str) -> Self {
        self.package_id = package_id.to_string();
        self
    }
    pub fn set_segment_id(mut self, segment_id: &str) -> Self {
        self.segment_id = Some(segment_id.to_string());
        self
    }
    pub fn clear_segment_id(mut self) -> Self {
        self.segment_id = None;
        self
    }
    pub fn set_status(mut self, status: UpdateStatus) -> Self {
        self.status = status;
        self
    }
    pub fn set_scheduled_date(mut self, date: TimeStamp) -> Self {
        self.scheduled_date = Some(date);
        self
    }
    pub fn clear_scheduled_date(mut self) -> Self {
        self.scheduled_date = None;
        self
    }
    pub fn insert_property(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.additional_properties.insert(key.to_string(), value.into());
        self
    }
    pub fn set_additional_properties(mut self, properties: Properties) -> Self {
        self.additional_properties = properties;
        self
    }

    pub fn logical_id(&self) -> Option<&LogicalId> {
        self.logical_id.as_ref()
    }
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
    pub fn status(&self) -> UpdateStatus {
        self.status
    }
    /// The scheduled date as it will be stored: only kept for SCHEDULED drafts.
    pub fn scheduled_date(&self) -> Option<TimeStamp> {
        match self.status {
            UpdateStatus::Scheduled => self.scheduled_date,
            _ => None,
        }
    }

    /// Field checks normally done before a draft reaches the engine.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owner_id.trim().is_empty() {
            return Err(ValidationError::Blank("userId"));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::Blank("name"));
        }
        if self.package_id.trim().is_empty() {
            return Err(ValidationError::Blank("packageId"));
        }
        if self.status == UpdateStatus::Scheduled && self.scheduled_date.is_none() {
            return Err(ValidationError::MissingScheduledDate);
        }

        Ok(())
    }
}

impl NewRevision {
    /// Takes content and status from the draft. Any logical id on the draft is
    /// ignored in favour of `logical_id`, and a scheduled date is dropped
    /// unless the status is SCHEDULED.
    pub fn new(logical_id: LogicalId, revision_number: u32, draft: UpdateDraft) -> Self {
        let scheduled_date = draft.scheduled_date();

        Self {
            logical_id,
            owner_id: draft.owner_id,
            revision_number,
            name: draft.name,
            description: draft.description,
            package_id: draft.package_id,
            segment_id: draft.segment_id,
            additional_properties: draft.additional_properties,
            status: draft.status,
            scheduled_date,
        }
    }
    pub fn logical_id(&self) -> &LogicalId {
        &self.logical_id
    }
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
    pub fn revision_number(&self) -> u32 {
        self.revision_number
    }
    pub fn status(&self) -> UpdateStatus {
        self.status
    }

    /// Stamp the store assigned fields onto the revision.
    pub fn into_revision(self, storage_id: String, creation_date: TimeStamp) -> Revision {
        Revision {
            storage_id,
            logical_id: self.logical_id,
            owner_id: self.owner_id,
            revision_number: self.revision_number,
            name: self.name,
            description: self.description,
            package_id: self.package_id,
            segment_id: self.segment_id,
            additional_properties: self.additional_properties,
            status: self.status,
            scheduled_date: self.scheduled_date,
            creation_date,
        }
    }
}

impl Revision {
    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }
    pub fn logical_id(&self) -> &LogicalId {
        &self.logical_id
    }
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
    pub fn revision_number(&self) -> u32 {
        self.revision_number
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
    pub fn package_id(&self) -> &str {
        &self.package_id
    }
    pub fn segment_id(&self) -> Option<&str> {
        self.segment_id.as_deref()
    }
    pub fn additional_properties(&self) -> &Properties {
        &self.additional_properties
    }
    pub fn status(&self) -> UpdateStatus {
        self.status
    }
    pub fn scheduled_date(&self) -> Option<TimeStamp> {
        self.scheduled_date
    }
    pub fn creation_date(&self) -> TimeStamp {
        self.creation_date
    }

    /// Scheduled, with a scheduled date strictly before `now`.
    pub fn is_due(&self, now: TimeStamp) -> bool {
        self.status == UpdateStatus::Scheduled
            && self.scheduled_date.is_some_and(|date| date < now)
    }

    /// A draft carrying this revision's content, the starting point of a revise.
    pub fn to_draft(&self) -> UpdateDraft {
        UpdateDraft {
            logical_id: Some(self.logical_id),
            owner_id: self.owner_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            package_id: self.package_id.clone(),
            segment_id: self.segment_id.clone(),
            additional_properties: self.additional_properties.clone(),
            status: self.status,
            scheduled_date: self.scheduled_date,
        }
    }
}
