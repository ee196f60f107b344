//! Append-only update revisions.
//!
//! Updates are never modified in place: each change appends a revision with
//! the next revision number, and reads resolve the latest revision of each
//! logical update. A status table gates which revisions may be appended, and
//! a periodic sweep publishes scheduled updates once they are due.

pub mod config;
pub mod engine;
pub mod error;
pub mod projector;
pub mod publisher;
pub mod revision;
pub mod status;
pub mod store;
pub mod types;
pub mod utils;

pub use engine::RevisionEngine;
pub use error::{UpdateError, ValidationError};
pub use projector::{LatestProjector, ListQuery, Page};
pub use publisher::SchedulePublisher;
pub use revision::{Revision, UpdateDraft};
pub use status::UpdateStatus;
pub use store::{RevisionStore, SledRevisionStore};
pub use types::{LogicalId, TimeStamp};
