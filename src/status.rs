//! Update status values and the table of legal status changes.
//!
//! A revise call may only move an update from its current status to one of the
//! statuses listed for it here. DRAFT and SCHEDULED accept themselves as a
//! target, PUBLISHED does not.
use std::fmt;
use std::str::FromStr;

use crate::error::UpdateError;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Published,
    #[n(2)]
    Archived,
    #[n(3)]
    Scheduled,
}

/// The statuses reachable from one status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCompatibility {
    pub status: UpdateStatus,
    pub compatibilities: Vec<UpdateStatus>,
}

impl UpdateStatus {
    /// Declaration order, also the order of [`all_compatibilities`].
    pub const ALL: [UpdateStatus; 4] = [
        UpdateStatus::Draft,
        UpdateStatus::Published,
        UpdateStatus::Archived,
        UpdateStatus::Scheduled,
    ];

    /// Lowercase literal used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            UpdateStatus::Draft => "draft",
            UpdateStatus::Published => "published",
            UpdateStatus::Archived => "archived",
            UpdateStatus::Scheduled => "scheduled",
        }
    }

    /// Maps a literal back to a status. Matching is exact.
    pub fn parse(literal: &str) -> Result<Self, UpdateError> {
        Self::ALL
            .into_iter()
            .find(|status| status.name() == literal)
            .ok_or_else(|| UpdateError::UnknownStatusLiteral(literal.to_string()))
    }

    pub fn compatible_targets(&self) -> &'static [UpdateStatus] {
        match self {
            UpdateStatus::Draft => &[
                UpdateStatus::Draft,
                UpdateStatus::Published,
                UpdateStatus::Scheduled,
            ],
            UpdateStatus::Scheduled => &[
                UpdateStatus::Scheduled,
                UpdateStatus::Draft,
                UpdateStatus::Published,
                UpdateStatus::Archived,
            ],
            UpdateStatus::Published => &[UpdateStatus::Archived],
            UpdateStatus::Archived => &[UpdateStatus::Published],
        }
    }

    pub fn is_compatible(&self, to: UpdateStatus) -> bool {
        self.compatible_targets().contains(&to)
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UpdateStatus {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

pub fn compatibility_for(status: UpdateStatus) -> StatusCompatibility {
    StatusCompatibility {
        status,
        compatibilities: status.compatible_targets().to_vec(),
    }
}

pub fn all_compatibilities() -> Vec<StatusCompatibility> {
    UpdateStatus::ALL.into_iter().map(compatibility_for).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use UpdateStatus::*;

    #[test]
    fn table_matches_expected_targets() {
        let mut from_draft = Draft.compatible_targets().to_vec();
        from_draft.sort_by_key(|s| s.name());
        assert_eq!(from_draft, vec![Draft, Published, Scheduled]);

        assert_eq!(Published.compatible_targets(), &[Archived]);
        assert_eq!(Archived.compatible_targets(), &[Published]);
        assert_eq!(Scheduled.compatible_targets().len(), 4);
    }

    #[test]
    fn published_cannot_republish_but_draft_can_resave() {
        assert!(!Published.is_compatible(Published));
        assert!(Draft.is_compatible(Draft));
        assert!(Scheduled.is_compatible(Scheduled));
        assert!(!Draft.is_compatible(Archived));
        assert!(!Archived.is_compatible(Draft));
    }

    #[test]
    fn parse_accepts_every_literal() {
        for status in UpdateStatus::ALL {
            assert_eq!(UpdateStatus::parse(status.name()).unwrap(), status);
            assert_eq!(status.to_string().parse::<UpdateStatus>().unwrap(), status);
        }
    }

    #[test]
    fn parse_rejects_unknown_and_uppercase() {
        assert!(matches!(
            UpdateStatus::parse("coucou"),
            Err(UpdateError::UnknownStatusLiteral(s)) if s == "coucou"
        ));
        assert!(UpdateStatus::parse("PUBLISHED").is_err());
    }

    #[test]
    fn compatibilities_cover_all_statuses_in_order() {
        let all = all_compatibilities();
        let statuses: Vec<_> = all.iter().map(|c| c.status).collect();
        assert_eq!(statuses, UpdateStatus::ALL.to_vec());
        assert_eq!(all[1].compatibilities, vec![Archived]);
    }
}
