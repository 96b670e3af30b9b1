//! Vehicle status definitions for the vehicle ledger

use std::fmt;

/// Lifecycle status of a tracked vehicle
///
/// ```text
/// unseen -> active                (first successful parse)
/// active -> active                (reconfirmed, hash unchanged or updated)
/// active -> unavailable           (absent from a full-mode run)
/// unavailable -> active           (reappears later)
/// ```
///
/// Records are never physically deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleStatus {
    /// Seen in the source by the latest run that looked for it
    Active,

    /// Absent from a full-mode run; kept for history
    Unavailable,
}

impl VehicleStatus {
    /// Returns true if moving from `self` to `to` is a legal transition
    ///
    /// Only `unavailable -> unavailable` is rejected: a record must be active
    /// before it can disappear.
    pub fn can_transition_to(&self, to: VehicleStatus) -> bool {
        !matches!((self, to), (Self::Unavailable, Self::Unavailable))
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Unavailable => "unavailable",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "unavailable" => Some(Self::Unavailable),
            _ => None,
        }
    }

    pub fn all_statuses() -> Vec<Self> {
        vec![Self::Active, Self::Unavailable]
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
