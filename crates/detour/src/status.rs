//! Status codes for Detour operations
//!
//! A status combines one high level outcome (success, failure, in progress)
//! with detail bits describing what happened along the way.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Result type for Detour operations. The error is always a failure status.
pub type Result<T> = std::result::Result<T, Status>;

/// Bitmask status returned by navigation mesh operations
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct Status(u32);

impl Status {
    /// Operation failed
    pub const FAILURE: Status = Status(1 << 31);
    /// Operation succeeded
    pub const SUCCESS: Status = Status(1 << 30);
    /// Operation still in progress
    pub const IN_PROGRESS: Status = Status(1 << 29);

    /// Mask of the detail bits
    pub const DETAIL_MASK: u32 = 0x0ff_ffff;
    /// Input data is not recognized
    pub const WRONG_MAGIC: Status = Status(1 << 0);
    /// Input data is in wrong version
    pub const WRONG_VERSION: Status = Status(1 << 1);
    /// Operation ran out of memory
    pub const OUT_OF_MEMORY: Status = Status(1 << 2);
    /// An input parameter was invalid
    pub const INVALID_PARAM: Status = Status(1 << 3);
    /// Result buffer for the query was too small to store all results
    pub const BUFFER_TOO_SMALL: Status = Status(1 << 4);
    /// Query ran out of nodes during search
    pub const OUT_OF_NODES: Status = Status(1 << 5);
    /// Query did not reach the end location, returning best guess
    pub const PARTIAL_RESULT: Status = Status(1 << 6);
    /// A tile has already been assigned to the given x,y coordinate
    pub const ALREADY_OCCUPIED: Status = Status(1 << 7);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Failure carrying the given detail bits
    pub const fn failure(detail: Status) -> Self {
        Self(Self::FAILURE.0 | (detail.0 & Self::DETAIL_MASK))
    }

    /// Success carrying the given detail bits
    pub const fn success(detail: Status) -> Self {
        Self(Self::SUCCESS.0 | (detail.0 & Self::DETAIL_MASK))
    }

    pub fn is_success(self) -> bool {
        self.0 & Self::SUCCESS.0 != 0
    }

    pub fn is_failure(self) -> bool {
        self.0 & Self::FAILURE.0 != 0
    }

    pub fn is_in_progress(self) -> bool {
        self.0 & Self::IN_PROGRESS.0 != 0
    }

    /// Returns true if all bits of `detail` are set
    pub fn has_detail(self, detail: Status) -> bool {
        detail.0 & Self::DETAIL_MASK != 0 && self.0 & detail.0 == detail.0
    }

    /// The detail bits alone
    pub fn detail(self) -> Status {
        Status(self.0 & Self::DETAIL_MASK)
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        self.0 |= rhs.0;
    }
}

const DETAIL_NAMES: [(Status, &str); 8] = [
    (Status::WRONG_MAGIC, "wrong magic"),
    (Status::WRONG_VERSION, "wrong version"),
    (Status::OUT_OF_MEMORY, "out of memory"),
    (Status::INVALID_PARAM, "invalid param"),
    (Status::BUFFER_TOO_SMALL, "buffer too small"),
    (Status::OUT_OF_NODES, "out of nodes"),
    (Status::PARTIAL_RESULT, "partial result"),
    (Status::ALREADY_OCCUPIED, "already occupied"),
];

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "success")?;
        } else if self.is_failure() {
            write!(f, "failure")?;
        } else if self.is_in_progress() {
            write!(f, "in progress")?;
        } else {
            write!(f, "unknown")?;
        }

        let details: Vec<&str> = DETAIL_NAMES
            .iter()
            .filter(|(d, _)| self.has_detail(*d))
            .map(|(_, name)| *name)
            .collect();
        if !details.is_empty() {
            write!(f, " ({})", details.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({:#010x}: {})", self.0, self)
    }
}

impl std::error::Error for Status {}

impl From<std::io::Error> for Status {
    fn from(_: std::io::Error) -> Self {
        Status::failure(Status::INVALID_PARAM)
    }
}

impl From<Status> for recast_common::Error {
    fn from(status: Status) -> Self {
        recast_common::Error::Detour(status.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_flags() {
        assert!(Status::SUCCESS.is_success());
        assert!(!Status::SUCCESS.is_failure());

        let failure = Status::failure(Status::INVALID_PARAM);
        assert!(failure.is_failure());
        assert!(failure.has_detail(Status::INVALID_PARAM));
        assert!(!failure.has_detail(Status::OUT_OF_NODES));

        assert!(Status::IN_PROGRESS.is_in_progress());
        assert!(!Status::IN_PROGRESS.is_success());
    }

    #[test]
    fn test_combined_details() {
        let mut status = Status::SUCCESS;
        status |= Status::PARTIAL_RESULT;
        status |= Status::OUT_OF_NODES;
        assert!(status.is_success());
        assert!(status.has_detail(Status::PARTIAL_RESULT));
        assert!(status.has_detail(Status::OUT_OF_NODES));
        assert_eq!(status.detail(), Status::PARTIAL_RESULT | Status::OUT_OF_NODES);
        assert_eq!(Status::success(status.detail()), status);
    }

    #[test]
    fn test_outcome_is_not_a_detail() {
        assert!(!Status::FAILURE.has_detail(Status::FAILURE));
        assert!(!Status::SUCCESS.has_detail(Status::from_bits(0)));
    }

    #[test]
    fn test_display() {
        let s = Status::failure(Status::WRONG_MAGIC).to_string();
        assert_eq!(s, "failure (wrong magic)");
        let err: recast_common::Error = Status::failure(Status::WRONG_VERSION).into();
        assert!(err.to_string().contains("wrong version"));
    }
}
