use crate::hash::BlockHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A position on the chain, used for intersection and rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Point {
    Origin,
    Specific { slot: u64, hash: BlockHash },
}

impl Point {
    pub fn slot(&self) -> u64 {
        match self {
            Point::Origin => 0,
            Point::Specific { slot, .. } => *slot,
        }
    }

    pub fn hash(&self) -> Option<&BlockHash> {
        match self {
            Point::Origin => None,
            Point::Specific { hash, .. } => Some(hash),
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Point::Origin => write!(f, "origin"),
            Point::Specific { slot, hash } => write!(f, "{slot}@{hash}"),
        }
    }
}
