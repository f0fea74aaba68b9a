use serde::{Deserialize, Serialize};

/// Resumable progress of a projection
///
/// `position` is the last sequence number applied; `state` is an opaque blob
/// owned by the projection logic. Returned by a successful acquire and written
/// back by a persist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionState {
    pub position: i64,
    pub state: Vec<u8>,
}

impl ProjectionState {
    pub fn new(position: i64, state: Vec<u8>) -> Self {
        Self { position, state }
    }
}

/// Read-only view of a projection row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionStatus {
    pub position: i64,
    pub locked: bool,
}
