use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{block::BlockNumber, intent::SyncTarget};

/// The engine's in-memory status. Unlike [`crate::intent::SyncStatus`], this
/// distinguishes the failure and recovery states the resume record doesn't
/// need to know about -- the record only ever says running or idle.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EngineStatus {
    Running,
    Recovering,
    Cancelled,
    Failed,
    Completed,
}

impl EngineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineStatus::Cancelled | EngineStatus::Failed | EngineStatus::Completed
        )
    }
}

/// A snapshot of the single running engine, as returned by `GET /sync/status`.
///
/// At most one of these exists per process.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineState {
    pub id: String,
    pub status: EngineStatus,
    pub sync_from: BlockNumber,
    pub sync_to: SyncTarget,
    pub current_block: BlockNumber,
    pub processed_blocks: u64,
    pub cancel_requested: bool,
    pub complete_current_block: bool,
    pub is_continuous: bool,
    pub original_target: SyncTarget,
    pub critical_error: Option<String>,
}

impl EngineState {
    pub fn new(id: String, sync_from: BlockNumber, sync_to: SyncTarget, is_continuous: bool) -> Self {
        Self {
            id,
            status: EngineStatus::Running,
            sync_from,
            sync_to,
            current_block: sync_from,
            processed_blocks: 0,
            cancel_requested: false,
            complete_current_block: false,
            is_continuous,
            original_target: sync_to,
            critical_error: None,
        }
    }
}
