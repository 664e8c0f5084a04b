use serde::{Deserialize, Serialize};
use strum::Display;

use crate::hash::Hash32;

pub type TransactionHash = Hash32;

/// One of the four Starknet transaction shapes. Payload interpretation is
/// entirely the concern of the adapter layer; the engine only needs the tag
/// to route `adminInject` to the right adapter.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    Invoke,
    Declare,
    DeployAccount,
    L1Handler,
}

/// Transaction versions 0 through 3 are in play across the chain's history;
/// not every `(type, version)` pair is meaningful (e.g. there is no
/// `l1_handler` v3 on most networks) but the engine does not enforce that --
/// the adapter dispatch table does, by simply having no entry for it.
pub type TransactionVersion = u8;

/// An opaque transaction as read from the source block.
///
/// The engine never looks inside `payload`; it is handed verbatim to the
/// adapter selected by `(kind, version)`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Transaction {
    pub hash: TransactionHash,
    pub kind: TransactionType,
    pub version: TransactionVersion,
    pub payload: serde_json::Value,
}

/// `(type, version)` tag used to key the adapter dispatch table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransactionTag {
    pub kind: TransactionType,
    pub version: TransactionVersion,
}

impl Transaction {
    pub fn tag(&self) -> TransactionTag {
        TransactionTag {
            kind: self.kind,
            version: self.version,
        }
    }
}
