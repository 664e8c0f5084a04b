use chrono::{DateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::block::BlockNumber;

/// The engine's declared intent, as persisted to the resume record.
///
/// This is deliberately a small, flat, forward-compatible shape: any field
/// this process doesn't recognize on read is ignored (see
/// [`crate::intent::SyncIntent`]'s `Deserialize` impl, which is plain
/// `serde` field-by-field rather than `deny_unknown_fields`).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Idle,
}

/// The end of the range the engine is driving toward: a concrete height, or
/// the literal `"latest"`.
///
/// `#[serde(untagged)]` would serialize the unit variant as JSON `null`
/// rather than the string the wire format and the resume-record schema both
/// require, so this carries a hand-written `Serialize`/`Deserialize` instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncTarget {
    Block(BlockNumber),
    Latest,
}

impl SyncTarget {
    pub fn as_block(&self) -> Option<BlockNumber> {
        match self {
            SyncTarget::Block(n) => Some(*n),
            SyncTarget::Latest => None,
        }
    }
}

impl Serialize for SyncTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SyncTarget::Block(n) => serializer.serialize_u64(*n),
            SyncTarget::Latest => serializer.serialize_str("latest"),
        }
    }
}

impl<'de> Deserialize<'de> for SyncTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(BlockNumber),
            Tag(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(SyncTarget::Block(n)),
            Repr::Tag(s) if s.eq_ignore_ascii_case("latest") => Ok(SyncTarget::Latest),
            Repr::Tag(s) => Err(D::Error::custom(format!("invalid sync target {s:?}, expected a block number or \"latest\""))),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SyncIntent {
    pub status: SyncStatus,
    pub sync_to: Option<SyncTarget>,
    pub is_continuous: bool,
    pub updated_at: DateTime<Utc>,
}

impl SyncIntent {
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Idle,
            sync_to: None,
            is_continuous: false,
            updated_at: now,
        }
    }

    pub fn running(sync_to: SyncTarget, is_continuous: bool, now: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Running,
            sync_to: Some(sync_to),
            is_continuous,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SyncStatus::Running
    }
}

impl Default for SyncIntent {
    /// Equivalent to a missing or corrupt resume record (§4.4: "reads are
    /// best-effort; missing/corrupt file is equivalent to `status=idle`").
    fn default() -> Self {
        Self::idle(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn latest_round_trips_as_the_literal_string() {
        let json = serde_json::to_string(&SyncTarget::Latest).unwrap();
        assert_eq!(json, "\"latest\"");
        assert_eq!(serde_json::from_str::<SyncTarget>(&json).unwrap(), SyncTarget::Latest);
    }

    #[test]
    fn block_round_trips_as_a_bare_number() {
        let json = serde_json::to_string(&SyncTarget::Block(42)).unwrap();
        assert_eq!(json, "42");
        assert_eq!(serde_json::from_str::<SyncTarget>(&json).unwrap(), SyncTarget::Block(42));
    }

    #[test]
    fn rejects_other_strings() {
        assert!(serde_json::from_str::<SyncTarget>("\"soon\"").is_err());
    }
}
