use serde::{Deserialize, Serialize};

use crate::{hash::Hash32, transaction::Transaction};

pub type BlockNumber = u64;
pub type BlockHash = Hash32;

/// A block tag accepted by `getBlock`, mirroring the Starknet RPC tag set.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockTag {
    Latest,
    PreConfirmed,
    L1Accepted,
}

/// One denomination pair: wei (L1-native) and fri (L2-native, STRK).
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct GasPrice {
    pub wei: u128,
    pub fri: u128,
}

impl GasPrice {
    /// Parses a `(wei_hex, fri_hex)` pair as returned by the source node.
    pub fn from_hex(wei_hex: &str, fri_hex: &str) -> anyhow::Result<Self> {
        Ok(Self {
            wei: parse_hex_u128(wei_hex)?,
            fri: parse_hex_u128(fri_hex)?,
        })
    }
}

fn parse_hex_u128(s: &str) -> anyhow::Result<u128> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    Ok(u128::from_str_radix(stripped, 16)?)
}

/// The three gas lanes a custom block header carries: L1, L1-data, and L2.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct GasPrices {
    pub l1_gas: GasPrice,
    pub l1_data_gas: GasPrice,
    pub l2_gas: GasPrice,
}

/// The header fields the engine stamps onto the target's pre-confirmed block.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: BlockNumber,
    pub parent_hash: BlockHash,
    pub timestamp: u64,
    pub gas_prices: GasPrices,
}

/// A block as read from either node.
///
/// `block_hash` is `None` for a pre-confirmed (not yet finalized) block and
/// `Some` for a finalized one -- callers should use [`BlockDescriptor::is_finalized`]
/// rather than matching on this directly, since the invariant may be
/// strengthened later (e.g. to carry a state root) without changing callers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub header: BlockHeader,
    pub block_hash: Option<BlockHash>,
    pub transactions: Vec<Transaction>,
}

impl BlockDescriptor {
    pub fn is_finalized(&self) -> bool {
        self.block_hash.is_some()
    }

    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    pub fn transaction_hashes(&self) -> Vec<Hash32> {
        self.transactions.iter().map(|t| t.hash).collect()
    }
}
