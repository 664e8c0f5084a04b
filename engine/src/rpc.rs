//! RPC facade: a thin, typed wrapper over the source and target JSON-RPC
//! endpoints plus the target's admin surface.
//!
//! Wraps a URL plus an inner HTTP client, logging the URL on every request,
//! and classifies transport errors so callers can tell a dead endpoint from
//! a merely slow one.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use replay_types::{
    BlockDescriptor, BlockHash, BlockHeader, BlockNumber, BlockTag, ReplayError, Transaction, TransactionHash,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::{adapter::AdapterDispatchTable, health::HealthProbe};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Node {
    Source,
    Target,
}

/// The receipt for one transaction, as returned by `getReceipt` and as an
/// element of `getBlockWithReceipts`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: TransactionHash,
    pub execution_status: String,
}

impl Receipt {
    /// §4.3: "Any other value is an error." -- this only tells the caller
    /// whether the status is one of the two recognized values; what to do
    /// about an unrecognized one is the engine's call (DESIGN.md, Open
    /// Question 1).
    pub fn has_recognized_status(&self) -> bool {
        matches!(self.execution_status.as_str(), "SUCCEEDED" | "REVERTED")
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct BlockReceipts {
    pub number: BlockNumber,
    pub receipts: Vec<Receipt>,
}

/// The RPC facade's full surface (§4.3). `admin_inject` is the one method
/// whose implementation is entirely delegated to the adapter seam
/// (§4.13) -- the facade itself never constructs a transaction payload.
#[async_trait]
pub trait RpcFacade: Send + Sync {
    async fn get_block(&self, node: Node, number: BlockNumber) -> Result<BlockDescriptor, ReplayError>;
    async fn get_block_by_tag(&self, node: Node, tag: BlockTag) -> Result<BlockDescriptor, ReplayError>;
    async fn get_latest_accepted(&self, node: Node) -> Result<BlockNumber, ReplayError>;
    async fn admin_set_custom_header(
        &self,
        header: &BlockHeader,
        expected_block_hash: BlockHash,
    ) -> Result<(), ReplayError>;
    async fn admin_close_block(&self) -> Result<(), ReplayError>;
    async fn admin_inject(&self, tx: &Transaction) -> Result<TransactionHash, ReplayError>;
    async fn get_receipt(&self, hash: TransactionHash) -> Result<Receipt, ReplayError>;
    async fn get_block_with_receipts(&self, number: BlockNumber) -> Result<BlockReceipts, ReplayError>;
}

/// JSON-RPC 2.0 over HTTP, the production facade.
pub struct HttpRpcFacade {
    http: reqwest::Client,
    source_url: Url,
    target_url: Url,
    target_admin_url: Url,
    target_health_url: Url,
    adapters: AdapterDispatchTable,
}

impl HttpRpcFacade {
    pub fn new(source_url: Url, target_url: Url, target_admin_url: Url, adapters: AdapterDispatchTable) -> Self {
        let target_health_url = target_url.join("/health").unwrap_or_else(|_| target_url.clone());
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with static config"),
            source_url,
            target_url,
            target_admin_url,
            target_health_url,
            adapters,
        }
    }

    fn url_for(&self, node: Node) -> &Url {
        match node {
            Node::Source => &self.source_url,
            Node::Target => &self.target_url,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        url: &Url,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ReplayError> {
        #[derive(Deserialize)]
        struct JsonRpcError {
            message: String,
        }

        #[derive(Deserialize)]
        struct JsonRpcResponse<T> {
            result: Option<T>,
            error: Option<JsonRpcError>,
        }

        tracing::debug!(url = %url, method, "rpc call");
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self.http.post(url.clone()).json(&body).send().await.map_err(classify_reqwest_error)?;
        let parsed: JsonRpcResponse<T> = response.json().await.map_err(classify_reqwest_error)?;
        match (parsed.result, parsed.error) {
            (Some(result), _) => Ok(result),
            (None, Some(err)) => Err(ReplayError::Transport(format!("{method}: {}", err.message))),
            (None, None) => Err(ReplayError::Transport(format!("{method}: empty response"))),
        }
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> ReplayError {
    if err.is_connect() || err.is_timeout() {
        ReplayError::TargetDown(err.to_string())
    } else {
        replay_types::error::classify_transport_error(&err.to_string())
    }
}

#[async_trait]
impl RpcFacade for HttpRpcFacade {
    async fn get_block(&self, node: Node, number: BlockNumber) -> Result<BlockDescriptor, ReplayError> {
        self.call(self.url_for(node), "starknet_getBlockWithTxs", json!({ "block_id": { "block_number": number } }))
            .await
    }

    async fn get_block_by_tag(&self, node: Node, tag: BlockTag) -> Result<BlockDescriptor, ReplayError> {
        let tag_param = match tag {
            replay_types::BlockTag::Latest => "latest",
            replay_types::BlockTag::PreConfirmed => "pre_confirmed",
            replay_types::BlockTag::L1Accepted => "l1_accepted",
        };
        self.call(self.url_for(node), "starknet_getBlockWithTxs", json!({ "block_id": tag_param })).await
    }

    async fn get_latest_accepted(&self, node: Node) -> Result<BlockNumber, ReplayError> {
        self.call(self.url_for(node), "starknet_blockNumber", json!([])).await
    }

    async fn admin_set_custom_header(
        &self,
        header: &BlockHeader,
        expected_block_hash: BlockHash,
    ) -> Result<(), ReplayError> {
        self.call(
            &self.target_admin_url,
            "setCustomBlockHeader",
            json!({
                "block_n": header.number,
                "timestamp": header.timestamp,
                "gas_prices": {
                    "eth_l1": format!("0x{:x}", header.gas_prices.l1_gas.wei),
                    "strk_l1": format!("0x{:x}", header.gas_prices.l1_gas.fri),
                    "eth_l1_data": format!("0x{:x}", header.gas_prices.l1_data_gas.wei),
                    "strk_l1_data": format!("0x{:x}", header.gas_prices.l1_data_gas.fri),
                    "eth_l2": format!("0x{:x}", header.gas_prices.l2_gas.wei),
                    "strk_l2": format!("0x{:x}", header.gas_prices.l2_gas.fri),
                },
                "expected_block_hash": expected_block_hash.to_string(),
            }),
        )
        .await
    }

    async fn admin_close_block(&self) -> Result<(), ReplayError> {
        self.call(&self.target_admin_url, "closeBlock", json!([])).await
    }

    async fn admin_inject(&self, tx: &Transaction) -> Result<TransactionHash, ReplayError> {
        self.adapters.inject(tx).await
    }

    async fn get_receipt(&self, hash: TransactionHash) -> Result<Receipt, ReplayError> {
        self.call(&self.target_url, "starknet_getTransactionReceipt", json!({ "transaction_hash": hash.to_string() }))
            .await
    }

    async fn get_block_with_receipts(&self, number: BlockNumber) -> Result<BlockReceipts, ReplayError> {
        self.call(&self.target_url, "starknet_getBlockWithReceipts", json!({ "block_id": { "block_number": number } }))
            .await
    }
}

#[async_trait]
impl HealthProbe for HttpRpcFacade {
    async fn probe(&self) -> bool {
        let Ok(response) = self.http.get(self.target_health_url.clone()).timeout(Duration::from_secs(5)).send().await
        else {
            return false;
        };
        if response.status() != reqwest::StatusCode::OK {
            return false;
        }
        matches!(response.text().await, Ok(body) if body == "OK")
    }
}

/// Everything the engine needs from "the two nodes": the typed RPC surface
/// plus the ability to answer a health probe. One object implements both so
/// the engine can hold a single `Arc<dyn NodeAccess>` instead of two.
pub trait NodeAccess: RpcFacade + HealthProbe {}
impl<T: RpcFacade + HealthProbe> NodeAccess for T {}

/// Test/in-process fakes, used by the engine, recovery, and resume-record
/// tests so they don't need a real Starknet node.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::{collections::HashMap, sync::Mutex};

    use replay_types::{BlockHeader, GasPrices};

    use super::*;

    #[derive(Debug, Clone)]
    pub struct FakeNodeState {
        pub blocks: Vec<BlockDescriptor>,
        pub pre_confirmed: Option<BlockDescriptor>,
        pub down: bool,
    }

    impl FakeNodeState {
        pub fn empty() -> Self {
            Self { blocks: Vec::new(), pre_confirmed: None, down: false }
        }
    }

    /// An in-memory stand-in for both nodes: source is a fixed, finalized
    /// chain; target is built up by the facade calls the engine makes.
    pub struct FakeRpcFacade {
        pub source: Mutex<FakeNodeState>,
        pub target: Mutex<FakeNodeState>,
        pub inject_log: Mutex<Vec<TransactionHash>>,
        pub receipts: Mutex<HashMap<TransactionHash, Receipt>>,
        pub fail_next_inject: Mutex<Option<ReplayError>>,
    }

    impl FakeRpcFacade {
        pub fn new() -> Self {
            Self {
                source: Mutex::new(FakeNodeState::empty()),
                target: Mutex::new(FakeNodeState::empty()),
                inject_log: Mutex::new(Vec::new()),
                receipts: Mutex::new(HashMap::new()),
                fail_next_inject: Mutex::new(None),
            }
        }

        pub fn seed_source_block(&self, block: BlockDescriptor) {
            self.source.lock().unwrap().blocks.push(block);
        }

        pub fn set_target_down(&self, down: bool) {
            self.target.lock().unwrap().down = down;
        }
    }

    impl Default for FakeRpcFacade {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RpcFacade for FakeRpcFacade {
        async fn get_block(&self, node: Node, number: BlockNumber) -> Result<BlockDescriptor, ReplayError> {
            let state = match node {
                Node::Source => self.source.lock().unwrap(),
                Node::Target => self.target.lock().unwrap(),
            };
            if state.down {
                return Err(ReplayError::TargetDown("fake target down".into()));
            }
            state
                .blocks
                .iter()
                .find(|b| b.number() == number)
                .cloned()
                .or_else(|| state.pre_confirmed.clone().filter(|b| b.number() == number))
                .ok_or_else(|| ReplayError::InvalidBlock(format!("no block {number}")))
        }

        async fn get_block_by_tag(&self, node: Node, tag: BlockTag) -> Result<BlockDescriptor, ReplayError> {
            let state = match node {
                Node::Source => self.source.lock().unwrap(),
                Node::Target => self.target.lock().unwrap(),
            };
            if state.down {
                return Err(ReplayError::TargetDown("fake target down".into()));
            }
            match tag {
                BlockTag::PreConfirmed => state
                    .pre_confirmed
                    .clone()
                    .ok_or_else(|| ReplayError::InvalidBlock("no pre-confirmed block".into())),
                BlockTag::Latest | BlockTag::L1Accepted => {
                    state.blocks.last().cloned().ok_or_else(|| ReplayError::InvalidBlock("no blocks yet".into()))
                }
            }
        }

        async fn get_latest_accepted(&self, node: Node) -> Result<BlockNumber, ReplayError> {
            let state = match node {
                Node::Source => self.source.lock().unwrap(),
                Node::Target => self.target.lock().unwrap(),
            };
            if state.down {
                return Err(ReplayError::TargetDown("fake target down".into()));
            }
            Ok(state.blocks.last().map(|b| b.number()).unwrap_or(0))
        }

        async fn admin_set_custom_header(
            &self,
            header: &BlockHeader,
            _expected_block_hash: BlockHash,
        ) -> Result<(), ReplayError> {
            let mut target = self.target.lock().unwrap();
            if target.down {
                return Err(ReplayError::TargetDown("fake target down".into()));
            }
            target.pre_confirmed = Some(BlockDescriptor {
                header: header.clone(),
                block_hash: None,
                transactions: Vec::new(),
            });
            Ok(())
        }

        async fn admin_close_block(&self) -> Result<(), ReplayError> {
            let mut target = self.target.lock().unwrap();
            if target.down {
                return Err(ReplayError::TargetDown("fake target down".into()));
            }
            let mut pre = target.pre_confirmed.take().ok_or_else(|| ReplayError::InvalidBlock("nothing to close".into()))?;
            let source = self.source.lock().unwrap();
            let source_block = source.blocks.iter().find(|b| b.number() == pre.header.number).cloned();
            pre.block_hash = source_block.and_then(|b| b.block_hash).or(Some(replay_types::Hash32::default()));
            target.blocks.push(pre);
            Ok(())
        }

        async fn admin_inject(&self, tx: &Transaction) -> Result<TransactionHash, ReplayError> {
            if let Some(err) = self.fail_next_inject.lock().unwrap().take() {
                return Err(err);
            }
            {
                let mut target = self.target.lock().unwrap();
                if target.down {
                    return Err(ReplayError::TargetDown("fake target down".into()));
                }
                let pre = target.pre_confirmed.as_mut().ok_or_else(|| ReplayError::InvalidBlock("no pre-confirmed block".into()))?;
                pre.transactions.push(tx.clone());
            }
            self.inject_log.lock().unwrap().push(tx.hash);
            self.receipts
                .lock()
                .unwrap()
                .insert(tx.hash, Receipt { transaction_hash: tx.hash, execution_status: "SUCCEEDED".into() });
            Ok(tx.hash)
        }

        async fn get_receipt(&self, hash: TransactionHash) -> Result<Receipt, ReplayError> {
            self.receipts.lock().unwrap().get(&hash).cloned().ok_or_else(|| ReplayError::InvalidBlock("no receipt".into()))
        }

        async fn get_block_with_receipts(&self, number: BlockNumber) -> Result<BlockReceipts, ReplayError> {
            let target = self.target.lock().unwrap();
            if target.down {
                return Err(ReplayError::TargetDown("fake target down".into()));
            }
            let block = target
                .blocks
                .iter()
                .find(|b| b.number() == number)
                .cloned()
                .ok_or_else(|| ReplayError::InvalidBlock(format!("no block {number}")))?;
            drop(target);
            let receipts_guard = self.receipts.lock().unwrap();
            let receipts = block
                .transactions
                .iter()
                .map(|tx| {
                    receipts_guard
                        .get(&tx.hash)
                        .cloned()
                        .unwrap_or(Receipt { transaction_hash: tx.hash, execution_status: "SUCCEEDED".into() })
                })
                .collect();
            Ok(BlockReceipts { number, receipts })
        }
    }

    #[async_trait]
    impl HealthProbe for FakeRpcFacade {
        async fn probe(&self) -> bool {
            !self.target.lock().unwrap().down
        }
    }

    pub fn gas_prices_fixture() -> GasPrices {
        GasPrices::default()
    }

    /// A minimal finalized block at height `n`, for seeding a fake source
    /// chain in tests that only care about `get_latest_accepted`.
    pub fn gas_prices_fixture_block(n: BlockNumber) -> BlockDescriptor {
        BlockDescriptor {
            header: BlockHeader { number: n, parent_hash: replay_types::Hash32::default(), timestamp: n, gas_prices: gas_prices_fixture() },
            block_hash: Some(replay_types::Hash32([n as u8; 32])),
            transactions: Vec::new(),
        }
    }
}
