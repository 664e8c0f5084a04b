//! The block-replay engine core: retry executor, health monitor, RPC
//! facade, resume record, the engine state machine itself, the recovery
//! coordinator, the tip-follower, and the command surface.
//!
//! This crate has no knowledge of HTTP or the process environment -- those
//! live in the `replay-node` binary crate.

pub mod adapter;
pub mod command_surface;
pub mod engine;
pub mod health;
pub mod recovery;
pub mod resume;
pub mod retry_executor;
pub mod rpc;
pub mod startup;
pub mod tip_follower;

pub use command_surface::CommandSurface;
pub use engine::{BlockReplayEngine, EngineHandle};
pub use health::TargetHealthMonitor;
pub use recovery::RecoveryCoordinator;
pub use resume::ResumeRecordStore;
pub use rpc::{HttpRpcFacade, NodeAccess, RpcFacade};
pub use startup::{recover as recover_startup, ResumeDirective};
