//! Startup recovery: on process start, reconciles the on-disk resume record
//! with the two nodes' actual state before the engine re-enters its loop.
//!
//! Never trusts the record as authoritative proof of consistency, only as a
//! statement of intent -- it always re-checks the two nodes agree before
//! resuming. The record is advisory, not authoritative.

use replay_types::{BlockNumber, ReplayError, SyncTarget};

use crate::{
    resume::ResumeRecordStore,
    rpc::{Node, RpcFacade},
};

/// What the engine should resume with, once startup recovery has validated
/// the two nodes agree at the target's current height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResumeDirective {
    pub sync_from: BlockNumber,
    pub sync_to: SyncTarget,
    pub is_continuous: bool,
}

/// Reads the resume record and decides what to do, per §4.9 and §4.10's
/// `CLEAN_SLATE` flag.
///
/// - `clean_slate`: the resume record is reset to idle regardless of its
///   on-disk contents, and this returns `Ok(None)` -- the process parks
///   awaiting a fresh `start` command (§4.10).
/// - record says idle or is missing/corrupt: `Ok(None)`, same as above.
/// - record says running: validates the two nodes agree at the target's
///   latest-accepted height and returns a directive to resume from there.
pub async fn recover<F: RpcFacade + ?Sized>(
    facade: &F,
    resume: &ResumeRecordStore,
    clean_slate: bool,
) -> Result<Option<ResumeDirective>, ReplayError> {
    if clean_slate {
        tracing::info!("CLEAN_SLATE set, resetting resume record and skipping startup recovery");
        let _ = resume.write_idle().await;
        return Ok(None);
    }

    let intent = resume.read().await;
    if !intent.is_running() {
        tracing::info!("resume record is idle, parking for a start command");
        return Ok(None);
    }

    let l = facade.get_latest_accepted(Node::Target).await?;
    let target_block = facade.get_block(Node::Target, l).await?;
    let source_block = facade.get_block(Node::Source, l).await?;

    let (Some(target_hash), Some(source_hash)) = (target_block.block_hash, source_block.block_hash) else {
        return Err(ReplayError::InvalidBlock(format!(
            "block {l} is not finalized on both nodes, cannot validate resume"
        )));
    };
    if target_hash != source_hash {
        tracing::error!(block = l, %target_hash, %source_hash, "startup recovery: block-hash mismatch, aborting resume");
        return Err(ReplayError::HashMismatch { block: l, source_hash, target_hash });
    }
    if target_block.header.parent_hash != source_block.header.parent_hash {
        tracing::error!(
            block = l,
            target_parent = %target_block.header.parent_hash,
            source_parent = %source_block.header.parent_hash,
            "startup recovery: parent-hash mismatch, aborting resume"
        );
        return Err(ReplayError::InvalidBlock(format!(
            "parent-hash mismatch at block {l}: target {} source {}",
            target_block.header.parent_hash, source_block.header.parent_hash
        )));
    }

    let sync_to = match intent.sync_to {
        Some(SyncTarget::Latest) => SyncTarget::Block(facade.get_latest_accepted(Node::Source).await?),
        Some(block @ SyncTarget::Block(_)) => block,
        None => SyncTarget::Block(l + 1),
    };

    tracing::info!(resume_from = l + 1, ?sync_to, is_continuous = intent.is_continuous, "startup recovery validated, resuming engine");
    Ok(Some(ResumeDirective { sync_from: l + 1, sync_to, is_continuous: intent.is_continuous }))
}
