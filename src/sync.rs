//! Startup chain synchronization
//!
//! After initial discovery the client polls every connected peer for
//! its height, picks the tallest, and pulls the missing suffix in
//! batches of 100 through the normal `chain.add_block` path. A peer
//! that drops mid-range is abandoned and the next candidate is tried.

use crate::network::{NetworkHandle, PeerSet, SyncRequest, SyncResponse, SYNC_BATCH_LIMIT};
use libp2p::PeerId;
use shadowy_core::Chain;
use shared::{NodeError, Result};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Polls peers and catches the local chain up to the tallest one
///
/// # Errors
///
/// Returns the last error only when every candidate peer failed;
/// an up-to-date chain is a success
pub async fn initial_sync(
    network: &NetworkHandle,
    peers: &Arc<PeerSet>,
    chain: &Arc<Chain>,
) -> Result<()> {
    let candidates = peer_ids(peers);
    if candidates.is_empty() {
        debug!("no peers available, skipping initial sync");
        return Ok(());
    }

    // Heights first: the tallest peer drives the catch-up
    let mut ranked: Vec<(PeerId, u64)> = Vec::new();
    for peer in candidates {
        match network.sync_request(peer, SyncRequest::Height).await {
            Ok(SyncResponse::Height { height }) => ranked.push((peer, height)),
            Ok(_) => warn!(%peer, "unexpected sync response to height query"),
            Err(err) => debug!(%peer, error = %err, "height query failed"),
        }
    }
    ranked.sort_by_key(|(_, height)| std::cmp::Reverse(*height));

    let local = chain.height();
    let Some(&(_, best_height)) = ranked.first() else {
        return Ok(());
    };
    if best_height <= local {
        info!(local, "chain already up to date");
        return Ok(());
    }

    let mut last_error = None;
    for (peer, peer_height) in ranked {
        if peer_height <= chain.height() {
            continue;
        }
        match pull_from(network, chain, peer, peer_height).await {
            Ok(()) => {
                info!(height = chain.height(), "initial sync complete");
                return Ok(());
            }
            Err(err) => {
                warn!(%peer, error = %err, "sync source failed, trying next peer");
                last_error = Some(err);
            }
        }
    }

    match last_error {
        Some(err) if chain.height() < best_height => Err(err),
        _ => Ok(()),
    }
}

/// Pulls `(local, target]` from one peer in bounded batches
async fn pull_from(
    network: &NetworkHandle,
    chain: &Arc<Chain>,
    peer: PeerId,
    target: u64,
) -> Result<()> {
    let mut start = chain.height() + 1;

    while start <= target {
        let end = target.min(start + SYNC_BATCH_LIMIT - 1);
        let response = network
            .sync_request(peer, SyncRequest::Blocks { start, end })
            .await?;

        let SyncResponse::Blocks { blocks } = response else {
            return Err(NodeError::NetworkError(
                "unexpected sync response to block range".to_string(),
            ));
        };
        if blocks.is_empty() {
            return Err(NodeError::StreamClosed(format!(
                "peer returned empty range {start}..{end}"
            )));
        }

        for block in blocks {
            // Skip blocks another source already delivered
            if chain.has_block(block.index, &block.hash) {
                continue;
            }
            let height = block.index;
            chain.add_block(block)?;
            debug!(height, "synced block");
        }
        start = chain.height() + 1;
    }

    Ok(())
}

fn peer_ids(peers: &Arc<PeerSet>) -> Vec<PeerId> {
    peers
        .all()
        .iter()
        .filter_map(|id| PeerId::from_str(id).ok())
        .collect()
}
