//! Anti-entropy between replicas.
//!
//! Each round, both sides exchange digests of their logged timestamps. The
//! first minute where the digests disagree bounds what is missing: each side
//! ships every record from that minute on, and the receiver observes the
//! newest timestamp before applying. Because apply is idempotent the
//! overlap is harmless, and one round is normally enough; a second round
//! confirms the digests match.

use crate::database::Database;
use crate::error::Result;
use crate::log::ApplyOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tkkt_core::{ChangeRecord, NodeId, Timestamp};
use tkkt_merkle::MerkleDigest;
use tracing::{debug, info, warn};

/// Opening message of a round: "this is what I have".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub node_id: NodeId,
    pub digest: MerkleDigest,
}

/// The records the responder holds from the divergent minute on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub node_id: NodeId,
    pub since: Option<DateTime<Utc>>,
    pub records: Vec<ChangeRecord>,
}

impl SyncRequest {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a request from the wire. The digest is checked when it is
    /// diffed, not here.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl SyncResponse {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Summary of a [`reconcile`] run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub rounds: usize,
    /// Records new to the remote side.
    pub sent: usize,
    /// Records new to the local side.
    pub received: usize,
    pub converged: bool,
}

/// One side of a reconciliation.
#[async_trait]
pub trait SyncPeer: Send + Sync {
    fn peer_id(&self) -> NodeId;

    /// Describe the local log.
    async fn sync_request(&self) -> Result<SyncRequest>;

    /// Answer a peer's request with everything it may be missing.
    async fn respond(&self, request: &SyncRequest) -> Result<SyncResponse>;

    /// Take in the records a peer sent.
    async fn receive(&self, response: SyncResponse) -> Result<ApplyOutcome>;
}

#[async_trait]
impl SyncPeer for Database {
    fn peer_id(&self) -> NodeId {
        self.node_id().clone()
    }

    async fn sync_request(&self) -> Result<SyncRequest> {
        Ok(SyncRequest {
            node_id: self.node_id().clone(),
            digest: self.digest().await?,
        })
    }

    async fn respond(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let ours = self.digest().await?;
        let since = ours.diff(&request.digest)?;
        let records = match since {
            Some(minute) => {
                let bound = Timestamp::wall_clock_prefix(minute.timestamp_millis().max(0) as u64);
                self.records_since(&bound).await?
            }
            None => Vec::new(),
        };
        debug!(
            node = %self.node_id(),
            peer = %request.node_id,
            since = ?since,
            records = records.len(),
            "answering sync request"
        );
        Ok(SyncResponse {
            node_id: self.node_id().clone(),
            since,
            records,
        })
    }

    async fn receive(&self, response: SyncResponse) -> Result<ApplyOutcome> {
        if let Some(newest) = response.records.iter().map(|r| &r.hlc).max() {
            self.observe(newest)?;
        }
        self.apply(response.records).await
    }
}

/// Exchange records between `local` and `remote` until their digests match
/// or `max_rounds` exchanges have run.
pub async fn reconcile<L, R>(local: &L, remote: &R, max_rounds: usize) -> Result<SyncReport>
where
    L: SyncPeer + ?Sized,
    R: SyncPeer + ?Sized,
{
    let mut report = SyncReport::default();

    for _ in 0..max_rounds.max(1) {
        let ours = local.sync_request().await?;
        let theirs = remote.sync_request().await?;
        if ours.digest.diff(&theirs.digest)?.is_none() {
            report.converged = true;
            break;
        }

        let to_remote = local.respond(&theirs).await?;
        let to_local = remote.respond(&ours).await?;
        report.sent += remote.receive(to_remote).await?.appended;
        report.received += local.receive(to_local).await?.appended;
        report.rounds += 1;
    }

    if !report.converged {
        let ours = local.sync_request().await?;
        let theirs = remote.sync_request().await?;
        report.converged = ours.digest.diff(&theirs.digest)?.is_none();
    }

    if report.converged {
        info!(
            local = %local.peer_id(),
            remote = %remote.peer_id(),
            rounds = report.rounds,
            sent = report.sent,
            received = report.received,
            "replicas reconciled"
        );
    } else {
        warn!(
            local = %local.peer_id(),
            remote = %remote.peer_id(),
            rounds = report.rounds,
            "replicas still diverge after max rounds"
        );
    }
    Ok(report)
}

impl Database {
    /// Reconcile with another replica using this replica's round limit.
    pub async fn sync_with<P: SyncPeer + ?Sized>(&self, peer: &P) -> Result<SyncReport> {
        reconcile(self, peer, self.max_sync_rounds()).await
    }
}
