//! Proxy session handler: drives one connected peer, classifying inbound
//! records and applying the unified ACK-emission policy before forwarding
//! or enqueuing for the opposite side.

use crate::endpoint::{Side, SideChannels};
use crate::hl7;
use crate::mllp;
use crate::peer::PeerHandle;
use crate::queue::ForwardOutcome;
use crate::settings::{ProxyDirection, Settings};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::ReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error on peer stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a session task needs besides the stream it owns.
pub struct SessionContext {
    pub side: Side,
    pub direction: ProxyDirection,
    pub settings: Arc<Settings>,
    /// This side's own current-stream/queue pair, so the session can clear
    /// itself to `None` on disconnect.
    pub own: Arc<SideChannels>,
    /// The opposite side's current-stream/queue pair, the forwarding target.
    pub opposite: Arc<SideChannels>,
}

/// When a locally-generated ACK is written, relative to forwarding the
/// record that triggered it. A function of proxy direction and which side
/// the record arrived on; see §4.4/§4.5 policy description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckTiming {
    /// Written back to the sender before any forwarding is attempted.
    Now,
    /// Written back only once the record has actually landed on the far
    /// side's stream (not merely enqueued).
    AfterForward,
    /// The far side was unavailable at arrival time; the ACK obligation
    /// travels with the enqueued record and fires when the drain delivers
    /// it.
    Deferred,
}

/// `(proxy_direction, source_side, destination_connected)` → when the local
/// ACK fires. Policy A (`ListenerToClient`) always ACKs immediately on both
/// sides. Policy B (`ClientToListener`) ACKs the LIS immediately but only
/// ACKs the analyzer once its record has actually reached (or been queued
/// for) the LIS.
pub fn ack_timing(direction: ProxyDirection, source: Side, destination_connected: bool) -> AckTiming {
    match (direction, source) {
        (ProxyDirection::ListenerToClient, _) => AckTiming::Now,
        (ProxyDirection::ClientToListener, Side::Lis) => AckTiming::Now,
        (ProxyDirection::ClientToListener, Side::Analyzer) => {
            if destination_connected {
                AckTiming::AfterForward
            } else {
                AckTiming::Deferred
            }
        }
    }
}

/// Forward `payload` to `destination`, honoring the ordering rule: if the
/// destination's queue is already non-empty, append rather than writing
/// directly, so earlier-queued records always precede this one on the
/// wire. Re-frames the payload on every write path, whether direct or
/// drained, since the original MLLP framing is not reused.
///
/// The empty-check and the direct write are one atomic step inside
/// [`RetryQueue::forward_or_enqueue`] — not a separate check followed by a
/// separate write — so a concurrent drain step can't pop an entry, and
/// then lose a race to have this (newer) record land on the wire first.
/// See that method's doc comment for why the race exists without this.
async fn forward_to(destination: &SideChannels, payload: Vec<u8>, ack_owed: bool) -> ForwardOutcome {
    let peer = destination.current();
    destination
        .queue
        .forward_or_enqueue(payload, ack_owed, |payload| async move {
            match &peer {
                Some(peer) => {
                    let result = peer.write_framed(&mllp::frame(&payload)).await;
                    if let Err(e) = &result {
                        warn!(error=%e, "direct forward failed, requeuing at head");
                    }
                    result
                }
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "destination has no current peer",
                )),
            }
        })
        .await
}

async fn write_local_ack(own_peer: &PeerHandle, incoming: &[u8], settings: &Settings) {
    let ack_text = hl7::build_ack(incoming, settings);
    if own_peer
        .write_framed(&mllp::frame(ack_text.as_bytes()))
        .await
        .is_err()
    {
        // Per the error-handling policy: local-ACK write failures are
        // logged and the inbound record is not retried.
        warn!("local ack write failed; not retried");
    }
}

/// Classify and act on one non-ACK inbound record, per the unified
/// ACK-emission model. ACK-classified records never reach this function
/// (callers filter them out via [`hl7::is_ack`] beforehand).
async fn handle_application_message(
    payload: Vec<u8>,
    source: Side,
    direction: ProxyDirection,
    settings: &Settings,
    own_peer: &PeerHandle,
    opposite: &SideChannels,
) {
    let destination_connected = opposite.current().is_some();
    match ack_timing(direction, source, destination_connected) {
        AckTiming::Now => {
            write_local_ack(own_peer, &payload, settings).await;
            let _ = forward_to(opposite, payload, false).await;
        }
        AckTiming::AfterForward | AckTiming::Deferred => {
            let outcome = forward_to(opposite, payload.clone(), true).await;
            if matches!(outcome, ForwardOutcome::WrittenDirect) {
                write_local_ack(own_peer, &payload, settings).await;
            }
            // Enqueued: the ACK obligation travels with the queued record
            // and is emitted by the drain task on successful delivery.
        }
    }
}

/// Drive one connected peer until it disconnects or shutdown is signalled.
pub async fn run_session(
    mut read_half: ReadHalf<TcpStream>,
    own_peer: Arc<PeerHandle>,
    ctx: Arc<SessionContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
            }
            record = mllp::deframe(&mut read_half) => {
                match record {
                    Ok(Some(payload)) => {
                        if hl7::is_ack(&payload) {
                            debug!(side=?ctx.side, "dropping ack-classified inbound record");
                            continue;
                        }
                        handle_application_message(
                            payload,
                            ctx.side,
                            ctx.direction,
                            &ctx.settings,
                            &own_peer,
                            &ctx.opposite,
                        ).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error=%e, side=?ctx.side, "peer read failed");
                        break;
                    }
                }
            }
        }
    }

    // Only clear "current" if it still holds exactly this connection; a
    // newer connection may have already replaced it.
    ctx.own.current_tx.send_if_modified(|current| {
        if let Some(existing) = current {
            if Arc::ptr_eq(existing, &own_peer) {
                *current = None;
                return true;
            }
        }
        false
    });
}
