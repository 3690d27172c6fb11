//! Endpoint connectors: the passive (listen) and active (dial) variants
//! that each own one side's current peer stream and retry queue.
//!
//! The "current stream" for a side is published through a `watch` channel
//! rather than a raw atomically-swapped pointer — readers `borrow()` a
//! single atomic snapshot instead of doing a separate "check non-null"
//! followed by a "write", which removes the race that check-then-act would
//! otherwise have against a concurrently replaced or cleared stream.

use crate::peer::PeerHandle;
use crate::queue::{DrainOutcome, RetryQueue};
use crate::session::{self, SessionContext};
use crate::settings::{ProxyDirection, Settings};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Which clinical role a connected peer plays, independent of whether the
/// proxy listens for it or dials out to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Analyzer,
    Lis,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Analyzer => Side::Lis,
            Side::Lis => Side::Analyzer,
        }
    }
}

/// The current-stream publisher and retry queue for one side of the proxy.
pub struct SideChannels {
    pub current_tx: watch::Sender<Option<Arc<PeerHandle>>>,
    pub current_rx: watch::Receiver<Option<Arc<PeerHandle>>>,
    pub queue: Arc<RetryQueue>,
}

impl SideChannels {
    pub fn new() -> Self {
        let (current_tx, current_rx) = watch::channel(None);
        Self {
            current_tx,
            current_rx,
            queue: Arc::new(RetryQueue::new()),
        }
    }

    pub fn current(&self) -> Option<Arc<PeerHandle>> {
        self.current_rx.borrow().clone()
    }
}

impl Default for SideChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// Bind a listener and accept connections for `side` forever, spawning a
/// session handler (and, on each new connection, a drain task for the
/// opposite side's queue headed toward this side) until shutdown.
pub async fn run_passive(
    port: u16,
    side: Side,
    direction: ProxyDirection,
    settings: Arc<Settings>,
    own: Arc<SideChannels>,
    opposite: Arc<SideChannels>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, ?side, "passive endpoint bound");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        info!(?peer_addr, ?side, "peer connected");
                        spawn_peer(stream, side, direction, settings.clone(), own.clone(), opposite.clone(), shutdown.clone());
                    }
                    Err(e) => warn!(error=%e, ?side, "accept error"),
                }
            }
        }
    }
    Ok(())
}

/// Dial out to `host:port` for `side`, redialing 1 second after every
/// disconnect or failed attempt, until shutdown.
pub async fn run_active(
    host: String,
    port: u16,
    side: Side,
    direction: ProxyDirection,
    settings: Arc<Settings>,
    own: Arc<SideChannels>,
    opposite: Arc<SideChannels>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => {
                info!(host = %host, port, ?side, "dialed peer");
                let session_done = spawn_peer(
                    stream,
                    side,
                    direction,
                    settings.clone(),
                    own.clone(),
                    opposite.clone(),
                    shutdown.clone(),
                );
                // Wait for this connection's session task to finish before
                // attempting to redial; spawn_peer itself detaches the
                // drain/session tasks, so block here on the session handle.
                let _ = session_done.await;
            }
            Err(e) => {
                warn!(error=%e, host = %host, port, ?side, "dial failed");
            }
        }
        tokio::select! {
            biased;
            _ = shutdown.changed() => { if *shutdown.borrow() { return; } }
            () = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}

/// Wrap a freshly accepted/connected stream: publish it as `side`'s current
/// peer, spawn its session-handler task and (while it's current) a drain
/// task for `own`'s queue. Returns a join handle for the session task so
/// the active-side dial loop can wait for disconnection before redialing.
fn spawn_peer(
    stream: TcpStream,
    side: Side,
    direction: ProxyDirection,
    settings: Arc<Settings>,
    own: Arc<SideChannels>,
    opposite: Arc<SideChannels>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let (read_half, write_half) = tokio::io::split(stream);
    let handle = Arc::new(PeerHandle::new(write_half));
    own.current_tx.send_replace(Some(handle.clone()));

    let drain_ctx = (own.clone(), opposite.clone(), settings.clone());
    tokio::spawn(run_drain(
        drain_ctx.0,
        drain_ctx.1,
        drain_ctx.2,
        shutdown.clone(),
    ));

    let ctx = Arc::new(SessionContext {
        side,
        direction,
        settings,
        own,
        opposite,
    });
    tokio::spawn(async move {
        session::run_session(read_half, handle, ctx, shutdown).await;
    })
}

/// Drain `side_channels.queue` onto `side_channels`'s current peer while it
/// remains connected, sending any deferred ACK owed to `ack_target`'s
/// current peer once the corresponding record lands.
async fn run_drain(
    side_channels: Arc<SideChannels>,
    ack_target: Arc<SideChannels>,
    settings: Arc<Settings>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        let Some(peer) = side_channels.current() else {
            return;
        };

        // `drain_one` holds the queue's lock across the write itself, so
        // a concurrent direct forward on `side_channels` can't observe an
        // empty queue and write past whatever is popped here — see
        // `RetryQueue`'s doc comment.
        let outcome = side_channels
            .queue
            .drain_one(|payload| {
                let peer = peer.clone();
                let framed = crate::mllp::frame(payload);
                async move { peer.write_framed(&framed).await }
            })
            .await;

        match outcome {
            None => {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => { if *shutdown.borrow() { return; } }
                    () = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }
            Some(DrainOutcome::Delivered(entry)) => {
                debug!(ack_owed = entry.ack_owed, "drained queued record");
                if entry.ack_owed {
                    if let Some(ack_peer) = ack_target.current() {
                        let ack_text = crate::hl7::build_ack(&entry.payload, &settings);
                        if ack_peer
                            .write_framed(&crate::mllp::frame(ack_text.as_bytes()))
                            .await
                            .is_err()
                        {
                            warn!("failed writing deferred ack after drain");
                        }
                    } else {
                        warn!("deferred ack owed but ack target currently disconnected");
                    }
                }
            }
            Some(DrainOutcome::Failed(e)) => {
                warn!(error=%e, "drain write failed, requeuing at head");
                return;
            }
        }
    }
}
