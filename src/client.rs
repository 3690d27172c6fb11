//! Standalone interactive client mode: dial loop with 1s reconnect, an
//! interactive stdin producer, and a receive task that ACKs whatever the
//! peer sends back. Both activities share one peer stream, so writes go
//! through the same [`PeerHandle`] write-mutex used by the proxy.

use crate::hl7;
use crate::mllp;
use crate::peer::PeerHandle;
use crate::settings::Settings;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn run(settings: Arc<Settings>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        match TcpStream::connect((settings.client_host.as_str(), settings.client_port)).await {
            Ok(stream) => {
                info!(host = %settings.client_host, port = settings.client_port, "client: connected");
                serve_session(stream, settings.clone(), shutdown.clone()).await;
            }
            Err(e) => {
                warn!(error=%e, "client: dial failed");
            }
        }
        tokio::select! {
            biased;
            _ = shutdown.changed() => { if *shutdown.borrow() { return; } }
            () = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}

async fn serve_session(stream: TcpStream, settings: Arc<Settings>, shutdown: watch::Receiver<bool>) {
    let (mut read_half, write_half) = tokio::io::split(stream);
    let peer = Arc::new(PeerHandle::new(write_half));

    let producer_peer = peer.clone();
    let mut producer_shutdown = shutdown.clone();
    let producer = tokio::spawn(async move {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        // `lines()` already strips each line's own terminator, so a pasted
        // multi-segment message (MSH, then PID, OBX, ...) arrives as one
        // physical line per segment. Accumulate segments until a blank
        // line (or EOF) ends the message, then join them with 0x0D and
        // send the whole thing as a single MLLP record.
        let mut segments: Vec<String> = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = producer_shutdown.changed() => { if *producer_shutdown.borrow() { return; } }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) if text.is_empty() => {
                            if segments.is_empty() {
                                continue;
                            }
                            let message = segments.join("\r") + "\r";
                            segments.clear();
                            let framed = mllp::frame(message.as_bytes());
                            if producer_peer.write_framed(&framed).await.is_err() {
                                return;
                            }
                        }
                        Ok(Some(text)) => segments.push(text),
                        Ok(None) => {
                            if !segments.is_empty() {
                                let message = segments.join("\r") + "\r";
                                let framed = mllp::frame(message.as_bytes());
                                let _ = producer_peer.write_framed(&framed).await;
                            }
                            return;
                        }
                        Err(_) => return,
                    }
                }
            }
        }
    });

    let mut shutdown = shutdown;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
            record = mllp::deframe(&mut read_half) => {
                match record {
                    Ok(Some(payload)) => {
                        let ack_text = hl7::build_ack(&payload, &settings);
                        if peer.write_framed(&mllp::frame(ack_text.as_bytes())).await.is_err() {
                            warn!("client: ack write failed");
                            break;
                        }
                        if settings.disconnect_after_ack {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error=%e, "client: peer read failed");
                        break;
                    }
                }
            }
        }
    }

    producer.abort();
}
