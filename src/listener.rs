//! Standalone listener mode: accept loop, one task per connection, ACK
//! only messages whose MSH-9 is in `AllowedEvents`, optionally disconnect
//! after the ACK.

use crate::hl7;
use crate::mllp;
use crate::settings::Settings;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub async fn run(settings: Arc<Settings>, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", settings.port)).await?;
    info!(port = settings.port, "listener mode bound");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        info!(?peer_addr, "listener: client connected");
                        let settings = settings.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(serve_connection(stream, settings, shutdown));
                    }
                    Err(e) => warn!(error=%e, "listener accept error"),
                }
            }
        }
    }
    Ok(())
}

async fn serve_connection(mut stream: TcpStream, settings: Arc<Settings>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let record = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return; }
                continue;
            }
            record = mllp::deframe(&mut stream) => record,
        };
        let payload = match record {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(e) => {
                warn!(error=%e, "listener: peer read failed");
                return;
            }
        };

        let message_type = hl7::MshView::parse(&payload)
            .map(|m| m.field(8).to_owned())
            .unwrap_or_default();
        let allowed = settings
            .allowed_events
            .iter()
            .any(|event| event == &message_type);

        if allowed {
            let ack_text = hl7::build_ack(&payload, &settings);
            if stream
                .write_all(&mllp::frame(ack_text.as_bytes()))
                .await
                .is_err()
            {
                warn!("listener: ack write failed");
                return;
            }
            debug!(message_type, "listener: acked message");
        } else {
            debug!(message_type, "listener: message type not in AllowedEvents, no ack");
        }

        if settings.disconnect_after_ack {
            let _ = stream.shutdown().await;
            return;
        }
    }
}
