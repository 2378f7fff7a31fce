//! WebSocket transport
//!
//! Responsibilities:
//! - Accept TCP connections and upgrade the ones addressed to the STOMP path
//! - Enforce `max_connections`
//! - Run one reader loop and one writer task per connection
//! - Close the socket on fatal errors (malformed frames, liveness failures)

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::oneshot;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Broker, BrokerEvent};
use crate::client::{ClientHandle, Outbound};
use crate::config::{ServerSettings, Settings};
use crate::utils::error::Result;

/// Bind the configured address and serve until the listener fails.
pub async fn start_websocket_server(settings: Settings, broker: Broker) -> Result<()> {
    settings.validate()?;
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(
        "STOMP broker listening on ws://{addr}{}",
        settings.server.path
    );

    serve(listener, settings.server, broker).await
}

/// Serve connections from an already bound listener.
pub async fn serve(listener: TcpListener, server: ServerSettings, broker: Broker) -> Result<()> {
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        let (stream, peer) = listener.accept().await?;

        if server.max_connections > 0 && active.load(Ordering::SeqCst) >= server.max_connections {
            warn!(
                "Refusing {peer}: {} connections already open",
                server.max_connections
            );
            drop(stream);
            continue;
        }
        active.fetch_add(1, Ordering::SeqCst);

        let broker = broker.clone();
        let path = server.path.clone();
        let active = active.clone();
        spawn(async move {
            if let Err(e) = handle_connection(stream, path, broker).await {
                warn!("Connection from {peer} failed: {e}");
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

async fn handle_connection(stream: TcpStream, path: String, broker: Broker) -> Result<()> {
    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            let mut refusal = ErrorResponse::new(Some("no STOMP endpoint here".to_string()));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            Err(refusal)
        }
    };
    let ws_stream = accept_hdr_async(stream, check_path).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (client, mut rx) = ClientHandle::channel();
    let mut session = broker.open_session(client.clone());
    let session_id = session.id().to_string();

    // Writer: session / broker / heart-beat → socket
    let (done_tx, mut done_rx) = oneshot::channel::<()>();
    {
        let session_id = session_id.clone();
        spawn(async move {
            while let Some(item) = rx.recv().await {
                let msg = match item {
                    Outbound::Frame(bytes) => to_ws_message(bytes),
                    Outbound::Ping => WsMessage::text("\n"),
                    Outbound::Close => {
                        let _ = ws_sender.send(WsMessage::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = ws_sender.send(msg).await {
                    warn!("Failed to send message to {session_id}: {e}");
                    break;
                }
            }
            let _ = done_tx.send(());
            debug!("Send loop closed for {session_id}");
        });
    }

    // Reader: socket → session
    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                let Some(incoming) = incoming else { break };
                let result = match incoming {
                    Ok(WsMessage::Text(text)) => session.handle_data(text.as_bytes()),
                    Ok(WsMessage::Binary(data)) => session.handle_data(&data),
                    Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {
                        session.touch();
                        Ok(())
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(WsMessage::Frame(_)) => Ok(()),
                    Err(e) => {
                        warn!("WebSocket error on {session_id}: {e}");
                        broker.emit(BrokerEvent::Error {
                            session_id: Some(session_id.clone()),
                            message: e.to_string(),
                        });
                        break;
                    }
                };
                if let Err(e) = result {
                    if e.is_fatal() {
                        warn!("Closing {session_id}: {e}");
                        break;
                    }
                }
            }
            _ = &mut done_rx => break,
        }
    }

    session.close();
    client.close();
    Ok(())
}

/// Text frames when the bytes are UTF-8, binary otherwise.
fn to_ws_message(bytes: Bytes) -> WsMessage {
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => WsMessage::text(text),
        Err(_) => WsMessage::binary(bytes),
    }
}
