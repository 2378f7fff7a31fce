//! CLI for stomp-broker
//!
//! Subcommands:
//! - `server`: run the broker
//! - `client`: send one message or watch a destination (useful for smoke tests)

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use stomp_broker::broker::Broker;
use stomp_broker::config::load_config;
use stomp_broker::frame::{Body, Command as StompCommand, Frame, Headers};
use stomp_broker::transport::start_websocket_server;
use stomp_broker::utils::logging;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "stomp-broker")]
enum Command {
    /// Start the broker
    Server {
        /// Log every message routed through the broker
        #[arg(long)]
        log_messages: bool,
    },
    /// Connect as a client: send a message, or print what arrives
    Client {
        /// WebSocket URL of the broker
        #[arg(long, default_value = "ws://127.0.0.1:61614/stomp")]
        url: String,
        /// Destination to send to or subscribe to
        #[arg(long, default_value = "/topic.test")]
        destination: String,
        /// Send this body and exit instead of subscribing
        #[arg(long)]
        send: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    logging::init(&settings.log.level);

    match cmd {
        Command::Server { log_messages } => {
            let broker = Broker::new(settings.broker.clone());
            if log_messages {
                let subscribed = broker.subscribe(
                    "/**",
                    |body: &Body, headers: &Headers| {
                        info!(
                            "{} {}: {:?}",
                            headers.get("message-id").unwrap_or("-"),
                            headers.get("destination").unwrap_or("-"),
                            body
                        );
                    },
                    None,
                );
                if let Err(e) = subscribed {
                    warn!("Message logging disabled: {}", e);
                }
            }

            tokio::select! {
                result = start_websocket_server(settings, broker) => {
                    if let Err(e) = result {
                        error!("Server failed: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received. Exiting gracefully.");
                }
            }
        }
        Command::Client {
            url,
            destination,
            send,
        } => {
            if let Err(e) = run_client(&url, &destination, send).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_client(
    url: &str,
    destination: &str,
    send: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;

    let connect = Frame::new(StompCommand::Connect).header("accept-version", "1.2");
    ws_stream.send(to_message(&connect)).await?;

    let request = match &send {
        Some(body) => Frame::new(StompCommand::Send)
            .header("destination", destination)
            .header("receipt", "sent")
            .with_body(body.clone()),
        None => Frame::new(StompCommand::Subscribe)
            .header("id", "0")
            .header("destination", destination),
    };
    ws_stream.send(to_message(&request)).await?;

    while let Some(msg) = ws_stream.next().await {
        let text = match msg? {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            WsMessage::Close(_) => break,
            _ => continue,
        };
        if text.trim().is_empty() {
            continue;
        }
        let frame = Frame::parse(text.as_bytes())?;
        match frame.command {
            StompCommand::Connected => info!(
                "Connected as {}",
                frame.get_header("session").unwrap_or("-")
            ),
            StompCommand::Message => println!(
                "{}: {}",
                frame.get_header("destination").unwrap_or("-"),
                frame.body_text().unwrap_or("<binary>")
            ),
            StompCommand::Receipt if send.is_some() => {
                info!("Message delivered to {}", destination);
                break;
            }
            StompCommand::Error => {
                error!(
                    "{}: {}",
                    frame.get_header("message").unwrap_or("error"),
                    frame.body_text().unwrap_or_default()
                );
                break;
            }
            _ => {}
        }
    }

    let disconnect = Frame::new(StompCommand::Disconnect);
    ws_stream.send(to_message(&disconnect)).await.ok();
    ws_stream.close(None).await.ok();
    Ok(())
}

fn to_message(frame: &Frame) -> WsMessage {
    let bytes = frame.to_bytes();
    WsMessage::Text(String::from_utf8_lossy(&bytes).into_owned().into())
}
