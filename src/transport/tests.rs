use crate::broker::Broker;
use crate::config::Settings;
use crate::frame::{Body, Command, Frame};
use crate::transport::websocket::start_websocket_server;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn setup_server(heartbeat: [u64; 2], margin_ms: u64) -> (String, Broker) {
    let mut settings = Settings::default();
    settings.server.port = portpicker::pick_unused_port().expect("No free ports");
    settings.broker.heartbeat = heartbeat;
    settings.broker.heartbeat_error_margin_ms = margin_ms;

    let broker = Broker::new(settings.broker.clone());
    let url = format!("ws://127.0.0.1:{}{}", settings.server.port, settings.server.path);
    tokio::spawn(start_websocket_server(settings, broker.clone()));

    // Give the server a moment to start up
    tokio::time::sleep(Duration::from_millis(100)).await;
    (url, broker)
}

async fn send_frame(ws: &mut Ws, frame: Frame) {
    let text = String::from_utf8(frame.to_bytes().to_vec()).expect("utf-8 frame");
    ws.send(WsMessage::text(text)).await.expect("send frame");
}

/// Next STOMP frame, skipping heart-beats. `None` once the socket closes.
async fn next_frame(ws: &mut Ws) -> Option<Frame> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for a frame")?;
        match msg {
            Ok(WsMessage::Text(text)) if text.trim().is_empty() => continue,
            Ok(WsMessage::Text(text)) => return Some(Frame::parse(text.as_bytes()).unwrap()),
            Ok(WsMessage::Binary(data)) => return Some(Frame::parse(&data).unwrap()),
            Ok(WsMessage::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn connect(url: &str, heart_beat: &str) -> (Ws, Frame) {
    let (mut ws, _) = connect_async(url).await.expect("WebSocket handshake failed");
    send_frame(
        &mut ws,
        Frame::new(Command::Connect)
            .header("accept-version", "1.1,1.2")
            .header("heart-beat", heart_beat),
    )
    .await;
    let connected = next_frame(&mut ws).await.expect("Did not receive CONNECTED");
    (ws, connected)
}

#[tokio::test]
async fn test_connect_negotiates_heartbeat() {
    let (url, _broker) = setup_server([2000, 2000], 1000).await;
    let (_ws, connected) = connect(&url, "2000,2000").await;

    assert_eq!(connected.command, Command::Connected);
    assert_eq!(connected.get_header("version"), Some("1.2"));
    assert_eq!(connected.get_header("heart-beat"), Some("2000,2000"));
    assert!(connected.get_header("session").is_some());
}

#[tokio::test]
async fn test_pubsub_between_clients_without_echo() {
    let (url, _broker) = setup_server([0, 0], 1000).await;
    let (mut publisher, _) = connect(&url, "0,0").await;
    let (mut subscriber, _) = connect(&url, "0,0").await;

    send_frame(
        &mut subscriber,
        Frame::new(Command::Subscribe)
            .header("id", "sub-0")
            .header("destination", "/topic/data.*")
            .header("receipt", "s1"),
    )
    .await;
    let receipt = next_frame(&mut subscriber).await.unwrap();
    assert_eq!(receipt.get_header("receipt-id"), Some("s1"));

    // the publisher listens on the same destination and must not hear itself
    send_frame(
        &mut publisher,
        Frame::new(Command::Subscribe)
            .header("id", "own")
            .header("destination", "/topic/data.*"),
    )
    .await;
    send_frame(
        &mut publisher,
        Frame::new(Command::Send)
            .header("destination", "/topic/data.temp")
            .header("receipt", "p1")
            .with_body("21.5"),
    )
    .await;

    let message = next_frame(&mut subscriber).await.unwrap();
    assert_eq!(message.command, Command::Message);
    assert_eq!(message.get_header("destination"), Some("/topic/data.temp"));
    assert_eq!(message.get_header("subscription"), Some("sub-0"));
    assert_eq!(message.get_header("content-length"), Some("4"));
    assert_eq!(message.body_text(), Some("21.5"));

    let next = next_frame(&mut publisher).await.unwrap();
    assert_eq!(next.command, Command::Receipt);
    assert_eq!(next.get_header("receipt-id"), Some("p1"));
}

#[tokio::test]
async fn test_wire_send_reaches_local_subscriber() {
    let (url, broker) = setup_server([0, 0], 1000).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    broker
        .subscribe(
            "/**",
            move |body: &Body, headers: &crate::frame::Headers| {
                let _ = tx.send((
                    body.clone(),
                    headers.get("destination").map(str::to_string),
                ));
            },
            None,
        )
        .unwrap();

    let (mut ws, _) = connect(&url, "0,0").await;
    send_frame(
        &mut ws,
        Frame::new(Command::Send)
            .header("destination", "/data")
            .with_body("test body"),
    )
    .await;

    let (body, destination) = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("callback not invoked")
        .unwrap();
    assert_eq!(body.as_text(), Some("test body"));
    assert_eq!(destination.as_deref(), Some("/data"));
}

#[tokio::test]
async fn test_wrong_path_is_refused() {
    let (url, _broker) = setup_server([0, 0], 1000).await;
    let wrong = url.replace("/stomp", "/other");
    assert!(connect_async(wrong.as_str()).await.is_err());
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let (url, _broker) = setup_server([0, 0], 1000).await;
    let (mut ws, _) = connect(&url, "0,0").await;

    ws.send(WsMessage::text("SEND\ndestination:/a"))
        .await
        .expect("send garbage");
    let error = next_frame(&mut ws).await.expect("Did not receive ERROR");
    assert_eq!(error.command, Command::Error);
    assert_eq!(error.get_header("message"), Some("malformed frame"));
    assert!(next_frame(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_silent_client_is_disconnected() {
    let (url, broker) = setup_server([0, 100], 50).await;
    let (mut ws, connected) = connect(&url, "100,0").await;
    assert_eq!(connected.get_header("heart-beat"), Some("0,100"));

    // say nothing: the broker gives up after interval + margin
    assert!(next_frame(&mut ws).await.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.subscription_count(), 0);
}

#[tokio::test]
async fn test_disconnect_sends_receipt_then_closes() {
    let (url, broker) = setup_server([0, 0], 1000).await;
    let (mut ws, _) = connect(&url, "0,0").await;
    send_frame(
        &mut ws,
        Frame::new(Command::Subscribe)
            .header("id", "0")
            .header("destination", "/a"),
    )
    .await;
    send_frame(
        &mut ws,
        Frame::new(Command::Disconnect).header("receipt", "bye"),
    )
    .await;

    let receipt = next_frame(&mut ws).await.unwrap();
    assert_eq!(receipt.command, Command::Receipt);
    assert_eq!(receipt.get_header("receipt-id"), Some("bye"));
    assert!(next_frame(&mut ws).await.is_none());
    assert_eq!(broker.subscription_count(), 0);
}
