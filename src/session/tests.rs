use super::state::negotiate_version;
use super::{Activity, ConnectionState, HeartbeatMonitor, NegotiatedHeartbeat, Session, parse_heart_beat};
use crate::broker::{Broker, BrokerEvent, BrokerHooks, ConnectRequest, EventBus};
use crate::client::{ClientHandle, Outbound};
use crate::config::BrokerSettings;
use crate::frame::{Command, Frame};
use crate::utils::error::{BrokerError, ProtocolError, Rejection};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn open(broker: &Broker) -> (Session, UnboundedReceiver<Outbound>) {
    let (client, rx) = ClientHandle::channel();
    (broker.open_session(client), rx)
}

fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

fn frames(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Frame> {
    drain(rx)
        .into_iter()
        .filter_map(|item| match item {
            Outbound::Frame(bytes) => Some(Frame::parse(&bytes).unwrap()),
            _ => None,
        })
        .collect()
}

fn connect(session: &mut Session, rx: &mut UnboundedReceiver<Outbound>) {
    session
        .handle_frame(Frame::new(Command::Connect).header("accept-version", "1.2"))
        .unwrap();
    let connected = frames(rx);
    assert_eq!(connected[0].command, Command::Connected);
}

#[test]
fn test_heartbeat_negotiation() {
    let agreed = NegotiatedHeartbeat::negotiate([2000, 2000], (2000, 2000));
    assert_eq!(agreed.to_header(), "2000,2000");

    let agreed = NegotiatedHeartbeat::negotiate([10000, 10000], (0, 5000));
    assert_eq!(
        agreed,
        NegotiatedHeartbeat {
            server_ms: 10000,
            client_ms: 0
        }
    );

    let agreed = NegotiatedHeartbeat::negotiate([0, 500], (2000, 2000));
    assert_eq!(agreed.to_header(), "0,2000");

    assert!(NegotiatedHeartbeat::negotiate([0, 0], (2000, 2000)).is_disabled());
}

#[test]
fn test_parse_heart_beat_header() {
    assert_eq!(parse_heart_beat(Some("100, 200")), (100, 200));
    assert_eq!(parse_heart_beat(Some("0,0")), (0, 0));
    assert_eq!(parse_heart_beat(None), (0, 0));
    assert_eq!(parse_heart_beat(Some("abc")), (0, 0));
    assert_eq!(parse_heart_beat(Some("10")), (0, 0));
    assert_eq!(parse_heart_beat(Some("1,2,3")), (0, 0));
    assert_eq!(parse_heart_beat(Some("-1,5")), (0, 0));
}

#[test]
fn test_version_negotiation() {
    assert_eq!(negotiate_version(None), Some("1.0"));
    assert_eq!(negotiate_version(Some("1.0,1.1,1.2")), Some("1.2"));
    assert_eq!(negotiate_version(Some("1.1")), Some("1.1"));
    assert_eq!(negotiate_version(Some("2.0")), None);
}

#[test]
fn test_connect_replies_connected() {
    let broker = Broker::default();
    let (mut session, mut rx) = open(&broker);
    assert_eq!(session.state(), ConnectionState::New);

    session
        .handle_frame(Frame::new(Command::Connect).header("accept-version", "1.1,1.2"))
        .unwrap();

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.version(), Some("1.2"));
    let reply = frames(&mut rx);
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].command, Command::Connected);
    assert_eq!(reply[0].get_header("version"), Some("1.2"));
    assert_eq!(reply[0].get_header("session"), Some(session.id()));
    assert_eq!(
        reply[0].get_header("server"),
        Some(broker.settings().server_name.as_str())
    );
    assert_eq!(reply[0].get_header("heart-beat"), Some("0,0"));
}

#[tokio::test]
async fn test_connect_negotiates_heartbeat() {
    let settings = BrokerSettings {
        heartbeat: [2000, 2000],
        ..BrokerSettings::default()
    };
    let broker = Broker::new(settings);
    let (mut session, mut rx) = open(&broker);

    session
        .handle_frame(Frame::new(Command::Connect).header("heart-beat", "2000,2000"))
        .unwrap();

    let reply = frames(&mut rx);
    assert_eq!(reply[0].get_header("heart-beat"), Some("2000,2000"));
    assert_eq!(reply[0].get_header("version"), Some("1.0"));
    assert_eq!(session.heartbeat().client_ms, 2000);
}

#[test]
fn test_frames_before_connect_are_rejected() {
    let broker = Broker::default();
    let (mut session, mut rx) = open(&broker);

    let err = session
        .handle_frame(
            Frame::new(Command::Send)
                .header("destination", "/a")
                .header("receipt", "r-1"),
        )
        .unwrap_err();
    assert!(matches!(err, BrokerError::Protocol(ProtocolError::NotConnected)));
    assert!(!err.is_fatal());

    let reply = frames(&mut rx);
    assert_eq!(reply[0].command, Command::Error);
    assert_eq!(reply[0].get_header("message"), Some("not connected"));
    assert_eq!(reply[0].get_header("receipt-id"), Some("r-1"));
    assert_eq!(session.state(), ConnectionState::New);

    // still usable afterwards
    connect(&mut session, &mut rx);
}

#[test]
fn test_second_connect_is_an_error() {
    let broker = Broker::default();
    let (mut session, mut rx) = open(&broker);
    connect(&mut session, &mut rx);

    let err = session
        .handle_frame(Frame::new(Command::Connect))
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::Protocol(ProtocolError::AlreadyConnected)
    ));
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[test]
fn test_unsupported_version_is_rejected() {
    let broker = Broker::default();
    let (mut session, mut rx) = open(&broker);

    let err = session
        .handle_frame(Frame::new(Command::Connect).header("accept-version", "2.0"))
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::Protocol(ProtocolError::UnsupportedVersion(_))
    ));
    assert_eq!(frames(&mut rx)[0].command, Command::Error);
    assert_eq!(session.state(), ConnectionState::New);
}

struct Guarded;

impl BrokerHooks for Guarded {
    fn on_connect(&self, request: &ConnectRequest<'_>) -> Result<(), Rejection> {
        match request.headers.get("passcode") {
            Some("secret") => Ok(()),
            _ => Err(Rejection::new("access denied").with_description("bad passcode")),
        }
    }
}

#[test]
fn test_connect_hook_rejection() {
    let broker = Broker::with_hooks(BrokerSettings::default(), Arc::new(Guarded));
    let (mut session, mut rx) = open(&broker);

    let err = session
        .handle_frame(Frame::new(Command::Connect).header("passcode", "guess"))
        .unwrap_err();
    assert!(matches!(err, BrokerError::Rejected(_)));
    assert_eq!(session.state(), ConnectionState::New);

    let reply = frames(&mut rx);
    assert_eq!(reply[0].command, Command::Error);
    assert_eq!(reply[0].get_header("message"), Some("access denied"));
    assert_eq!(reply[0].body_text(), Some("bad passcode"));

    session
        .handle_frame(Frame::new(Command::Connect).header("passcode", "secret"))
        .unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[test]
fn test_subscribe_requires_destination() {
    let broker = Broker::default();
    let (mut session, mut rx) = open(&broker);
    connect(&mut session, &mut rx);

    let err = session
        .handle_frame(Frame::new(Command::Subscribe).header("id", "0"))
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::Protocol(ProtocolError::MissingHeader("destination"))
    ));
    assert_eq!(frames(&mut rx)[0].command, Command::Error);
    assert_eq!(broker.subscription_count(), 0);
}

#[test]
fn test_subscribe_and_unsubscribe_with_receipts() {
    let broker = Broker::default();
    let (mut session, mut rx) = open(&broker);
    connect(&mut session, &mut rx);

    session
        .handle_frame(
            Frame::new(Command::Subscribe)
                .header("id", "0")
                .header("destination", "/topic.a")
                .header("receipt", "sub-0"),
        )
        .unwrap();
    assert_eq!(broker.session_subscription_count(session.id()), 1);
    let reply = frames(&mut rx);
    assert_eq!(reply[0].command, Command::Receipt);
    assert_eq!(reply[0].get_header("receipt-id"), Some("sub-0"));

    session
        .handle_frame(
            Frame::new(Command::Unsubscribe)
                .header("id", "0")
                .header("receipt", "unsub-0"),
        )
        .unwrap();
    assert_eq!(broker.subscription_count(), 0);
    assert_eq!(frames(&mut rx)[0].get_header("receipt-id"), Some("unsub-0"));

    let err = session
        .handle_frame(Frame::new(Command::Unsubscribe).header("id", "0"))
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::Protocol(ProtocolError::UnknownSubscription(_))
    ));
    assert_eq!(frames(&mut rx)[0].command, Command::Error);
}

#[test]
fn test_send_fans_out_but_not_to_sender() {
    let broker = Broker::default();
    let (mut publisher, mut publisher_rx) = open(&broker);
    let (mut subscriber, mut subscriber_rx) = open(&broker);
    connect(&mut publisher, &mut publisher_rx);
    connect(&mut subscriber, &mut subscriber_rx);

    for session in [&mut publisher, &mut subscriber] {
        session
            .handle_frame(
                Frame::new(Command::Subscribe)
                    .header("id", "0")
                    .header("destination", "/data"),
            )
            .unwrap();
    }

    publisher
        .handle_data(b"SEND\ndestination:/data\nreceipt:77\n\nhello\0")
        .unwrap();

    let to_publisher = frames(&mut publisher_rx);
    assert_eq!(to_publisher.len(), 1);
    assert_eq!(to_publisher[0].command, Command::Receipt);

    let to_subscriber = frames(&mut subscriber_rx);
    assert_eq!(to_subscriber.len(), 1);
    assert_eq!(to_subscriber[0].command, Command::Message);
    assert_eq!(to_subscriber[0].get_header("subscription"), Some("0"));
    assert_eq!(to_subscriber[0].body_text(), Some("hello"));
}

#[test]
fn test_unknown_command_keeps_session_open() {
    let broker = Broker::default();
    let (mut session, mut rx) = open(&broker);
    connect(&mut session, &mut rx);

    let err = session.handle_data(b"BEGIN\ntransaction:t1\n\n\0").unwrap_err();
    assert!(matches!(err, BrokerError::CommandNotFound(ref c) if c == "BEGIN"));
    assert!(!err.is_fatal());

    // server-only commands are not accepted from clients either
    let err = session.handle_frame(Frame::new(Command::Message)).unwrap_err();
    assert!(matches!(err, BrokerError::CommandNotFound(_)));

    let reply = frames(&mut rx);
    assert_eq!(reply.len(), 2);
    assert!(
        reply
            .iter()
            .all(|f| f.get_header("message") == Some("command not found"))
    );
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[test]
fn test_malformed_data_is_fatal() {
    let broker = Broker::default();
    let (mut session, mut rx) = open(&broker);

    let err = session.handle_data(b"SEND\ndestination:/a").unwrap_err();
    assert!(err.is_fatal());
    let reply = frames(&mut rx);
    assert_eq!(reply[0].get_header("message"), Some("malformed frame"));
}

#[test]
fn test_heartbeat_payload_is_ignored() {
    let broker = Broker::default();
    let (mut session, mut rx) = open(&broker);
    session.handle_data(b"\n").unwrap();
    session.handle_data(b"\r\n").unwrap();
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_disconnect_sends_receipt_then_closes() {
    let broker = Broker::default();
    let mut events = broker.events();
    let (mut session, mut rx) = open(&broker);
    connect(&mut session, &mut rx);
    session
        .handle_frame(
            Frame::new(Command::Subscribe)
                .header("id", "0")
                .header("destination", "/a"),
        )
        .unwrap();

    session
        .handle_frame(Frame::new(Command::Disconnect).header("receipt", "bye"))
        .unwrap();

    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(broker.subscription_count(), 0);
    let items = drain(&mut rx);
    assert_eq!(items.len(), 2);
    match &items[0] {
        Outbound::Frame(bytes) => {
            let receipt = Frame::parse(bytes).unwrap();
            assert_eq!(receipt.command, Command::Receipt);
            assert_eq!(receipt.get_header("receipt-id"), Some("bye"));
        }
        other => panic!("Expected receipt, got {other:?}"),
    }
    assert_eq!(items[1], Outbound::Close);

    let err = session
        .handle_frame(Frame::new(Command::Send).header("destination", "/a"))
        .unwrap_err();
    assert!(matches!(err, BrokerError::Protocol(ProtocolError::SessionClosed)));

    session.close();
    let disconnects = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, BrokerEvent::Disconnected { .. }))
        .count();
    assert_eq!(disconnects, 1);
}

#[test]
fn test_dropping_session_removes_subscriptions() {
    let broker = Broker::default();
    let (mut session, mut rx) = open(&broker);
    connect(&mut session, &mut rx);
    session
        .handle_frame(
            Frame::new(Command::Subscribe)
                .header("id", "0")
                .header("destination", "/a"),
        )
        .unwrap();
    assert_eq!(broker.subscription_count(), 1);

    drop(session);
    assert_eq!(broker.subscription_count(), 0);
}

fn start_monitor(
    heartbeat: NegotiatedHeartbeat,
    margin_ms: u64,
) -> (
    HeartbeatMonitor,
    Arc<Activity>,
    UnboundedReceiver<Outbound>,
) {
    let (client, rx) = ClientHandle::channel();
    let activity = Arc::new(Activity::new());
    let mut monitor = HeartbeatMonitor::new();
    monitor.start(
        "session-test",
        heartbeat,
        Duration::from_millis(margin_ms),
        client,
        activity.clone(),
        EventBus::default(),
    );
    (monitor, activity, rx)
}

#[tokio::test(start_paused = true)]
async fn test_silent_client_is_closed_after_interval_plus_margin() {
    let heartbeat = NegotiatedHeartbeat {
        server_ms: 0,
        client_ms: 100,
    };
    let (_monitor, _activity, mut rx) = start_monitor(heartbeat, 50);

    // idle for exactly interval + margin is still alive
    tokio::time::sleep(Duration::from_millis(150)).await;
    tokio::task::yield_now().await;
    assert!(drain(&mut rx).is_empty());

    tokio::time::sleep(Duration::from_millis(1)).await;
    tokio::task::yield_now().await;
    assert_eq!(drain(&mut rx), vec![Outbound::Close]);
}

#[tokio::test(start_paused = true)]
async fn test_active_client_is_kept_alive() {
    let heartbeat = NegotiatedHeartbeat {
        server_ms: 0,
        client_ms: 100,
    };
    let (monitor, activity, mut rx) = start_monitor(heartbeat, 50);

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(90)).await;
        activity.touch();
    }
    assert!(drain(&mut rx).is_empty());
    assert!(monitor.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_server_pings_on_interval() {
    let heartbeat = NegotiatedHeartbeat {
        server_ms: 100,
        client_ms: 0,
    };
    let (_monitor, _activity, mut rx) = start_monitor(heartbeat, 0);

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(drain(&mut rx), vec![Outbound::Ping; 3]);
}

#[tokio::test(start_paused = true)]
async fn test_turn_off_is_idempotent() {
    let heartbeat = NegotiatedHeartbeat {
        server_ms: 100,
        client_ms: 100,
    };
    let (mut monitor, _activity, mut rx) = start_monitor(heartbeat, 50);
    assert!(monitor.is_active());

    monitor.turn_off();
    monitor.turn_off();
    assert!(!monitor.is_active());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_session_liveness_closes_connection() {
    let settings = BrokerSettings {
        heartbeat: [0, 100],
        heartbeat_error_margin_ms: 50,
        ..BrokerSettings::default()
    };
    let broker = Broker::new(settings);
    let mut events = broker.events();
    let (mut session, mut rx) = open(&broker);
    session
        .handle_frame(Frame::new(Command::Connect).header("heart-beat", "100,0"))
        .unwrap();
    assert_eq!(frames(&mut rx)[0].get_header("heart-beat"), Some("0,100"));

    tokio::time::sleep(Duration::from_millis(60)).await;
    session.handle_data(b"\n").unwrap();
    tokio::time::sleep(Duration::from_millis(140)).await;
    assert!(drain(&mut rx).is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(drain(&mut rx), vec![Outbound::Close]);
    let timed_out = std::iter::from_fn(|| events.try_recv().ok()).any(|e| {
        matches!(e, BrokerEvent::Error { ref message, .. } if message.contains("liveness"))
    });
    assert!(timed_out);
}
