//! Integration tests for the live-update channel over a scripted transport
//!
//! Time is paused so reconnect delays and polling ticks are deterministic.

use floor_sync::channel::{
    ChannelManager, ChannelOptions, ConnectionState, RefreshFn, Transport, TransportConnection, TransportError,
    TransportEvent, TransportEventSender,
};
use futures::FutureExt;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted connection: the test drives its events and reads what was sent
#[derive(Default)]
struct Socket {
    events: Mutex<Option<TransportEventSender>>,
    ready: AtomicBool,
    sent: Mutex<Vec<Value>>,
}

impl Socket {
    fn emit(&self, event: TransportEvent) {
        match &event {
            TransportEvent::Opened => self.ready.store(true, Ordering::SeqCst),
            TransportEvent::Closed(_) | TransportEvent::Error(_) => self.ready.store(false, Ordering::SeqCst),
            TransportEvent::Message(_) => {}
        }
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }
}

struct Connection(Arc<Socket>);

impl TransportConnection for Connection {
    fn is_ready(&self) -> bool {
        self.0.ready.load(Ordering::SeqCst)
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        self.0.sent.lock().unwrap().push(serde_json::from_str(text).unwrap());
        Ok(())
    }

    fn close(&mut self) {
        self.0.ready.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ScriptedTransport {
    sockets: Mutex<Vec<Arc<Socket>>>,
}

impl ScriptedTransport {
    fn socket(&self, index: usize) -> Arc<Socket> {
        self.sockets.lock().unwrap()[index].clone()
    }

    fn opened(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, events: TransportEventSender) -> Result<Box<dyn TransportConnection>, TransportError> {
        let socket = Arc::new(Socket::default());
        *socket.events.lock().unwrap() = Some(events);
        self.sockets.lock().unwrap().push(socket.clone());
        Ok(Box::new(Connection(socket)))
    }
}

fn counting_refresh() -> (RefreshFn, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let refresh: RefreshFn = Arc::new(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        }
        .boxed()
    });
    (refresh, calls)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Advance one second at a time so every timer fires on schedule
async fn step(secs: u64) {
    for _ in 0..secs {
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
    }
}

/// Every tracked subscription is re-announced on each reconnect, removed ones are not
#[tokio::test(start_paused = true)]
async fn test_subscriptions_replayed_after_reconnect() {
    let transport = Arc::new(ScriptedTransport::default());
    let (refresh, _) = counting_refresh();
    let handle = ChannelManager::spawn(transport.clone(), refresh, ChannelOptions::default());

    handle.subscribe("batch-1");
    handle.subscribe("station-4");
    handle.connect();
    settle().await;
    transport.socket(0).emit(TransportEvent::Opened);
    settle().await;
    assert_eq!(transport.socket(0).sent().len(), 2);

    handle.unsubscribe("station-4");
    settle().await;
    assert_eq!(
        transport.socket(0).sent().last().unwrap(),
        &json!({"type": "unsubscribe", "key": "station-4"})
    );

    transport.socket(0).emit(TransportEvent::Error("reset by peer".into()));
    transport.socket(0).emit(TransportEvent::Closed(None));
    settle().await;
    assert_eq!(handle.current_state(), ConnectionState::Closed);

    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(transport.opened(), 2);

    transport.socket(1).emit(TransportEvent::Opened);
    settle().await;
    assert_eq!(handle.current_state(), ConnectionState::Open);
    assert_eq!(transport.socket(1).sent(), vec![json!({"type": "subscribe", "key": "batch-1"})]);

    handle.disconnect().await;
}

/// Polling covers a long outage and stops once the channel is back
#[tokio::test(start_paused = true)]
async fn test_polling_covers_outage() {
    let transport = Arc::new(ScriptedTransport::default());
    let (refresh, refreshes) = counting_refresh();
    let options = ChannelOptions {
        poll_interval: Duration::from_secs(10),
        ..Default::default()
    };
    let handle = ChannelManager::spawn(transport.clone(), refresh, options);
    let mut states = handle.state();

    handle.connect();
    settle().await;
    transport.socket(0).emit(TransportEvent::Opened);
    settle().await;
    assert_eq!(refreshes.load(Ordering::SeqCst), 0);

    transport.socket(0).emit(TransportEvent::Closed(Some("server restart".into())));
    settle().await;

    // Reconnect attempts at +1s, +3s, +8s, +18s, +48s all fail to open
    for (attempt, delay) in [1u64, 2, 5, 10, 30].into_iter().enumerate() {
        step(delay).await;
        assert_eq!(transport.opened(), attempt + 2);
        transport.socket(attempt + 1).emit(TransportEvent::Closed(None));
        settle().await;
    }

    // 48s down with a 10s poll interval
    assert_eq!(refreshes.load(Ordering::SeqCst), 4);

    step(30).await;
    let last = transport.opened() - 1;
    transport.socket(last).emit(TransportEvent::Opened);
    settle().await;
    assert_eq!(*states.borrow_and_update(), ConnectionState::Open);

    let polled = refreshes.load(Ordering::SeqCst);
    assert_eq!(polled, 7);
    step(120).await;
    assert_eq!(refreshes.load(Ordering::SeqCst), polled);

    handle.disconnect().await;
    assert_eq!(handle.current_state(), ConnectionState::Stopped);
}

/// Messages reach every receiver; garbage in between is skipped
#[tokio::test(start_paused = true)]
async fn test_messages_fan_out() {
    let transport = Arc::new(ScriptedTransport::default());
    let (refresh, _) = counting_refresh();
    let handle = ChannelManager::spawn(transport.clone(), refresh, ChannelOptions::default());
    let mut dashboard = handle.messages();
    let mut station = handle.messages();

    handle.connect();
    settle().await;
    let socket = transport.socket(0);
    socket.emit(TransportEvent::Opened);
    socket.emit(TransportEvent::Message("not json".into()));
    socket.emit(TransportEvent::Message(r#"{"key":"batch-1"}"#.into()));
    socket.emit(TransportEvent::Message(
        r#"{"type":"batch_event","key":"batch-1","status":"IN_PROGRESS"}"#.into(),
    ));
    settle().await;

    for receiver in [&mut dashboard, &mut station] {
        let message = receiver.recv().await.unwrap();
        assert_eq!(message.kind, "batch_event");
        assert_eq!(message.field("status"), Some(&json!("IN_PROGRESS")));
        assert!(receiver.try_recv().is_err());
    }

    handle.disconnect().await;
}
