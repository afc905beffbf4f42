//! Shared helpers for hub integration tests.

#![allow(dead_code)]

use huddle_hub::{HubConfig, HubHandle, RoomName, ServerEvent, SessionId, Username};
use tokio::sync::mpsc;

/// Initialize test logging once.
pub fn init_test() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// A connected session plus the receiving end of its outbound queue.
pub struct TestClient {
    pub session: SessionId,
    pub events: mpsc::Receiver<ServerEvent>,
}

impl TestClient {
    /// Everything queued so far. Hub calls reply only after their fan-out
    /// has been queued, so this is complete once the call has returned.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Names of the queued events, in order.
    pub fn drain_names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(ServerEvent::name).collect()
    }
}

pub fn spawn_hub(config: HubConfig) -> HubHandle {
    init_test();
    HubHandle::spawn(config)
}

pub async fn connect(hub: &HubHandle) -> TestClient {
    let (tx, events) = mpsc::channel(256);
    let session = hub.connect(tx).await.unwrap();
    TestClient { session, events }
}

/// Connect, register `name` and discard the setup events.
pub async fn connect_as(hub: &HubHandle, name: &str) -> TestClient {
    let mut client = connect(hub).await;
    hub.register(client.session, username(name)).await.unwrap();
    client.drain();
    client
}

pub fn username(name: &str) -> Username {
    Username::parse(name).unwrap()
}

pub fn room(name: &str) -> RoomName {
    RoomName::parse(name).unwrap()
}
