// Realtime fan-out.
//
// Chat flows never touch sockets. They return their result together with the
// pushes it implies, and the caller hands those to `EventDispatcher` after
// the store work has succeeded. Delivery is best-effort: an offline or dead
// recipient is logged and skipped, never reported back to the flow.

use chitchat_common::protocol::ws::ServerEvent;
use tracing::debug;

use crate::presence::PresenceRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    User(String),
    Everyone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Push {
    pub recipient: Recipient,
    pub event: ServerEvent,
}

impl Push {
    pub fn to(username: impl Into<String>, event: ServerEvent) -> Self {
        Self { recipient: Recipient::User(username.into()), event }
    }

    pub fn broadcast(event: ServerEvent) -> Self {
        Self { recipient: Recipient::Everyone, event }
    }
}

/// A flow's return value plus the pushes to deliver once it has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effects<T> {
    pub value: T,
    pub pushes: Vec<Push>,
}

impl<T> Effects<T> {
    pub fn new(value: T) -> Self {
        Self { value, pushes: Vec::new() }
    }

    pub fn with_push(mut self, push: Push) -> Self {
        self.pushes.push(push);
        self
    }

    pub fn with_pushes(mut self, pushes: impl IntoIterator<Item = Push>) -> Self {
        self.pushes.extend(pushes);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Offline,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct EventDispatcher {
    registry: PresenceRegistry,
}

impl EventDispatcher {
    pub fn new(registry: PresenceRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub async fn send_to(&self, username: &str, event: ServerEvent) -> Delivery {
        let Some(handle) = self.registry.lookup(username).await else {
            debug!(recipient = username, event = event.name(), "recipient offline, push dropped");
            return Delivery::Offline;
        };

        let event_name = event.name();
        match handle.send(event) {
            Ok(()) => Delivery::Delivered,
            Err(_) => {
                debug!(
                    recipient = username,
                    connection_id = %handle.connection_id,
                    event = event_name,
                    "recipient socket closed, push dropped"
                );
                Delivery::Failed
            }
        }
    }

    /// Send to every online identity. Returns how many queued the event.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        // Handles are cloned out so no lock is held while sending.
        let handles = self.registry.snapshot().await;
        handles.iter().filter(|handle| handle.send(event.clone()).is_ok()).count()
    }

    pub async fn dispatch(&self, pushes: Vec<Push>) {
        for push in pushes {
            match push.recipient {
                Recipient::User(username) => {
                    self.send_to(&username, push.event).await;
                }
                Recipient::Everyone => {
                    let event_name = push.event.name();
                    let delivered = self.broadcast(push.event).await;
                    debug!(event = event_name, delivered, "broadcast dispatched");
                }
            }
        }
    }

    /// Deliver a flow's pushes and hand back its value.
    pub async fn deliver<T>(&self, effects: Effects<T>) -> T {
        self.dispatch(effects.pushes).await;
        effects.value
    }
}
