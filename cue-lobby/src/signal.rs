//! Lobby events as cache invalidation.
//!
//! Consumers do not act on event contents. Each relevant event only bumps a
//! generation number in a single-slot `watch` channel; a consumer that was
//! busy while several events arrived wakes once and re-reads the store.

use tokio::sync::watch;

use crate::bus::{ConnectionState, Lifecycle, NotificationBus, Subscription};
use crate::protocol::BusMessage;

pub struct RefreshSignal {
    subscription: Subscription,
    rx: watch::Receiver<u64>,
}

impl RefreshSignal {
    /// Subscribe to `channel` and fire on every lobby event except the
    /// relay's `connected` greeting.
    pub fn start(bus: &NotificationBus, channel: &str, kind: &str, lifecycle: Option<&Lifecycle>) -> Self {
        let (tx, rx) = watch::channel(0u64);
        let subscription = bus.subscribe(
            channel,
            kind,
            move |frame| match BusMessage::decode(&frame) {
                Ok(BusMessage::Lobby(event)) if event.invalidates() => {
                    tx.send_modify(|generation| *generation += 1);
                }
                Ok(_) => {}
                Err(e) => log::debug!("Ignoring undecodable lobby frame: {e}"),
            },
            lifecycle,
        );
        Self { subscription, rx }
    }

    /// Wait for the next invalidation. Returns `false` once the signal can
    /// no longer fire.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Invalidations seen so far.
    pub fn generation(&self) -> u64 {
        *self.rx.borrow()
    }

    /// An independent receiver for another consumer.
    pub fn receiver(&self) -> watch::Receiver<u64> {
        self.rx.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.subscription.state()
    }

    pub fn stop(&self) {
        self.subscription.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryTransport;
    use crate::protocol::{LobbyAction, LobbyEvent, PresenceKind, PresenceMessage};
    use std::sync::Arc;
    use std::time::Duration;

    async fn connected(signal: &RefreshSignal) {
        let mut states = signal.subscription.state_changes();
        states.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
    }

    #[tokio::test]
    async fn test_greeting_does_not_fire() {
        let bus = NotificationBus::new(Arc::new(MemoryTransport::default()), "cue", Duration::from_secs(1));
        let mut signal = RefreshSignal::start(&bus, "lobby", "ws", None);
        connected(&signal).await;

        let fired = tokio::time::timeout(Duration::from_millis(100), signal.changed()).await;
        assert!(fired.is_err());
        assert_eq!(signal.generation(), 0);
    }

    #[tokio::test]
    async fn test_events_collapse_into_one_wakeup() {
        let bus = NotificationBus::new(Arc::new(MemoryTransport::default()), "cue", Duration::from_secs(1));
        let mut signal = RefreshSignal::start(&bus, "lobby", "ws", None);
        connected(&signal).await;

        for id in ["t1", "t2", "t3"] {
            let event = BusMessage::from(LobbyEvent::new(LobbyAction::Create, id, 1));
            bus.publish("lobby", &event).await.unwrap();
        }
        // Presence gossip on the same channel is not an invalidation.
        let presence = PresenceMessage {
            kind: PresenceKind::Heartbeat,
            user_id: "u1".into(),
            user_name: "Una".into(),
            locale: None,
            origin_url: None,
            timestamp: None,
        };
        bus.publish("lobby", &BusMessage::from(presence)).await.unwrap();

        assert!(signal.changed().await);
        tokio::time::timeout(Duration::from_secs(5), async {
            while signal.generation() < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(signal.generation(), 3);
    }

    #[tokio::test]
    async fn test_stop_ends_signal() {
        let bus = NotificationBus::new(Arc::new(MemoryTransport::default()), "cue", Duration::from_secs(1));
        let mut signal = RefreshSignal::start(&bus, "lobby", "ws", None);
        connected(&signal).await;

        signal.stop();
        let ended = tokio::time::timeout(Duration::from_secs(5), signal.changed()).await.unwrap();
        assert!(!ended);
    }
}
