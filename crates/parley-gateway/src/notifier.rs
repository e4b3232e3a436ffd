use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use parley_db::listen::{Channel, ChannelMessage};
use parley_types::events::ServerEvent;
use parley_types::notify::{NotificationEvent, Topic};
use parley_types::rooms::RoomKey;

use crate::rooms::Rooms;

const RECONNECT_MIN_DELAY: Duration = Duration::from_millis(250);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Per-process subscription loop over the shared channel.
///
/// This is the ONLY path that broadcasts message lifecycle events: the
/// send-message handler publishes to the channel, and every process — the
/// writer's own included — fans out from here to its local sockets. Until a
/// lost subscription is re-established this process delivers no live events,
/// but it never crashes over it; clients recover missed events by refetch.
pub async fn run(channel: Arc<dyn Channel>, rooms: Rooms) {
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            let delay = backoff_delay(attempt, RECONNECT_MIN_DELAY, RECONNECT_MAX_DELAY);
            warn!(attempt, ?delay, "channel subscription down, retrying");
            tokio::time::sleep(delay).await;
        }

        let mut subscription = match channel.subscribe().await {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(error = %err, "channel subscribe failed");
                attempt = attempt.saturating_add(1);
                continue;
            }
        };
        info!("subscribed to cross-process channel");
        attempt = 0;

        loop {
            match subscription.next().await {
                Ok(message) => {
                    if let Some((room, event)) = decode(&message) {
                        rooms.deliver(&room, &event).await;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "channel receive failed");
                    break;
                }
            }
        }

        attempt = 1;
    }
}

/// Map a raw channel message onto the room and outbound event it addresses.
/// Unknown topics and malformed payloads are logged and dropped — one bad
/// message never takes the subscriber loop down.
fn decode(message: &ChannelMessage) -> Option<(RoomKey, ServerEvent)> {
    let Some(topic) = Topic::parse(&message.topic) else {
        warn!(topic = %message.topic, "notification on unknown topic dropped");
        return None;
    };

    let pointer: NotificationEvent = match serde_json::from_str(&message.payload) {
        Ok(pointer) => pointer,
        Err(err) => {
            warn!(topic = %message.topic, error = %err, "undecodable notification dropped");
            return None;
        }
    };

    let room = RoomKey::conversation(pointer.conversation_id.clone());
    let event = match topic {
        Topic::NewMessage => ServerEvent::MessageNotification {
            message_id: pointer.message_id,
            conversation_id: pointer.conversation_id,
        },
        Topic::MessageDeleted => ServerEvent::MessageDeleted {
            message_id: pointer.message_id,
            conversation_id: pointer.conversation_id,
        },
        Topic::MessageHidden => ServerEvent::MessageHidden {
            message_id: pointer.message_id,
            conversation_id: pointer.conversation_id,
        },
    };

    Some((room, event))
}

fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
    let pow = attempt.saturating_sub(1).min(16);
    let ms = min.as_millis().saturating_mul(1u128 << pow);
    let delay = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
    delay.min(max).max(min)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::{broadcast, mpsc};
    use uuid::Uuid;

    use parley_db::listen::{ChannelError, Subscription};

    use super::*;

    fn raw(topic: &str, payload: &str) -> ChannelMessage {
        ChannelMessage {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    #[test]
    fn decodes_each_lifecycle_topic_onto_the_conversation_room() {
        let cases = [
            ("new_message", "message_notification"),
            ("message_deleted", "message_deleted"),
            ("message_hidden", "message_hidden"),
        ];
        for (topic, expected_event) in cases {
            let (room, event) = decode(&raw(
                topic,
                r#"{"message_id":"m1","conversation_id":"42"}"#,
            ))
            .expect("decodes");
            assert_eq!(room, RoomKey::conversation("42"));
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], expected_event);
            assert_eq!(json["data"]["message_id"], "m1");
        }
    }

    #[test]
    fn drops_unknown_topics_and_malformed_payloads() {
        assert!(decode(&raw("presence", r#"{"message_id":"m1","conversation_id":"42"}"#)).is_none());
        assert!(decode(&raw("new_message", "not json")).is_none());
        assert!(decode(&raw("new_message", r#"{"message_id":"m1"}"#)).is_none());
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let min = Duration::from_millis(250);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(1, min, max), Duration::from_millis(250));
        assert_eq!(backoff_delay(2, min, max), Duration::from_millis(500));
        assert_eq!(backoff_delay(3, min, max), Duration::from_millis(1000));
        assert_eq!(backoff_delay(12, min, max), max);
        assert_eq!(backoff_delay(u32::MAX, min, max), max);
    }

    /// Channel double whose first N subscribe attempts fail outright.
    struct FlakyChannel {
        fail_first: usize,
        attempts: AtomicUsize,
        feed: broadcast::Sender<ChannelMessage>,
    }

    struct FeedSubscription {
        rx: broadcast::Receiver<ChannelMessage>,
    }

    #[async_trait]
    impl Subscription for FeedSubscription {
        async fn next(&mut self) -> Result<ChannelMessage, ChannelError> {
            self.rx.recv().await.map_err(|_| ChannelError::Closed)
        }
    }

    #[async_trait]
    impl Channel for FlakyChannel {
        async fn subscribe(&self) -> Result<Box<dyn Subscription>, ChannelError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(ChannelError::Closed);
            }
            Ok(Box::new(FeedSubscription {
                rx: self.feed.subscribe(),
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_with_backoff_then_resumes_delivery() {
        let (feed, _) = broadcast::channel(16);
        let channel = Arc::new(FlakyChannel {
            fail_first: 2,
            attempts: AtomicUsize::new(0),
            feed: feed.clone(),
        });

        let rooms = Rooms::new();
        let (tx, mut rx) = mpsc::channel(8);
        rooms
            .register(RoomKey::conversation("42"), Uuid::new_v4(), tx)
            .await;

        tokio::spawn(run(channel.clone(), rooms.clone()));

        // Publishing may race the (re)subscription; keep nudging until the
        // loop is back up and the event lands.
        let event = loop {
            let _ = feed.send(raw(
                "new_message",
                r#"{"message_id":"m1","conversation_id":"42"}"#,
            ));
            match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
                Ok(Some(event)) => break event,
                _ => continue,
            }
        };

        assert!(matches!(event, ServerEvent::MessageNotification { .. }));
        assert!(
            channel.attempts.load(Ordering::SeqCst) >= 3,
            "two failed attempts preceded the live subscription"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn survives_a_dropped_subscription_mid_stream() {
        let (feed, _) = broadcast::channel(16);
        let channel = Arc::new(FlakyChannel {
            fail_first: 0,
            attempts: AtomicUsize::new(0),
            feed: feed.clone(),
        });

        let rooms = Rooms::new();
        let (tx, mut rx) = mpsc::channel(8);
        rooms
            .register(RoomKey::conversation("42"), Uuid::new_v4(), tx)
            .await;

        tokio::spawn(run(channel.clone(), rooms.clone()));

        // First delivery proves the loop is up.
        loop {
            let _ = feed.send(raw(
                "new_message",
                r#"{"message_id":"m1","conversation_id":"42"}"#,
            ));
            if tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_ok()
            {
                break;
            }
        }

        // Lagging the broadcast receiver far enough errors its recv, which
        // the loop treats as a dropped subscription and resubscribes.
        for _ in 0..64 {
            let _ = feed.send(raw("new_message", "not json"));
        }

        let event = loop {
            let _ = feed.send(raw(
                "message_deleted",
                r#"{"message_id":"m2","conversation_id":"42"}"#,
            ));
            match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
                Ok(Some(ServerEvent::MessageDeleted { message_id, .. })) => break message_id,
                _ => continue,
            }
        };

        assert_eq!(event, "m2");
        assert!(channel.attempts.load(Ordering::SeqCst) >= 2);
    }
}
