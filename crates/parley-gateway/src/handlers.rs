use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

use parley_types::events::{ReactionAction, ServerEvent};
use parley_types::models::Identity;
use parley_types::notify::{NotificationEvent, Topic};
use parley_types::rooms::RoomKey;

use crate::GatewayState;

/// Write a message, bump the conversation's recency signal, announce the
/// pointer on the cross-process channel.
///
/// Never broadcasts directly: the notifier loop on every process (this one
/// included) fans the pointer out, so clients on other processes hear about
/// the message through the same path as local ones. Publish strictly follows
/// the committed write; a failed write yields one `error` event and no
/// publish at all.
pub async fn send_message(
    state: &GatewayState,
    identity: &Identity,
    connection: Uuid,
    conversation_id: String,
    content: String,
    kind: Option<String>,
    reply: &mpsc::Sender<ServerEvent>,
) {
    let content = content.trim();
    if conversation_id.is_empty() || content.is_empty() {
        let _ = reply.send(ServerEvent::error("message is empty")).await;
        return;
    }

    let kind = kind.unwrap_or_else(|| "text".to_string());

    let message = match state
        .store
        .create_message(&conversation_id, &identity.id, content, &kind)
        .await
    {
        Ok(message) => message,
        Err(err) => {
            error!(connection = %connection, conversation = %conversation_id, error = %err,
                "message write failed");
            let _ = reply
                .send(ServerEvent::error("failed to send message"))
                .await;
            return;
        }
    };

    // Best-effort from here on: the message row already stands and will be
    // picked up on the next fetch even if the live signal is lost.
    if let Err(err) = state.store.touch_conversation(&conversation_id).await {
        warn!(conversation = %conversation_id, error = %err, "recency bump failed");
    }

    let event = NotificationEvent {
        message_id: message.id.clone(),
        conversation_id,
    };
    if let Err(err) = state.store.publish(Topic::NewMessage, &event).await {
        warn!(message = %event.message_id, conversation = %event.conversation_id, error = %err,
            "publish failed after commit, live update lost");
    }
}

/// Apply a reaction and fan it out.
///
/// The write comes first and fails loudly. Delivery afterwards is direct and
/// process-local, to the conversation room plus every participant's personal
/// room — a participant who is looking at another screen still gets the
/// signal. The reacting user's identity is the session's verified one, never
/// the client payload's.
pub async fn send_reaction(
    state: &GatewayState,
    identity: &Identity,
    connection: Uuid,
    message_id: String,
    conversation_id: String,
    emoji: String,
    action: ReactionAction,
    reply: &mpsc::Sender<ServerEvent>,
) {
    if message_id.is_empty() || conversation_id.is_empty() || emoji.is_empty() {
        let _ = reply.send(ServerEvent::error("invalid reaction")).await;
        return;
    }

    let write = match action {
        ReactionAction::Add => {
            state
                .store
                .upsert_reaction(&message_id, &identity.id, &emoji)
                .await
        }
        ReactionAction::Remove => {
            state
                .store
                .delete_reaction(&message_id, &identity.id, &emoji)
                .await
        }
    };
    if let Err(err) = write {
        error!(connection = %connection, message = %message_id, error = %err,
            "reaction write failed");
        let _ = reply
            .send(ServerEvent::error("failed to update reaction"))
            .await;
        return;
    }

    // Pure reads, safe to run concurrently.
    let (author, participants) = tokio::join!(
        state.store.message_author(&message_id),
        state.store.participants(&conversation_id),
    );

    let author = match author {
        Ok(Some(author)) => author,
        Ok(None) => {
            warn!(message = %message_id, "reacted-to message not found, broadcast skipped");
            return;
        }
        Err(err) => {
            warn!(message = %message_id, error = %err,
                "author lookup failed, broadcast skipped");
            return;
        }
    };

    let event = ServerEvent::Reaction {
        message_id,
        conversation_id: conversation_id.clone(),
        emoji,
        action,
        user_id: identity.id.clone(),
        user_name: identity.name().to_string(),
        message_author_id: author.clone(),
        timestamp: Utc::now(),
    };

    state
        .rooms
        .deliver(&RoomKey::conversation(conversation_id.clone()), &event)
        .await;

    match participants {
        Ok(participants) => {
            for user_id in participants {
                state.rooms.deliver(&RoomKey::user(user_id), &event).await;
            }
        }
        Err(err) => {
            // Degraded: the conversation room already got the event.
            warn!(conversation = %conversation_id, error = %err,
                "participant lookup failed, personal-room fan-out skipped");
        }
    }

    if action == ReactionAction::Add && author != identity.id {
        if let Err(err) = state.store.touch_conversation(&conversation_id).await {
            warn!(conversation = %conversation_id, error = %err, "recency bump failed");
        }
    }
}
