use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use parley_types::events::{ClientEvent, ServerEvent};
use parley_types::models::Identity;
use parley_types::rooms::RoomKey;

use crate::GatewayState;
use crate::auth::AuthError;
use crate::handlers;
use crate::rooms::OUTBOUND_BUFFER;

/// Server sends a Ping every 15 seconds; two consecutive missed Pongs
/// (~30s) drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a connection without a query token may take to present an
/// identify frame before the handshake is abandoned.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// One live client connection. Created only after the token verified; the
/// joined set is shared with the read task and drained on close.
#[derive(Clone)]
pub(crate) struct Session {
    pub id: Uuid,
    pub identity: Identity,
    joined: Arc<Mutex<HashSet<RoomKey>>>,
    pub tx: mpsc::Sender<ServerEvent>,
}

impl Session {
    pub(crate) async fn join(&self, state: &GatewayState, room: RoomKey) {
        state
            .rooms
            .register(room.clone(), self.id, self.tx.clone())
            .await;
        self.joined
            .lock()
            .expect("joined set lock poisoned")
            .insert(room);
    }

    pub(crate) async fn leave(&self, state: &GatewayState, room: &RoomKey) {
        state.rooms.unregister(room, self.id).await;
        self.joined
            .lock()
            .expect("joined set lock poisoned")
            .remove(room);
    }

    /// Release every local room registration. Terminal.
    pub(crate) async fn close(&self, state: &GatewayState) {
        let rooms: Vec<RoomKey> = self
            .joined
            .lock()
            .expect("joined set lock poisoned")
            .drain()
            .collect();
        for room in rooms {
            state.rooms.unregister(&room, self.id).await;
        }
    }
}

/// Verify the token and bring a session to the Active state: the personal
/// room is auto-joined, nothing else. Any auth failure leaves zero
/// registrations behind.
pub(crate) async fn open_session(
    state: &GatewayState,
    token: Option<&str>,
) -> Result<(Session, mpsc::Receiver<ServerEvent>), AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;
    let identity = state.verifier.verify(token)?;

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let session = Session {
        id: Uuid::new_v4(),
        identity,
        joined: Arc::new(Mutex::new(HashSet::new())),
        tx,
    };
    let personal = RoomKey::user(session.identity.id.clone());
    session.join(state, personal).await;

    Ok((session, rx))
}

/// Drive one WebSocket connection from handshake to close.
pub async fn handle_socket(
    socket: WebSocket,
    state: Arc<GatewayState>,
    query_token: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();

    let token = match query_token {
        Some(token) => Some(token),
        None => wait_for_identify(&mut receiver).await,
    };

    let (session, mut rx) = match open_session(&state, token.as_deref()).await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(error = %err, "gateway handshake rejected");
            return;
        }
    };

    info!(connection = %session.id, user = %session.identity.id, "connected to gateway");

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_send = pong_received.clone();
    let pong_recv = pong_received.clone();

    // Forward room deliveries and handler replies to the client, with
    // heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout, dropping connection");
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read client events and dispatch.
    let recv_state = state.clone();
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => dispatch(&recv_state, &recv_session, event).await,
                    Err(err) => {
                        warn!(connection = %recv_session.id, error = %err,
                            "unparseable client event");
                        let _ = recv_session
                            .tx
                            .send(ServerEvent::error("unrecognized event"))
                            .await;
                    }
                },
                Message::Pong(_) => pong_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    session.close(&state).await;
    info!(connection = %session.id, user = %session.identity.id, "disconnected from gateway");
}

/// Dispatch one inbound event. Store-touching handlers are spawned so a
/// slow store call never blocks this connection's read loop; handlers may
/// interleave and no cross-event ordering is promised.
async fn dispatch(state: &Arc<GatewayState>, session: &Session, event: ClientEvent) {
    match event {
        // Handshake concern; ignored once active.
        ClientEvent::Identify { .. } => {}

        ClientEvent::JoinConversation { conversation_id } => {
            if conversation_id.is_empty() {
                let _ = session
                    .tx
                    .send(ServerEvent::error("invalid conversation"))
                    .await;
                return;
            }
            // Membership was authorized by the layer that handed out the
            // conversation id; only well-formedness is checked here.
            session
                .join(state, RoomKey::conversation(conversation_id))
                .await;
        }

        ClientEvent::LeaveConversation { conversation_id } => {
            session
                .leave(state, &RoomKey::conversation(conversation_id))
                .await;
        }

        ClientEvent::SendMessage {
            conversation_id,
            content,
            kind,
        } => {
            let state = state.clone();
            let identity = session.identity.clone();
            let connection = session.id;
            let reply = session.tx.clone();
            tokio::spawn(async move {
                handlers::send_message(
                    &state,
                    &identity,
                    connection,
                    conversation_id,
                    content,
                    kind,
                    &reply,
                )
                .await;
            });
        }

        ClientEvent::SendReaction {
            message_id,
            conversation_id,
            emoji,
            action,
        } => {
            let state = state.clone();
            let identity = session.identity.clone();
            let connection = session.id;
            let reply = session.tx.clone();
            tokio::spawn(async move {
                handlers::send_reaction(
                    &state,
                    &identity,
                    connection,
                    message_id,
                    conversation_id,
                    emoji,
                    action,
                    &reply,
                )
                .await;
            });
        }
    }
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<String> {
    let deadline = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientEvent::Identify { token }) =
                    serde_json::from_str::<ClientEvent>(&text)
                {
                    return Some(token);
                }
            }
        }
        None
    });

    deadline.await.ok().flatten()
}
