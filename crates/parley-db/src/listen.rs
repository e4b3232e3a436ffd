use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool};

use parley_types::notify::Topic;

/// One raw notification off the cross-process channel. The topic name and
/// payload text are untrusted until the notifier decodes them.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("channel closed")]
    Closed,
}

/// A live subscription to the shared channel. Dropping it abandons the
/// subscription; the notifier resubscribes through [`Channel`].
#[async_trait]
pub trait Subscription: Send {
    async fn next(&mut self) -> Result<ChannelMessage, ChannelError>;
}

/// The cross-process publish/subscribe transport, abstracted so the
/// broadcaster and handlers never learn which transport is in play.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Open a fresh subscription covering every [`Topic`].
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, ChannelError>;
}

/// Production transport: Postgres `LISTEN`, fed by `pg_notify` on the
/// publish side.
pub struct PgChannel {
    pool: PgPool,
}

impl PgChannel {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Channel for PgChannel {
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, ChannelError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener
            .listen_all(Topic::ALL.iter().map(|t| t.as_str()))
            .await?;
        Ok(Box::new(PgSubscription { listener }))
    }
}

struct PgSubscription {
    listener: PgListener,
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn next(&mut self) -> Result<ChannelMessage, ChannelError> {
        let notification = self.listener.recv().await?;
        Ok(ChannelMessage {
            topic: notification.channel().to_string(),
            payload: notification.payload().to_string(),
        })
    }
}
