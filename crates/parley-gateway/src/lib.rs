pub mod auth;
pub mod connection;
pub mod handlers;
pub mod notifier;
pub mod rooms;

use std::sync::Arc;

use parley_db::store::Store;

use crate::auth::Verifier;
use crate::rooms::Rooms;

/// Shared dependencies for every connection session and event handler.
/// Constructed once at process start and injected; there is no global
/// state anywhere in the relay.
pub struct GatewayState {
    pub store: Arc<dyn Store>,
    pub verifier: Verifier,
    pub rooms: Rooms,
}
