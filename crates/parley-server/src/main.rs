use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_db::Database;
use parley_db::listen::PgChannel;
use parley_gateway::auth::Verifier;
use parley_gateway::rooms::Rooms;
use parley_gateway::{GatewayState, connection, notifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("PARLEY_JWT_SECRET").ok();
    if jwt_secret.as_deref().is_none_or(str::is_empty) {
        warn!("PARLEY_JWT_SECRET is not set; every connection will be refused");
    }
    let database_url = std::env::var("PARLEY_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/parley".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    let db = Database::connect(&database_url).await?;

    // Shared state: constructed once, injected everywhere.
    let state = Arc::new(GatewayState {
        store: Arc::new(db.clone()),
        verifier: Verifier::new(jwt_secret.as_deref()),
        rooms: Rooms::new(),
    });

    // One subscription per process to the shared channel; the loop
    // reconnects on its own if the subscription drops.
    let channel = Arc::new(PgChannel::new(db.pool().clone()));
    tokio::spawn(notifier::run(channel, state.rooms.clone()));

    let app = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("parley relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state, query.token))
}
