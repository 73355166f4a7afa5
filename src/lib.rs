//! Documentation of the QR scan attribution backend.
//!
//!
//!
//! # General Infrastructure
//! - Posters in the field carry QR codes pointing at `/track/{token}`
//! - Each token is an ad/location pair signed with a server secret, so a
//!   scan URL cannot be forged or retargeted after printing
//! - The backend sits behind a reverse proxy that terminates TLS and
//!   forwards the client address in `X-Forwarded-For`
//! - Redis is the only stateful collaborator
//!
//!
//!
//! # Counting Exposures Once
//!
//! **Goal**: each real-world exposure counts at most once per cool-down
//! window, even against cookie clearing and double-taps.
//!
//! - Every visitor gets a random 128-bit session id in a long-lived cookie
//! - A scan is a duplicate when a recorded scan for the same ad/location
//!   matches the session id OR the address + user-agent pair inside the
//!   window
//! - The pre-append read is advisory; a Lua script in Redis does the
//!   check-and-set atomically, so concurrent scans resolve to one accept
//! - Dedup guards expire on their own (key TTL = window); report entries
//!   are trimmed past the retention window
//!
//!
//!
//! # Notes
//!
//! ## Redis
//! We only need atomic check-and-set plus a time-ordered log, both O(1)-ish
//! per scan. An in-memory database with TTLs gives us the cool-down window
//! for free; a search engine or SQL store would be overhead with no upside
//! at this dataset size.
//!
//! ## Known weakness
//! A client can self-assign any session id by crafting the cookie. The
//! address + user-agent key mitigates but does not solve this; see
//! DESIGN.md before strengthening.
use std::{net::SocketAddr, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::get,
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod attribution;
pub mod config;
pub mod database;
pub mod error;
pub mod registry;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod token;
pub mod utils;

use routes::{generate_handler, root_handler, scans_handler, track_handler};
use state::State;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await;

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/track/{token}", get(track_handler).post(track_handler))
        .route("/scans", get(scans_handler))
        .route("/generate/{ad_id}/{location_id}", get(generate_handler))
        .layer(cors)
        .with_state(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap();

    println!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
