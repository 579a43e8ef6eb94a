//! Backend of a crowdsourced price board.
//!
//! Users post the price they saw for a product at an address, browse what
//! others posted around a point, and like or dislike posts.
//!
//! # Endpoints
//!
//! | method | path                      | purpose                                   |
//! |--------|---------------------------|-------------------------------------------|
//! | GET    | `/`                       | liveness                                  |
//! | GET    | `/prices`                 | radius/product search, see [`search`]     |
//! | POST   | `/prices`                 | submit a price                            |
//! | PATCH  | `/feedback`               | like/dislike toggle                       |
//! | POST   | `/users`                  | sign in (create-or-get the user record)   |
//! | GET    | `/users/{email}`          | user record                               |
//! | GET    | `/users/{email}/feedback` | ids the user liked/disliked               |
//! | GET    | `/users/{email}/posts`    | full posts the user liked/disliked/wrote  |
//!
//! # Acting User
//!
//! There is no server-side session. The acting user's email travels with each
//! request (`email` in the body or query string), the sign-in flow on the
//! frontend being responsible for it.
//!
//! # Storage
//!
//! `STORE_BACKEND=redis` (default) keeps everything in Redis, see [`database`].
//! `STORE_BACKEND=memory` keeps everything in process, handy for local runs.
//!
//! # Setup
//!
//! Run against a local Redis.
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 RUST_LOG=info cargo run -p server
//! ```
//!
//! Run without Redis.
//! ```sh
//! STORE_BACKEND=memory RUST_LOG=debug cargo run -p server
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::Error;
use axum::{
    Router,
    http::{HeaderValue, Method, header::CONTENT_TYPE},
    routing::{get, patch, post},
};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::{net::TcpListener, signal::ctrl_c};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod error;
pub mod routes;
pub mod search;
pub mod state;
pub mod utils;

use config::Config;
use routes::{
    feedback_handler, health_handler, insert_handler, search_handler, sign_in_handler,
    user_feedback_handler, user_handler, user_posts_handler,
};
use state::State;

pub fn app(state: Arc<State>) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            origin
                .parse::<HeaderValue>()
                .map_err(|_| warn!("Ignoring invalid CORS origin {origin}"))
                .ok()
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/", get(health_handler))
        .route("/prices", get(search_handler).post(insert_handler))
        .route("/feedback", patch(feedback_handler))
        .route("/users", post(sign_in_handler))
        .route("/users/{email}", get(user_handler))
        .route("/users/{email}/feedback", get(user_feedback_handler))
        .route("/users/{email}/posts", get(user_posts_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server() -> Result<(), Error> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = State::new(config).await?;

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
