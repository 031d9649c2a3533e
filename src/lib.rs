pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod redis;
pub mod services;
pub mod sessions;
pub mod store;

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::Config, services::vote_service::VoteLedger, sessions::SessionCache, store::Store,
};

/// Shared handler state. `S` is `PgStore` in the binary and `MemoryStore` in tests.
#[derive(Clone)]
pub struct AppState<S> {
    pub store: S,
    pub ledger: Arc<VoteLedger<S>>,
    pub sessions: Arc<dyn SessionCache>,
    pub config: Arc<Config>,
}

impl<S: Store> AppState<S> {
    pub fn new(store: S, sessions: Arc<dyn SessionCache>, config: Config) -> Self {
        let ledger = VoteLedger::with_max_attempts(store.clone(), config.vote_max_attempts);
        Self {
            store,
            ledger: Arc::new(ledger),
            sessions,
            config: Arc::new(config),
        }
    }
}

pub fn create_app<S: Store>(state: AppState<S>) -> Router {
    let origins = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid allowed origin: {}", origin);
                None
            }
        })
        .collect::<Vec<_>>();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE]);

    let post_routes = Router::new()
        .route(
            "/api/posts",
            get(handlers::posts::get_posts::<S>).post(handlers::posts::create_post::<S>),
        )
        .route(
            "/api/posts/{post_id}",
            get(handlers::posts::get_post::<S>)
                .put(handlers::posts::update_post::<S>)
                .delete(handlers::posts::delete_post::<S>),
        )
        .route(
            "/api/posts/{post_id}/vote",
            post(handlers::posts::vote_post::<S>),
        );

    Router::new()
        .route("/health", get(handlers::health::health::<S>))
        .merge(post_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
