use anyhow::Result;
use axum::{
    Router,
    body::Body,
    extract::{FromRef, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::get,
};
use axum_extra::extract::cookie::Key;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;

pub mod audit;
pub mod guard;
pub mod handlers;
pub mod provider;
pub mod session;

mod config;

pub use audit::{AuditEvent, AuditEventType, AuditLog, AuditSink, MemorySink, TracingSink};
pub use config::{ConfigError, GatewayConfig};
pub use provider::{IdentityProvider, OidcProvider, ProviderError};
pub use session::{MemorySessionStore, Session, SessionStore, UserInfo, UserSession};

/// Shared, immutable state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<GatewayConfig>,
    provider: Arc<dyn IdentityProvider>,
    sessions: Arc<dyn SessionStore>,
    audit: AuditLog,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        provider: Arc<dyn IdentityProvider>,
        sessions: Arc<dyn SessionStore>,
        audit: AuditLog,
    ) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            sessions,
            audit,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub fn provider(&self) -> &dyn IdentityProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.config.cookie_key().clone()
    }
}

/// Build the gateway routes. Routes that need a session sit behind [`guard::require_auth`].
#[must_use]
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/protected", get(handlers::protected))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guard::require_auth,
        ));

    Router::new()
        .route("/", get(handlers::home))
        .route("/login", get(handlers::login))
        .route("/callback", get(handlers::callback).post(handlers::callback))
        .route("/logout", get(handlers::logout))
        .route("/health", get(handlers::health).options(handlers::health))
        .merge(protected)
        .with_state(state)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn serve(port: u16, state: AppState) -> Result<()> {
    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}
