//! Session guard for routes that need an authenticated user.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;

use super::{
    AppState,
    audit::{AuditEvent, AuditEventType},
    handlers::ClientIp,
    session::CurrentSession,
};

/// Redirect anonymous sessions to `/login`, otherwise hand the request on.
///
/// The authenticated [`UserSession`](super::session::UserSession) is placed in
/// the request extensions for the wrapped handler.
pub async fn require_auth(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    session: CurrentSession,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(user) = session.into_user() else {
        state.audit().log_event(
            AuditEvent::new(AuditEventType::UnauthorizedAccess, ip)
                .with_path(request.uri().path()),
        );
        return Redirect::to(&state.config().route_path("login")).into_response();
    };

    debug!("Session authenticated for {}", user.user_id());
    request.extensions_mut().insert(user);
    next.run(request).await
}
