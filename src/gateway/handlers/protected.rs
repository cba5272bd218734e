use axum::{
    Extension,
    extract::State,
    http::Uri,
    response::{IntoResponse, Json},
};

use super::ClientIp;
use crate::gateway::{
    AppState,
    audit::{AuditEvent, AuditEventType},
    session::UserSession,
};

// only reachable through guard::require_auth, which provides the UserSession
pub async fn protected(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    uri: Uri,
    Extension(user): Extension<UserSession>,
) -> impl IntoResponse {
    state.audit().log_event(
        AuditEvent::new(AuditEventType::ProtectedRouteAccess, ip)
            .with_user(user.user_id(), user.email())
            .with_path(uri.path()),
    );

    Json(user.userinfo)
}
