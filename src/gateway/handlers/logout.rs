use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use tracing::info;

use super::ClientIp;
use crate::gateway::{
    AppState,
    audit::{AuditEvent, AuditEventType, UNKNOWN},
    session::CurrentSession,
};

/// Clear the local session and send the browser to the provider's logout endpoint.
///
/// Works with or without a session; an anonymous logout is audited as `unknown`.
pub async fn logout(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    session: CurrentSession,
) -> Response {
    let (user_id, email) = session.user().map_or_else(
        || (UNKNOWN.to_string(), UNKNOWN.to_string()),
        |user| (user.user_id().to_string(), user.email().to_string()),
    );

    state
        .audit()
        .log_event(AuditEvent::new(AuditEventType::UserLogout, ip).with_user(&user_id, &email));

    let jar = session.destroy(state.sessions()).await;

    info!("User {user_id} logged out");

    (jar, Redirect::to(state.config().logout_url().as_str())).into_response()
}
