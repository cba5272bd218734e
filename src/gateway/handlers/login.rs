use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use tracing::{debug, error};

use super::{ClientIp, mentions};
use crate::gateway::{
    AppState,
    audit::{AuditEvent, AuditEventType},
    session::CurrentSession,
};

pub const INVALID_CALLBACK_BODY: &str = "Invalid callback URL configured";
pub const LOGIN_FAILED_BODY: &str = "Login initiation failed";

/// Start the authorization-code flow by redirecting to the provider.
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    uri: Uri,
    mut session: CurrentSession,
) -> Response {
    let redirect = match state
        .provider()
        .authorize_redirect(state.config().callback_url())
        .await
    {
        Ok(redirect) => redirect,
        Err(err) => return login_error(&state, ip, uri.path(), &err.to_string()),
    };

    session.set_pending(redirect.pending);

    match session.commit(state.sessions(), state.config()).await {
        Ok(jar) => {
            debug!("Redirecting to identity provider");
            (jar, Redirect::to(redirect.url.as_str())).into_response()
        }
        Err(err) => login_error(&state, ip, uri.path(), &err.to_string()),
    }
}

fn login_error(state: &AppState, ip: Option<String>, path: &str, message: &str) -> Response {
    error!("Login initiation failed: {message}");

    state.audit().log_event(
        AuditEvent::new(AuditEventType::LoginError, ip)
            .with_path(path)
            .with_error(message),
    );

    let body = if mentions(message, "invalid_redirect_uri") {
        INVALID_CALLBACK_BODY
    } else {
        LOGIN_FAILED_BODY
    };

    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
}
