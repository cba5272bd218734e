use axum::{
    Form,
    extract::{State, rejection::FormRejection},
    http::Uri,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::PrivateCookieJar;
use tracing::{error, info, warn};

use super::{ClientIp, mentions};
use crate::gateway::{
    AppState,
    audit::{AuditEvent, AuditEventType},
    provider::AuthorizationResponse,
    session::CurrentSession,
};

pub const CSRF_STATE_MISMATCH: &str = "CSRF state mismatch";

/// Audit text for a failed login: state mismatches get a fixed description,
/// everything else is reported verbatim.
#[must_use]
pub fn normalize_login_error(message: &str) -> String {
    if mentions(message, "mismatching_state") {
        CSRF_STATE_MISMATCH.to_string()
    } else {
        message.to_string()
    }
}

/// Finish the authorization-code flow.
///
/// Accepts the provider response as a query string (GET) or a form post (POST).
pub async fn callback(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    uri: Uri,
    mut session: CurrentSession,
    params: Result<Form<AuthorizationResponse>, FormRejection>,
) -> Response {
    let params = match params {
        Ok(Form(params)) => params,
        Err(rejection) => {
            warn!("Unreadable authorization response: {rejection}");
            AuthorizationResponse::default()
        }
    };

    // The pending authorization is single use, whatever the outcome.
    let pending = session.take_pending();

    let user = match state
        .provider()
        .authorize_access_token(params, pending)
        .await
    {
        Ok(user) => user,
        Err(err) => {
            let jar = session.commit(state.sessions(), state.config()).await;
            return login_failed(&state, ip, uri.path(), &err.to_string(), jar.ok());
        }
    };

    let user_id = user.user_id().to_string();
    let email = user.email().to_string();
    session.set_user(user);

    // a fresh id for the authenticated session, the pre-login one is dropped
    if let Err(err) = session.regenerate(state.sessions()).await {
        return login_failed(&state, ip, uri.path(), &err.to_string(), None);
    }

    match session.commit(state.sessions(), state.config()).await {
        Ok(jar) => {
            state.audit().log_event(
                AuditEvent::new(AuditEventType::UserLogin, ip).with_user(&user_id, &email),
            );
            info!("User {user_id} logged in");
            (jar, Redirect::to(&state.config().route_path(""))).into_response()
        }
        Err(err) => login_failed(&state, ip, uri.path(), &err.to_string(), None),
    }
}

fn login_failed(
    state: &AppState,
    ip: Option<String>,
    path: &str,
    message: &str,
    jar: Option<PrivateCookieJar>,
) -> Response {
    error!("Login failed: {message}");

    state.audit().log_event(
        AuditEvent::new(AuditEventType::LoginFailed, ip)
            .with_path(path)
            .with_error(normalize_login_error(message)),
    );

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("error", &format!("Login failed: {message}"))
        .finish();
    let redirect = Redirect::to(&format!("{}?{query}", state.config().route_path("")));

    match jar {
        Some(jar) => (jar, redirect).into_response(),
        None => redirect.into_response(),
    }
}
