//! End-to-end walk through a browser session: login, callback, protected
//! access, logout.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use authgate::gateway::{
    AppState, AuditEventType, AuditLog, GatewayConfig, IdentityProvider, MemorySessionStore,
    MemorySink, ProviderError, UserInfo, UserSession,
    provider::{AuthorizationRedirect, AuthorizationResponse},
    router,
    session::PendingAuthorization,
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        Request, Response, StatusCode,
        header::{COOKIE, LOCATION, SET_COOKIE},
    },
};
use secrecy::SecretString;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;
use url::Url;

/// Accepts exactly one authorization code and hands out a fixed identity.
struct FakeProvider;

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn authorize_redirect(
        &self,
        redirect_uri: &Url,
    ) -> Result<AuthorizationRedirect, ProviderError> {
        let mut url = Url::parse("https://idp.test/authorize")
            .map_err(|err| ProviderError::Configuration(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("state", "xyz")
            .append_pair("redirect_uri", redirect_uri.as_str());

        Ok(AuthorizationRedirect {
            url,
            pending: PendingAuthorization {
                state: "xyz".to_string(),
                nonce: "n".to_string(),
                pkce_verifier: "v".to_string(),
                redirect_uri: redirect_uri.to_string(),
            },
        })
    }

    async fn authorize_access_token(
        &self,
        response: AuthorizationResponse,
        pending: Option<PendingAuthorization>,
    ) -> Result<UserSession, ProviderError> {
        let (code, _) = response.verify(pending)?;
        if code != "valid-code" {
            return Err(ProviderError::TokenExchange("invalid_grant".to_string()));
        }

        Ok(UserSession::new(
            "at-123",
            "eyJhbGciOiJSUzI1NiJ9.e30.sig",
            UserInfo::new("u1").with_email("a@b.com"),
        ))
    }
}

async fn send(app: &Router, uri: &str, cookie: Option<&str>) -> Result<Response<Body>> {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(COOKIE, cookie);
    }
    Ok(app.clone().oneshot(request.body(Body::empty())?).await?)
}

fn location(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn cookie_pair(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .find(|pair| {
            pair.starts_with("authgate_session=") && pair.len() > "authgate_session=".len()
        })
        .map(ToString::to_string)
}

#[tokio::test]
async fn login_protected_logout_round_trip() -> Result<()> {
    let config = GatewayConfig::new(
        Url::parse("http://localhost:3000")?,
        "idp.test",
        "client",
        &SecretString::from("a-very-secret-key"),
    )?;
    let audit = MemorySink::new();
    let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(3600)));
    let app = router(AppState::new(
        config,
        Arc::new(FakeProvider),
        sessions.clone(),
        AuditLog::new(Arc::new(audit.clone())),
    ));

    // nothing stored yet
    assert!(sessions.is_empty().await);

    let response = send(&app, "/login", None).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = location(&response).context("login has no redirect")?;
    assert!(target.starts_with("https://idp.test/authorize?"));
    let cookie = cookie_pair(&response).context("login sets no cookie")?;

    let response = send(&app, "/callback?code=valid-code&state=xyz", Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/"));
    let cookie = cookie_pair(&response).unwrap_or(cookie);

    let response = send(&app, "/protected", Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let claims: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(claims["sub"], "u1");
    assert_eq!(claims["email"], "a@b.com");

    let response = send(&app, "/", Some(&cookie)).await?;
    let home: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(home["user"]["access_token"], "at-123");
    assert_eq!(home["user"]["id_token"], "eyJhbGciOiJSUzI1NiJ9.e30.sig");

    let response = send(&app, "/logout", Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let Some(target) = location(&response) else {
        bail!("logout has no redirect");
    };
    assert!(target.starts_with("https://idp.test/v2/logout?returnTo="));
    assert!(sessions.is_empty().await);

    let response = send(&app, "/protected", Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/login"));

    let trail: Vec<AuditEventType> = audit
        .events()
        .iter()
        .map(authgate::gateway::AuditEvent::event_type)
        .collect();
    assert_eq!(
        trail,
        vec![
            AuditEventType::UserLogin,
            AuditEventType::ProtectedRouteAccess,
            AuditEventType::UserLogout,
            AuditEventType::UnauthorizedAccess,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn rejected_code_keeps_session_anonymous() -> Result<()> {
    let config = GatewayConfig::new(
        Url::parse("http://localhost:3000")?,
        "idp.test",
        "client",
        &SecretString::from("a-very-secret-key"),
    )?;
    let audit = MemorySink::new();
    let app = router(AppState::new(
        config,
        Arc::new(FakeProvider),
        Arc::new(MemorySessionStore::new(Duration::from_secs(3600))),
        AuditLog::new(Arc::new(audit.clone())),
    ));

    let response = send(&app, "/login", None).await?;
    let cookie = cookie_pair(&response).context("login sets no cookie")?;

    let response = send(&app, "/callback?code=stolen&state=xyz", Some(&cookie)).await?;
    let target = location(&response).context("callback has no redirect")?;
    assert!(target.starts_with("/?error=Login+failed"));

    let response = send(&app, "/protected", Some(&cookie)).await?;
    assert_eq!(location(&response).as_deref(), Some("/login"));
    assert_eq!(audit.count(AuditEventType::LoginFailed), 1);
    assert_eq!(audit.count(AuditEventType::UnauthorizedAccess), 1);
    Ok(())
}
