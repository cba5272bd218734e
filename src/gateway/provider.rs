//! Identity provider client.
//!
//! [`IdentityProvider`] is the seam between the route handlers and the OIDC
//! protocol. [`OidcProvider`] implements it on top of the `openidconnect`
//! crate: discovery, authorization URL construction (state, nonce, PKCE),
//! code exchange and ID token verification all happen there.

use async_trait::async_trait;
use openidconnect::{
    AuthenticationFlow, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointMaybeSet,
    EndpointNotSet, EndpointSet, IssuerUrl, Nonce, OAuth2TokenResponse, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse,
    core::{CoreClient, CoreProviderMetadata, CoreResponseType},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use url::Url;

use super::session::{PendingAuthorization, UserInfo, UserSession};

/// OIDC client with the endpoints `from_provider_metadata` leaves configured.
type ConfiguredClient = openidconnect::Client<
    openidconnect::EmptyAdditionalClaims,
    openidconnect::core::CoreAuthDisplay,
    openidconnect::core::CoreGenderClaim,
    openidconnect::core::CoreJweContentEncryptionAlgorithm,
    openidconnect::core::CoreJsonWebKey,
    openidconnect::core::CoreAuthPrompt,
    openidconnect::StandardErrorResponse<openidconnect::core::CoreErrorResponseType>,
    openidconnect::core::CoreTokenResponse,
    openidconnect::core::CoreTokenIntrospectionResponse,
    openidconnect::core::CoreRevocableToken,
    openidconnect::core::CoreRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "profile", "email"];

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider discovery failed: {0}")]
    Discovery(String),

    #[error("invalid_redirect_uri: {0}")]
    InvalidRedirectUri(String),

    #[error("mismatching_state: CSRF Warning! State not equal in request and response.")]
    MismatchingState,

    #[error("{error}: {description}")]
    Authorization { error: String, description: String },

    #[error("missing_code: authorization response has no code")]
    MissingCode,

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("missing_id_token: token response has no id_token")]
    MissingIdToken,

    #[error("invalid id_token: {0}")]
    IdToken(String),

    #[error("provider configuration error: {0}")]
    Configuration(String),
}

/// Where to send the browser, plus what to remember until the callback.
#[derive(Debug)]
pub struct AuthorizationRedirect {
    pub url: Url,
    pub pending: PendingAuthorization,
}

/// Parameters the provider sends back to the callback, by query string or form post.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuthorizationResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl AuthorizationResponse {
    /// Check the response against the pending authorization and return the code.
    ///
    /// Provider errors win over everything else; a missing pending authorization
    /// or a different `state` is a state mismatch.
    ///
    /// # Errors
    /// Returns [`ProviderError`] if the response cannot be exchanged.
    pub fn verify(
        self,
        pending: Option<PendingAuthorization>,
    ) -> Result<(String, PendingAuthorization), ProviderError> {
        if let Some(error) = self.error {
            return Err(ProviderError::Authorization {
                error,
                description: self.error_description.unwrap_or_default(),
            });
        }

        let pending = pending.ok_or(ProviderError::MismatchingState)?;
        if self.state.as_deref() != Some(pending.state.as_str()) {
            return Err(ProviderError::MismatchingState);
        }

        let code = self
            .code
            .filter(|code| !code.is_empty())
            .ok_or(ProviderError::MissingCode)?;

        Ok((code, pending))
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Build the authorization redirect with `redirect_uri` as the return target.
    async fn authorize_redirect(
        &self,
        redirect_uri: &Url,
    ) -> Result<AuthorizationRedirect, ProviderError>;

    /// Exchange the authorization response for tokens and verified claims.
    async fn authorize_access_token(
        &self,
        response: AuthorizationResponse,
        pending: Option<PendingAuthorization>,
    ) -> Result<UserSession, ProviderError>;
}

/// OpenID Connect provider discovered from `https://{domain}/.well-known/openid-configuration`.
pub struct OidcProvider {
    domain: String,
    client_id: String,
    client_secret: SecretString,
    scopes: Vec<String>,
    http: reqwest::Client,
    metadata: OnceCell<CoreProviderMetadata>,
}

impl OidcProvider {
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            domain: domain.into(),
            client_id: client_id.into(),
            client_secret,
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            http: reqwest::Client::new(),
            metadata: OnceCell::new(),
        }
    }

    /// Use a custom HTTP client. It should not follow redirects.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> String {
        format!("https://{}/", self.domain)
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Provider metadata is discovered once and reused for the process lifetime.
    async fn client(&self) -> Result<ConfiguredClient, ProviderError> {
        let metadata = self
            .metadata
            .get_or_try_init(|| async {
                let issuer = IssuerUrl::new(self.issuer())
                    .map_err(|e| ProviderError::Discovery(e.to_string()))?;
                debug!("Discovering OIDC provider {}", issuer.as_str());
                CoreProviderMetadata::discover_async(issuer, &self.http)
                    .await
                    .map_err(|e| ProviderError::Discovery(e.to_string()))
            })
            .await?;

        Ok(CoreClient::from_provider_metadata(
            metadata.clone(),
            ClientId::new(self.client_id.clone()),
            Some(ClientSecret::new(
                self.client_secret.expose_secret().to_string(),
            )),
        ))
    }
}

impl std::fmt::Debug for OidcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcProvider")
            .field("domain", &self.domain)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    #[instrument(skip(self), fields(domain = %self.domain))]
    async fn authorize_redirect(
        &self,
        redirect_uri: &Url,
    ) -> Result<AuthorizationRedirect, ProviderError> {
        let redirect = redirect_url(redirect_uri.as_str())?;
        let client = self.client().await?.set_redirect_uri(redirect);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = client.authorize_url(
            AuthenticationFlow::<CoreResponseType>::AuthorizationCode,
            CsrfToken::new_random,
            Nonce::new_random,
        );
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, csrf_token, nonce) = request.set_pkce_challenge(pkce_challenge).url();

        Ok(AuthorizationRedirect {
            url,
            pending: PendingAuthorization {
                state: csrf_token.secret().clone(),
                nonce: nonce.secret().clone(),
                pkce_verifier: pkce_verifier.secret().clone(),
                redirect_uri: redirect_uri.to_string(),
            },
        })
    }

    #[instrument(skip_all, fields(domain = %self.domain))]
    async fn authorize_access_token(
        &self,
        response: AuthorizationResponse,
        pending: Option<PendingAuthorization>,
    ) -> Result<UserSession, ProviderError> {
        let (code, pending) = response.verify(pending)?;

        let client = self
            .client()
            .await?
            .set_redirect_uri(redirect_url(&pending.redirect_uri)?);

        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .map_err(|e| ProviderError::Configuration(e.to_string()))?
            .set_pkce_verifier(PkceCodeVerifier::new(pending.pkce_verifier))
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::TokenExchange(e.to_string()))?;

        let id_token = token.id_token().ok_or(ProviderError::MissingIdToken)?;
        let claims = id_token
            .claims(&client.id_token_verifier(), &Nonce::new(pending.nonce))
            .map_err(|e| ProviderError::IdToken(e.to_string()))?;

        let userinfo: UserInfo = serde_json::to_value(claims)
            .and_then(serde_json::from_value)
            .map_err(|e| ProviderError::IdToken(e.to_string()))?;

        let mut user = UserSession::new(
            token.access_token().secret().clone(),
            id_token.to_string(),
            userinfo,
        );
        user.token_type = Some(token.token_type().as_ref().to_string());
        user.expires_in = token.expires_in().map(|d| d.as_secs());
        user.refresh_token = token.refresh_token().map(|t| t.secret().clone());
        user.scope = token.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|scope| scope.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        });

        Ok(user)
    }
}

fn redirect_url(uri: &str) -> Result<RedirectUrl, ProviderError> {
    let redirect = RedirectUrl::new(uri.to_string())
        .map_err(|e| ProviderError::InvalidRedirectUri(e.to_string()))?;
    if !matches!(redirect.url().scheme(), "http" | "https") {
        return Err(ProviderError::InvalidRedirectUri(format!(
            "{uri} is not an http(s) URL"
        )));
    }
    Ok(redirect)
}
