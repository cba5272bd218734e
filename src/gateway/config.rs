//! Immutable gateway configuration, built once at startup.

use axum_extra::extract::cookie::Key;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha512};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid provider domain: {0:?}")]
    ProviderDomain(String),

    #[error("client id must not be empty")]
    ClientId,

    #[error("session secret must not be empty")]
    SecretKey,

    #[error("invalid base URL {url:?}: {reason}")]
    BaseUrl { url: String, reason: String },
}

#[derive(Clone)]
pub struct GatewayConfig {
    base_url: Url,
    callback_url: Url,
    logout_url: Url,
    provider_domain: String,
    client_id: String,
    cookie_key: Key,
    trust_forwarded: bool,
}

impl GatewayConfig {
    /// Build the configuration.
    ///
    /// `base_url` is the externally visible root of the gateway; callback and
    /// logout return URLs are derived from it. The cookie key is derived from
    /// `secret_key` so any non-empty secret works.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a value cannot be used.
    pub fn new(
        base_url: Url,
        provider_domain: &str,
        client_id: &str,
        secret_key: &SecretString,
    ) -> Result<Self, ConfigError> {
        let base_url = normalize_base_url(base_url)?;
        let provider_domain = validate_domain(provider_domain)?;

        if client_id.trim().is_empty() {
            return Err(ConfigError::ClientId);
        }

        let secret = secret_key.expose_secret();
        if secret.is_empty() {
            return Err(ConfigError::SecretKey);
        }
        // SHA-512 yields exactly the 64 bytes a cookie key needs.
        let cookie_key = Key::from(Sha512::digest(secret.as_bytes()).as_slice());

        let callback_url = base_url.join("callback").map_err(|e| ConfigError::BaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let mut logout_url = Url::parse(&format!("https://{provider_domain}/v2/logout"))
            .map_err(|_| ConfigError::ProviderDomain(provider_domain.clone()))?;
        logout_url
            .query_pairs_mut()
            .append_pair("returnTo", base_url.as_str())
            .append_pair("client_id", client_id);

        Ok(Self {
            base_url,
            callback_url,
            logout_url,
            provider_domain,
            client_id: client_id.to_string(),
            cookie_key,
            trust_forwarded: false,
        })
    }

    /// Take the client address from `X-Forwarded-For`/`X-Real-IP`. Only safe
    /// behind a proxy that overwrites those headers.
    #[must_use]
    pub fn with_trust_forwarded(mut self, trust_forwarded: bool) -> Self {
        self.trust_forwarded = trust_forwarded;
        self
    }

    #[must_use]
    pub fn trust_forwarded(&self) -> bool {
        self.trust_forwarded
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL the provider redirects back to after authorization.
    #[must_use]
    pub fn callback_url(&self) -> &Url {
        &self.callback_url
    }

    /// Provider logout endpoint with `returnTo` and `client_id` filled in.
    #[must_use]
    pub fn logout_url(&self) -> &Url {
        &self.logout_url
    }

    #[must_use]
    pub fn provider_domain(&self) -> &str {
        &self.provider_domain
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn cookie_key(&self) -> &Key {
        &self.cookie_key
    }

    /// Only mark cookies secure when the gateway is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.base_url.scheme() == "https"
    }

    /// Browser-facing path of a route, honoring any prefix in the base URL.
    #[must_use]
    pub fn route_path(&self, route: &str) -> String {
        self.base_url
            .join(route)
            .map_or_else(|_| format!("/{route}"), |url| url.path().to_string())
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url.as_str())
            .field("provider_domain", &self.provider_domain)
            .field("client_id", &self.client_id)
            .field("trust_forwarded", &self.trust_forwarded)
            .finish_non_exhaustive()
    }
}

fn normalize_base_url(mut url: Url) -> Result<Url, ConfigError> {
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::BaseUrl {
            url: url.to_string(),
            reason: "must be an absolute http(s) URL".to_string(),
        });
    }

    url.set_query(None);
    url.set_fragment(None);

    // Relative joins only keep the path when it ends with a slash.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

fn validate_domain(domain: &str) -> Result<String, ConfigError> {
    let domain = domain.trim().trim_end_matches('/');
    let domain = domain
        .strip_prefix("https://")
        .unwrap_or(domain)
        .to_string();

    if domain.is_empty() || domain.contains(['/', '?', '#', ' ', '@']) {
        return Err(ConfigError::ProviderDomain(domain));
    }

    Ok(domain)
}
