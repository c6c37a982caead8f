use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::config::AuthConfig;
use crate::error::{EtlError, Result};

/// Bearer token for the change API.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Placeholder used when a run proceeds without authentication.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token(***)")
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Client-credentials token exchange against the OAuth2 v2.0 endpoint.
pub struct TokenProvider {
    client: Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl TokenProvider {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("snowdrift/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EtlError::Config(format!("Failed to create HTTP client: {e}")))?;

        let authority = config.authority.trim_end_matches('/');
        let token_url = Url::parse(&format!(
            "{authority}/{}/oauth2/v2.0/token",
            config.tenant_id
        ))
        .map_err(|e| EtlError::Config(format!("Invalid token URL: {e}")))?;

        Ok(Self {
            client,
            token_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
            scope: config.scope.clone(),
        })
    }

    /// Exchange the client credentials for a bearer token.
    ///
    /// # Errors
    ///
    /// Returns `EtlError::Auth` on transport failure, a non-2xx response,
    /// or a response without `access_token`.
    pub async fn fetch_token(&self) -> Result<Token> {
        debug!("Requesting token from {}", self.token_url);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| EtlError::Auth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(EtlError::Auth(format!("HTTP {status}: {body}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| EtlError::Auth(format!("Malformed token response: {e}")))?;

        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EtlError::Auth("Response carried no access_token".to_string()))?;

        info!("Acquired access token");
        Ok(Token::from(token))
    }
}
