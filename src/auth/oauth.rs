use chrono::{DateTime, Duration, Utc};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use super::error::AuthError;
use crate::config::OAuthConfig;
use crate::storage::{Credential, CredentialState, CredentialStore, Identity};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    refresh_token_expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// `now + secs`, or an error message when the provider's lifetime is out of range.
fn expiry_after(now: DateTime<Utc>, secs: i64) -> Result<DateTime<Utc>, String> {
    Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| format!("unexpected token response: token lifetime {}s is out of range", secs))
}

impl TokenResponse {
    fn into_credential(self, account_id: String, now: DateTime<Utc>) -> Result<Credential, String> {
        let refresh_token_expires_at = match self.refresh_token_expires_in {
            Some(secs) => Some(expiry_after(now, secs)?),
            None => None,
        };
        Ok(Credential {
            account_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at: expiry_after(now, self.expires_in)?,
            refresh_token_expires_at,
            scopes: scopes_of(self.scope.as_deref()),
        })
    }
}

fn scopes_of(scope: Option<&str>) -> Vec<String> {
    scope
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Human-readable reason from a token endpoint failure body.
fn describe_failure(status: StatusCode, body: &str) -> String {
    let parsed: TokenErrorResponse = serde_json::from_str(body).unwrap_or_default();
    match (parsed.error, parsed.error_description) {
        (Some(error), Some(desc)) => format!("{} ({}): {}", error, status.as_u16(), desc),
        (Some(error), None) => format!("{} ({})", error, status.as_u16()),
        _ => format!("status {}: {}", status.as_u16(), body),
    }
}

fn synthetic_account_id() -> String {
    format!("user_{}", Utc::now().timestamp())
}

/// Authorization-code flow against the provider, persisting through a
/// [`CredentialStore`].
pub struct OAuthFlow {
    config: OAuthConfig,
    store: CredentialStore,
    http: Client,
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig, store: CredentialStore) -> Self {
        Self {
            config,
            store,
            http: Client::new(),
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Provider authorization URL. `state` is echoed back on redirect and is
    /// omitted when empty.
    pub fn authorization_url(&self, state: Option<&str>) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("response_type", "code");
        if !self.config.scopes.is_empty() {
            query.append_pair("scope", &self.config.scopes.join(" "));
        }
        if let Some(state) = state.filter(|s| !s.is_empty()) {
            query.append_pair("state", state);
        }
        format!("{}?{}", self.config.authorize_endpoint(), query.finish())
    }

    fn token_request(
        &self,
        grant: &[(&str, &str)],
    ) -> reqwest::Result<reqwest::blocking::Response> {
        let mut params: Vec<(&str, &str)> = vec![("client_id", self.config.client_id.as_str())];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        params.extend_from_slice(grant);
        self.http
            .post(self.config.token_endpoint())
            .form(&params)
            .send()
    }

    /// Exchange an authorization code. The returned credential has no
    /// account id yet; the caller keys it once the identity is known.
    pub fn exchange_code(&self, code: &str) -> Result<Credential, AuthError> {
        let exchange_failed = |message: String| AuthError::CodeExchange {
            message,
            authorization_url: None,
        };

        let response = self.token_request(&[
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code", code),
        ])?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            let message = describe_failure(status, &body);
            error!(%message, "token exchange failed");
            return Err(exchange_failed(message));
        }

        let tokens: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| exchange_failed(format!("unexpected token response: {}", e)))?;
        debug!(
            has_refresh_token = tokens.refresh_token.is_some(),
            "exchanged authorization code"
        );
        tokens
            .into_credential(String::new(), Utc::now())
            .map_err(exchange_failed)
    }

    /// Refresh an expired access token. Not expired: returned unchanged.
    pub fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            error!(account = %credential.account_id, "no refresh token available");
            return Err(AuthError::token_refresh("no refresh token available"));
        };
        if !credential.is_expired() {
            return Ok(credential.clone());
        }
        self.refresh_grant(credential, refresh_token)
    }

    fn refresh_grant(
        &self,
        credential: &Credential,
        refresh_token: &str,
    ) -> Result<Credential, AuthError> {
        info!(account = %credential.account_id, "access token expired, refreshing");

        let response = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .map_err(|e| AuthError::token_refresh(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| AuthError::token_refresh(e.to_string()))?;
        if !status.is_success() {
            let message = describe_failure(status, &body);
            error!(account = %credential.account_id, %message, "token refresh failed");
            return Err(AuthError::token_refresh(message));
        }

        let tokens: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::token_refresh(format!("unexpected token response: {}", e)))?;

        let now = Utc::now();
        let mut refreshed = credential.clone();
        refreshed.access_token = tokens.access_token;
        refreshed.expires_at =
            expiry_after(now, tokens.expires_in).map_err(AuthError::token_refresh)?;
        if let Some(token_type) = tokens.token_type {
            refreshed.token_type = token_type;
        }
        // The provider only rotates the refresh token when it is close to expiring.
        if let Some(new_refresh) = tokens.refresh_token {
            refreshed.refresh_token = Some(new_refresh);
            refreshed.refresh_token_expires_at = match tokens.refresh_token_expires_in {
                Some(secs) => Some(expiry_after(now, secs).map_err(AuthError::token_refresh)?),
                None => None,
            };
        }
        let scopes = scopes_of(tokens.scope.as_deref());
        if !scopes.is_empty() {
            refreshed.scopes = scopes;
        }

        info!(account = %credential.account_id, "refreshed access token");
        Ok(refreshed)
    }

    /// `Ok(None)` means the token was rejected with 401.
    fn fetch_identity(&self, access_token: &str) -> Result<Option<Identity>, AuthError> {
        let response = self
            .http
            .get(self.config.user_info_endpoint())
            .bearer_auth(access_token)
            .send()?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            error!(status = status.as_u16(), %body, "error fetching user info");
            return Err(AuthError::IdentityLookup {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Some(response.json()?))
    }

    /// Look up who the credential belongs to. An expired token is refreshed
    /// first; a 401 triggers one forced refresh and a single retry. Any
    /// refresh is written back into `credential`.
    pub fn get_user_identity(&self, credential: &mut Credential) -> Result<Identity, AuthError> {
        if credential.is_expired() {
            *credential = self.refresh(credential)?;
        }

        let identity = match self.fetch_identity(&credential.access_token)? {
            Some(identity) => identity,
            None => {
                warn!(account = %credential.account_id, "access token rejected, refreshing once");
                let refresh_token = credential
                    .refresh_token
                    .clone()
                    .ok_or_else(|| AuthError::token_refresh("no refresh token available"))?;
                *credential = self.refresh_grant(credential, &refresh_token)?;
                self.fetch_identity(&credential.access_token)?
                    .ok_or_else(|| AuthError::IdentityLookup {
                        status: StatusCode::UNAUTHORIZED.as_u16(),
                        body: "access token rejected after refresh".to_string(),
                    })?
            }
        };

        if identity.account_key().is_none() {
            error!("no user id found in identity response");
            return Err(AuthError::NoIdentity);
        }
        Ok(identity)
    }

    /// Turn a redirected authorization code into stored credentials.
    ///
    /// With a refresh token the credential is keyed by the user's identity
    /// (or a synthetic `user_<unix time>` id when the lookup fails) and saved.
    /// Without one, the identity is resolved with the fresh access token and
    /// a previously stored credential for it is reused.
    pub fn get_credentials(
        &self,
        code: &str,
        state: Option<&str>,
    ) -> Result<Credential, AuthError> {
        let mut credential = self
            .exchange_code(code)
            .map_err(|e| e.with_authorization_url(self.authorization_url(state)))?;

        if credential.refresh_token.is_some() {
            let account_id = match self.get_user_identity(&mut credential) {
                Ok(identity) => {
                    debug!(nickname = identity.nickname().unwrap_or(""), "resolved identity");
                    identity.account_key().unwrap_or_else(synthetic_account_id)
                }
                Err(e) => {
                    warn!(error = %e, "failed to get user info, using synthetic account id");
                    synthetic_account_id()
                }
            };
            credential.account_id = account_id.clone();
            self.store.save(&credential, &account_id)?;
            info!(account = %account_id, "stored new credentials");
            return Ok(credential);
        }

        match self.get_user_identity(&mut credential) {
            Ok(identity) => {
                if let Some(key) = identity.account_key() {
                    if let Some(mut stored) = self.store.load(&key)? {
                        if stored.refresh_token.is_some() {
                            stored.access_token = credential.access_token;
                            stored.token_type = credential.token_type;
                            stored.expires_at = credential.expires_at;
                            self.store.save(&stored, &key)?;
                            info!(account = %key, "reused stored refresh token");
                            return Ok(stored);
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not resolve identity for stored credential lookup"),
        }

        error!("no refresh token could be retrieved");
        Err(AuthError::NoRefreshToken {
            authorization_url: self.authorization_url(state),
        })
    }

    /// Valid credentials for `account_id`, refreshing and re-saving when the
    /// access token has expired.
    pub fn ensure_credentials(&self, account_id: &str) -> Result<Credential, AuthError> {
        let Some(credential) = self.store.load(account_id)? else {
            return Err(AuthError::NotAuthorized {
                account: account_id.to_string(),
                authorization_url: self.authorization_url(None),
            });
        };

        match credential.state_at(Utc::now()) {
            CredentialState::Valid => Ok(credential),
            CredentialState::Expired => {
                let refreshed = self
                    .refresh(&credential)
                    .map_err(|e| e.with_authorization_url(self.authorization_url(None)))?;
                self.store.save(&refreshed, account_id)?;
                Ok(refreshed)
            }
            CredentialState::Terminal => Err(AuthError::TokenRefresh {
                message: "access token expired and no refresh token stored".to_string(),
                authorization_url: Some(self.authorization_url(None)),
            }),
        }
    }
}
