use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accounts file (no secrets). Stored as JSON: `{"accounts": [...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AccountsFile {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// An account the tools are permitted to act for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub account_type: String,
    #[serde(default)]
    pub extra_info: String,
}

impl Account {
    pub fn to_description(&self) -> String {
        format!(
            "Account for email: {} of type: {}. Extra info for: {}",
            self.email, self.account_type, self.extra_info
        )
    }
}

/// OAuth credential for one account. Stored as `.oauth2.<account>.json` with 0600 perms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub account_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Where a stored credential sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Access token usable as-is.
    Valid,
    /// Access token expired, refresh token available.
    Expired,
    /// Access token expired and nothing to refresh with; must re-authorize.
    Terminal,
}

impl Credential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> CredentialState {
        match (self.is_expired_at(now), self.refresh_token.is_some()) {
            (false, _) => CredentialState::Valid,
            (true, true) => CredentialState::Expired,
            (true, false) => CredentialState::Terminal,
        }
    }
}

/// Ephemeral result of the authorization redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationState {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// User identity as reported by the provider's `/v2/user/me`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub kakao_account: Option<IdentityAccount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IdentityAccount {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile: Option<IdentityProfile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IdentityProfile {
    #[serde(default)]
    pub nickname: Option<String>,
}

impl Identity {
    pub fn email(&self) -> Option<&str> {
        self.kakao_account.as_ref()?.email.as_deref()
    }

    pub fn nickname(&self) -> Option<&str> {
        self.kakao_account.as_ref()?.profile.as_ref()?.nickname.as_deref()
    }

    /// Key used to store credentials: email, else the numeric user id.
    pub fn account_key(&self) -> Option<String> {
        self.email()
            .map(str::to_string)
            .or_else(|| self.id.map(|id| id.to_string()))
    }
}
