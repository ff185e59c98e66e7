use crate::storage::StoreError;

/// Failures of the credential lifecycle.
///
/// Variants that can only be fixed by running the authorization flow again
/// carry the URL to restart it from.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("authorization code exchange failed: {message}")]
    CodeExchange {
        message: String,
        authorization_url: Option<String>,
    },
    #[error("no refresh token issued and none stored")]
    NoRefreshToken { authorization_url: String },
    #[error("token refresh failed: {message}")]
    TokenRefresh {
        message: String,
        authorization_url: Option<String>,
    },
    #[error("identity lookup returned no usable identifier")]
    NoIdentity,
    #[error("no stored credentials for {account}")]
    NotAuthorized {
        account: String,
        authorization_url: String,
    },
    #[error("identity lookup failed with status {status}: {body}")]
    IdentityLookup { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    pub fn token_refresh(message: impl Into<String>) -> Self {
        Self::TokenRefresh {
            message: message.into(),
            authorization_url: None,
        }
    }

    /// URL the user should visit to recover, when recovery means re-authorizing.
    pub fn authorization_url(&self) -> Option<&str> {
        match self {
            Self::CodeExchange {
                authorization_url, ..
            }
            | Self::TokenRefresh {
                authorization_url, ..
            } => authorization_url.as_deref(),
            Self::NoRefreshToken { authorization_url }
            | Self::NotAuthorized {
                authorization_url, ..
            } => Some(authorization_url),
            _ => None,
        }
    }

    /// Attach a restart URL to variants that are fixed by re-authorizing.
    pub fn with_authorization_url(self, url: String) -> Self {
        match self {
            Self::CodeExchange { message, .. } => Self::CodeExchange {
                message,
                authorization_url: Some(url),
            },
            Self::TokenRefresh { message, .. } => Self::TokenRefresh {
                message,
                authorization_url: Some(url),
            },
            other => other,
        }
    }
}
