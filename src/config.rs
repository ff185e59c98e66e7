use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

pub const APP_DIR: &str = "kakao-tools";
const CONFIG_FILE: &str = "config.toml";
const ACCOUNTS_FILE: &str = "accounts.json";

pub const DEFAULT_AUTH_BASE: &str = "https://kauth.kakao.com";
pub const DEFAULT_API_BASE: &str = "https://kapi.kakao.com";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8000/code";
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile_nickname", "talk_message", "account_email"];

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {} is malformed: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("client id not configured; set KAKAO_CLIENT_ID or `client_id` in {0}")]
    MissingClientId(String),
    #[error("invalid redirect uri {uri:?}: {source}")]
    RedirectUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },
}

/// On-disk `config.toml`. Every field can be overridden from the environment.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub accounts_file: Option<PathBuf>,
    pub credentials_dir: Option<PathBuf>,
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub endpoints: EndpointsSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndpointsSection {
    pub auth_base: Option<String>,
    pub api_base: Option<String>,
}

impl ConfigFile {
    /// A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// OAuth client registration and provider endpoints.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,
    pub auth_base: String,
    pub api_base: String,
}

impl OAuthConfig {
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth/authorize", self.auth_base.trim_end_matches('/'))
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth/token", self.auth_base.trim_end_matches('/'))
    }

    pub fn user_info_endpoint(&self) -> String {
        format!("{}/v2/user/me", self.api_base.trim_end_matches('/'))
    }
}

/// Command-line overrides; these win over both environment and file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub accounts_file: Option<PathBuf>,
    pub credentials_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub oauth: OAuthConfig,
    pub accounts_file: PathBuf,
    pub credentials_dir: PathBuf,
}

pub fn config_dir() -> Result<PathBuf, ConfigError> {
    Ok(dirs::config_dir().ok_or(ConfigError::NoConfigDir)?.join(APP_DIR))
}

impl Settings {
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        let dir = config_dir()?;
        let config_path = overrides
            .config
            .clone()
            .unwrap_or_else(|| dir.join(CONFIG_FILE));
        let file = ConfigFile::load(&config_path)?;
        Self::resolve(file, |key| std::env::var(key).ok(), overrides, &dir)
            .map_err(|e| match e {
                ConfigError::MissingClientId(_) => {
                    ConfigError::MissingClientId(config_path.display().to_string())
                }
                other => other,
            })
    }

    /// Layering: file < environment < command line.
    pub fn resolve(
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
        default_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let client_id = env("KAKAO_CLIENT_ID")
            .or(file.client_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ConfigError::MissingClientId(CONFIG_FILE.to_string()))?;
        let client_secret = env("KAKAO_CLIENT_SECRET")
            .or(file.client_secret)
            .filter(|s| !s.is_empty());

        let redirect = env("KAKAO_REDIRECT_URI")
            .or(file.redirect_uri)
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
        let redirect_uri = Url::parse(&redirect)
            .map_err(|source| ConfigError::RedirectUri { uri: redirect, source })?;

        let accounts_file = overrides
            .accounts_file
            .clone()
            .or_else(|| env("KAKAO_ACCOUNTS_FILE").map(PathBuf::from))
            .or(file.accounts_file)
            .unwrap_or_else(|| default_dir.join(ACCOUNTS_FILE));
        let credentials_dir = overrides
            .credentials_dir
            .clone()
            .or_else(|| env("KAKAO_CREDENTIALS_DIR").map(PathBuf::from))
            .or(file.credentials_dir)
            .unwrap_or_else(|| default_dir.to_path_buf());

        let scopes = file
            .scopes
            .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect());

        Ok(Self {
            oauth: OAuthConfig {
                client_id,
                client_secret,
                redirect_uri,
                scopes,
                auth_base: file
                    .endpoints
                    .auth_base
                    .unwrap_or_else(|| DEFAULT_AUTH_BASE.to_string()),
                api_base: file
                    .endpoints
                    .api_base
                    .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            },
            accounts_file,
            credentials_dir,
        })
    }
}
