use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::types::*;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("credential file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("credential file {} is not valid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum AccountsError {
    #[error("cannot read accounts file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("accounts file {} is malformed: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no accounts specified in {}", .0.display())]
    Empty(PathBuf),
}

/// One JSON file per account under a single directory.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic file name for an account; the id is percent-encoded so
    /// it can never escape the directory.
    pub fn path_for(&self, account_id: &str) -> PathBuf {
        self.dir
            .join(format!(".oauth2.{}.json", urlencoding::encode(account_id)))
    }

    /// Absent is `Ok(None)`, not an error: first use has no file yet.
    pub fn load(&self, account_id: &str) -> Result<Option<Credential>, StoreError> {
        let path = self.path_for(account_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no stored credentials yet");
                return Ok(None);
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let credential = serde_json::from_str(&contents)
            .map_err(|source| StoreError::Json { path, source })?;
        Ok(Some(credential))
    }

    pub fn save(&self, credential: &Credential, account_id: &str) -> Result<(), StoreError> {
        let path = self.path_for(account_id);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let contents = serde_json::to_string_pretty(credential).map_err(|source| {
            StoreError::Json {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, contents).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(0o600)) {
                warn!(path = %path.display(), error = %e, "could not restrict credential file permissions");
            }
        }

        debug!(account = account_id, path = %path.display(), "stored credentials");
        Ok(())
    }
}

/// Static list of permitted accounts, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AccountRegistry {
    accounts: Vec<Account>,
}

impl AccountRegistry {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self { accounts }
    }

    pub fn load(path: &Path) -> Result<Self, AccountsError> {
        let contents = fs::read_to_string(path).map_err(|source| AccountsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: AccountsFile =
            serde_json::from_str(&contents).map_err(|source| AccountsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if file.accounts.is_empty() {
            return Err(AccountsError::Empty(path.to_path_buf()));
        }
        Ok(Self::new(file.accounts))
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn get(&self, email: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.email == email)
    }

    pub fn contains(&self, email: &str) -> bool {
        self.get(email).is_some()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.accounts.iter().map(Account::to_description).collect()
    }
}
