//! Registered storage accounts, persisted as JSON.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use parcel_pipeline::Credentials;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("already registered")]
    AlreadyRegistered,

    #[error("not registered")]
    NotRegistered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Account {
    phone: String,
    password: String,
}

/// Storage credentials per identity.
pub struct AccountStore {
    path: PathBuf,
    accounts: RwLock<HashMap<String, Account>>,
}

impl AccountStore {
    /// Opens the store, loading existing accounts from disk.
    pub fn open(path: PathBuf) -> Result<Self, AccountError> {
        let accounts = load_accounts(&path)?;
        Ok(Self {
            path,
            accounts: RwLock::new(accounts),
        })
    }

    pub fn get(&self, identity: &str) -> Option<Credentials> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        accounts.get(identity).map(|a| Credentials {
            phone: a.phone.clone(),
            password: a.password.clone(),
        })
    }

    pub fn register(&self, identity: &str, phone: &str, password: &str) -> Result<(), AccountError> {
        {
            let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
            if accounts.contains_key(identity) {
                return Err(AccountError::AlreadyRegistered);
            }
            accounts.insert(
                identity.to_string(),
                Account {
                    phone: phone.to_string(),
                    password: password.to_string(),
                },
            );
        }
        self.persist()
    }

    pub fn remove(&self, identity: &str) -> Result<(), AccountError> {
        {
            let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
            if accounts.remove(identity).is_none() {
                return Err(AccountError::NotRegistered);
            }
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), AccountError> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        let json = serde_json::to_string_pretty(&*accounts)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;

        // Holds storage passwords; keep it private on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!(count = accounts.len(), path = %self.path.display(), "accounts persisted");
        Ok(())
    }
}

fn load_accounts(path: &Path) -> Result<HashMap<String, Account>, AccountError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let accounts: HashMap<String, Account> = serde_json::from_str(&data)?;
    debug!(count = accounts.len(), path = %path.display(), "accounts loaded");
    Ok(accounts)
}
