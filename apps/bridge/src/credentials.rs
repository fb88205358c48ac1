//! Persistent store for the managed tunnel credential
//!
//! A single JSON file under the per-user configuration directory:
//! `{"authtoken": "..."}`. On unix the file is readable by its owner only.

use directories::ProjectDirs;
use ollama_bridge_common::constants::CREDENTIAL_NAMESPACE;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

const CREDENTIAL_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No configuration directory available for {0}")]
    NoConfigDir(&'static str),

    #[error("Failed to access credential file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed credential file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    authtoken: Option<String>,
}

/// File-backed credential store
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store in the platform configuration directory
    pub fn open_default() -> Result<Self, CredentialError> {
        let dirs = ProjectDirs::from("", "", CREDENTIAL_NAMESPACE)
            .ok_or(CredentialError::NoConfigDir(CREDENTIAL_NAMESPACE))?;
        Ok(Self::at(dirs.config_dir().join(CREDENTIAL_FILE)))
    }

    /// Store backed by an explicit file
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored credential, if any
    pub fn load(&self) -> Result<Option<String>, CredentialError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CredentialError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let stored: StoredCredentials =
            serde_json::from_str(&raw).map_err(|source| CredentialError::Malformed {
                path: self.path.clone(),
                source,
            })?;

        Ok(stored.authtoken.filter(|token| !token.trim().is_empty()))
    }

    /// Persist a credential, replacing any previous one
    pub fn save(&self, authtoken: &str) -> Result<(), CredentialError> {
        let io_err = |source| CredentialError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let stored = StoredCredentials {
            authtoken: Some(authtoken.to_string()),
        };
        let raw = serde_json::to_string_pretty(&stored).map_err(|source| {
            CredentialError::Malformed {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&self.path, raw).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600)).map_err(io_err)?;
        }

        debug!("Saved credential to {}", self.path.display());
        Ok(())
    }
}

/// Pick the credential for this run
///
/// A credential given on the command line wins and is saved for later runs;
/// otherwise the stored one is used.
pub fn resolve_credential(
    store: &CredentialStore,
    provided: Option<String>,
) -> Result<Option<String>, CredentialError> {
    match provided.filter(|token| !token.trim().is_empty()) {
        Some(token) => {
            store.save(&token)?;
            info!("Authtoken saved to {}", store.path().display());
            Ok(Some(token))
        }
        None => store.load(),
    }
}
