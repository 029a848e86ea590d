//! Small JSON files under the local data directory.
//!
//! Holds the persisted `clientName` credential (restores login state at
//! startup) and the per-client lead snapshot (seeds the store before the
//! first fetch completes).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::PersistError;
use crate::types::{ClientId, Lead};

/// Key of the persisted client identifier in `credentials.json`.
pub const CLIENT_NAME_KEY: &str = "clientName";

const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// `Ok(None)` when the file does not exist.
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PersistError> {
        let path = self.path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistError::io(path, e)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| PersistError::MalformedJson {
                path,
                message: e.to_string(),
            })
    }

    /// Write through a temp file and rename so readers never see a partial file.
    pub fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), PersistError> {
        fs::create_dir_all(&self.root).map_err(|e| PersistError::io(&self.root, e))?;
        let path = self.path(name);
        let tmp = self.path(&format!("{name}.tmp"));
        let json = serde_json::to_vec_pretty(value).map_err(|e| PersistError::MalformedJson {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&tmp, json).map_err(|e| PersistError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| PersistError::io(&path, e))?;
        Ok(())
    }

    /// Remove a file; a missing file is not an error.
    pub fn remove(&self, name: &str) -> Result<(), PersistError> {
        let path = self.path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistError::io(path, e)),
        }
    }

    // -- Credential -----------------------------------------------------------

    pub fn client_name(&self) -> Result<Option<ClientId>, PersistError> {
        let creds: Option<BTreeMap<String, String>> = self.read_json(CREDENTIALS_FILE)?;
        Ok(creds
            .and_then(|mut m| m.remove(CLIENT_NAME_KEY))
            .filter(|c| !c.trim().is_empty())
            .map(ClientId))
    }

    pub fn set_client_name(&self, client: &ClientId) -> Result<(), PersistError> {
        let creds = BTreeMap::from([(CLIENT_NAME_KEY, client.as_str())]);
        self.write_json(CREDENTIALS_FILE, &creds)
    }

    pub fn clear_client_name(&self) -> Result<(), PersistError> {
        self.remove(CREDENTIALS_FILE)
    }

    // -- Lead snapshot --------------------------------------------------------

    pub fn snapshot_file(client: &ClientId) -> String {
        let safe: String = client
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("leads-{safe}.json")
    }

    /// Last saved lead list for `client`, empty if none was saved.
    pub fn load_snapshot(&self, client: &ClientId) -> Result<Vec<Lead>, PersistError> {
        let leads: Option<Vec<Lead>> = self.read_json(&Self::snapshot_file(client))?;
        let leads = leads.unwrap_or_default();
        debug!(%client, count = leads.len(), "Loaded lead snapshot");
        Ok(leads)
    }

    pub fn save_snapshot(&self, client: &ClientId, leads: &[Lead]) -> Result<(), PersistError> {
        self.write_json(&Self::snapshot_file(client), leads)
    }

    pub fn clear_snapshot(&self, client: &ClientId) -> Result<(), PersistError> {
        self.remove(&Self::snapshot_file(client))
    }
}
