//! OAuth client secrets
//!
//! Reads the JSON file downloaded from the Google Cloud Console. Both
//! "installed" (desktop) and "web" client types are accepted.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// OAuth client identity used for one credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl ClientSecrets {
    /// Load client secrets from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
            .with_context(|| format!("Invalid client secrets in {}", path.display()))
    }

    /// Parse client secrets from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        if installed.client_id.trim().is_empty() {
            anyhow::bail!("Credentials file has an empty client_id");
        }

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }
}
