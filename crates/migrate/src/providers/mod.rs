//! Contracts for the remote collaborators
//!
//! The engine only talks to the outside world through these traits:
//! - [`CredentialProvider`] hands out [`CredentialContext`] capabilities
//! - [`SourceProvider`] enumerates and fetches source messages
//! - [`ArchiveProvider`] ingests messages into the destination archive
//!
//! Google-backed implementations live in [`crate::google`]; in-memory ones
//! used by tests live in [`memory`].

pub mod memory;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{AuthError, ProviderError};
use crate::models::{MessageId, MessageTransferUnit};

/// Which side of the migration a credential serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialRole {
    /// Read access to the source mailbox
    SourceRead,
    /// Write access to the destination archive
    DestinationWrite,
}

impl CredentialRole {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SourceRead => "gmail",
            Self::DestinationWrite => "admin",
        }
    }
}

/// Scopes requested for one credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSet {
    pub role: CredentialRole,
    pub scopes: Vec<String>,
}

impl ScopeSet {
    /// Read-only access to the user's mailbox
    pub fn source_read() -> Self {
        Self {
            role: CredentialRole::SourceRead,
            scopes: vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
        }
    }

    /// Group lookup plus archive ingestion
    pub fn destination_write() -> Self {
        Self {
            role: CredentialRole::DestinationWrite,
            scopes: vec![
                "https://www.googleapis.com/auth/admin.directory.group.readonly".to_string(),
                "https://www.googleapis.com/auth/apps.groups.migration".to_string(),
            ],
        }
    }

    /// Space-separated form used in OAuth requests
    pub fn joined(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Where a credential's client secrets and cached token live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRef {
    /// OAuth client secrets (Google Cloud Console JSON)
    pub client_secrets: PathBuf,
    /// Cached access/refresh token
    pub token_cache: PathBuf,
}

impl CredentialRef {
    pub fn new(client_secrets: impl Into<PathBuf>, token_cache: impl Into<PathBuf>) -> Self {
        Self {
            client_secrets: client_secrets.into(),
            token_cache: token_cache.into(),
        }
    }
}

/// Something that can produce a valid bearer token, refreshing as needed
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> anyhow::Result<String>;
}

/// Capability to call a remote API under one identity
///
/// Passed explicitly into every provider call; never stored globally.
#[derive(Clone)]
pub struct CredentialContext {
    label: String,
    scopes: ScopeSet,
    tokens: Arc<dyn TokenSource>,
}

impl CredentialContext {
    pub fn new(label: impl Into<String>, scopes: ScopeSet, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            label: label.into(),
            scopes,
            tokens,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    /// Current bearer token for this identity
    pub fn bearer(&self) -> Result<String, ProviderError> {
        self.tokens.access_token().map_err(|e| {
            ProviderError::PermissionDenied(format!(
                "could not obtain {} token: {:#}",
                self.label, e
            ))
        })
    }
}

impl fmt::Debug for CredentialContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialContext")
            .field("label", &self.label)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Obtains credential contexts, running consent or refresh when needed
pub trait CredentialProvider {
    fn acquire(
        &self,
        scopes: &ScopeSet,
        cached: &CredentialRef,
    ) -> Result<CredentialContext, AuthError>;
}

/// One page of a message search
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub ids: Vec<MessageId>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: Option<u32>,
}

/// Source mailbox (message enumeration and export)
pub trait SourceProvider {
    /// List one page of message ids matching `query`
    fn list_page(
        &self,
        ctx: &CredentialContext,
        account: &str,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, ProviderError>;

    /// Fetch a full message with its metadata
    fn fetch(
        &self,
        ctx: &CredentialContext,
        account: &str,
        id: &MessageId,
    ) -> Result<MessageTransferUnit, ProviderError>;
}

/// Destination group archive
///
/// Callers guarantee no duplicate submission through checkpoint filtering;
/// implementations need not deduplicate.
pub trait ArchiveProvider {
    /// Check that the archive exists and is writable by `ctx`
    fn verify_access(&self, ctx: &CredentialContext, archive: &str) -> Result<(), ProviderError> {
        let _ = (ctx, archive);
        Ok(())
    }

    /// Insert one message, preserving its original bytes
    fn insert(
        &self,
        ctx: &CredentialContext,
        archive: &str,
        unit: &MessageTransferUnit,
    ) -> Result<(), ProviderError>;
}
