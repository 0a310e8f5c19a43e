//! In-memory collaborators
//!
//! Used by tests and for exercising the engine without network access.
//! Failures can be scripted per message id, either permanently or for a
//! fixed number of calls.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::{
    ArchiveProvider, CredentialContext, CredentialProvider, CredentialRef, MessagePage,
    ScopeSet, SourceProvider, TokenSource,
};
use crate::error::{AuthError, ProviderError};
use crate::models::{MessageId, MessageTransferUnit};

/// A scripted failure: returned `remaining` more times, or forever if None
#[derive(Debug, Clone)]
struct ScriptedFailure {
    error: ProviderError,
    remaining: Option<usize>,
}

/// Per-key failure scripts
struct FailureScripts<K> {
    scripts: RwLock<HashMap<K, ScriptedFailure>>,
}

impl<K> Default for FailureScripts<K> {
    fn default() -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: std::hash::Hash + Eq> FailureScripts<K> {
    fn set(&self, key: K, error: ProviderError, times: Option<usize>) {
        self.scripts.write().unwrap().insert(
            key,
            ScriptedFailure {
                error,
                remaining: times,
            },
        );
    }

    /// Consume one failure for `key`, if any is scripted
    fn take(&self, key: &K) -> Option<ProviderError> {
        let mut scripts = self.scripts.write().unwrap();
        let script = scripts.get_mut(key)?;
        match script.remaining {
            None => Some(script.error.clone()),
            Some(0) => None,
            Some(ref mut n) => {
                *n -= 1;
                Some(script.error.clone())
            }
        }
    }
}

/// In-memory source mailboxes keyed by account
pub struct InMemorySource {
    mailboxes: RwLock<HashMap<String, Vec<MessageTransferUnit>>>,
    page_size: usize,
    fetch_failures: FailureScripts<MessageId>,
    list_failures: FailureScripts<String>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::with_page_size(500)
    }

    /// Create a source that returns at most `page_size` ids per page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
            fetch_failures: FailureScripts::default(),
            list_failures: FailureScripts::default(),
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Add a message to an account's mailbox
    pub fn add_message(&self, account: &str, unit: MessageTransferUnit) {
        self.mailboxes
            .write()
            .unwrap()
            .entry(account.to_string())
            .or_default()
            .push(unit);
    }

    /// Add `count` simple messages with ids `{prefix}1..={prefix}{count}`
    pub fn add_messages(&self, account: &str, prefix: &str, count: usize) {
        for n in 1..=count {
            let id = format!("{}{}", prefix, n);
            let raw = format!(
                "Message-ID: <{id}@example.com>\r\nSubject: Message {n}\r\n\r\nBody of {id}\r\n"
            );
            self.add_message(
                account,
                MessageTransferUnit::new(MessageId::new(&id), raw.into_bytes())
                    .with_thread_id(format!("t{}", n)),
            );
        }
    }

    /// Ensure an account exists even if it has no messages
    pub fn add_account(&self, account: &str) {
        self.mailboxes
            .write()
            .unwrap()
            .entry(account.to_string())
            .or_default();
    }

    /// Make every fetch of `id` fail with `error`
    pub fn fail_fetch(&self, id: &str, error: ProviderError) {
        self.fetch_failures.set(MessageId::new(id), error, None);
    }

    /// Make the next `times` fetches of `id` fail with `error`
    pub fn fail_fetch_times(&self, id: &str, error: ProviderError, times: usize) {
        self.fetch_failures.set(MessageId::new(id), error, Some(times));
    }

    /// Make every listing for `account` fail with `error`
    pub fn fail_listing(&self, account: &str, error: ProviderError) {
        self.list_failures.set(account.to_string(), error, None);
    }

    /// Make the next `times` listings for `account` fail with `error`
    pub fn fail_listing_times(&self, account: &str, error: ProviderError, times: usize) {
        self.list_failures.set(account.to_string(), error, Some(times));
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// All message ids in an account's mailbox, in listing order
    pub fn message_ids(&self, account: &str) -> Vec<MessageId> {
        self.mailboxes
            .read()
            .unwrap()
            .get(account)
            .map(|units| units.iter().map(|u| u.id.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceProvider for InMemorySource {
    fn list_page(
        &self,
        _ctx: &CredentialContext,
        account: &str,
        _query: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.list_failures.take(&account.to_string()) {
            return Err(err);
        }

        let mailboxes = self.mailboxes.read().unwrap();
        let Some(units) = mailboxes.get(account) else {
            return Err(ProviderError::NotFound(format!("mailbox {}", account)));
        };

        let start: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| ProviderError::InvalidArgument(format!("page token {}", token)))?,
            None => 0,
        };
        let end = (start + self.page_size).min(units.len());
        let ids = units[start.min(end)..end].iter().map(|u| u.id.clone()).collect();

        Ok(MessagePage {
            ids,
            next_page_token: (end < units.len()).then(|| end.to_string()),
            result_size_estimate: Some(units.len() as u32),
        })
    }

    fn fetch(
        &self,
        _ctx: &CredentialContext,
        account: &str,
        id: &MessageId,
    ) -> Result<MessageTransferUnit, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fetch_failures.take(id) {
            return Err(err);
        }

        self.mailboxes
            .read()
            .unwrap()
            .get(account)
            .and_then(|units| units.iter().find(|u| &u.id == id).cloned())
            .ok_or_else(|| ProviderError::NotFound(format!("message {}", id)))
    }
}

/// In-memory destination archive recording every insert
pub struct InMemoryArchive {
    inserted: RwLock<Vec<(String, MessageId)>>,
    insert_failures: FailureScripts<MessageId>,
    inaccessible: RwLock<HashMap<String, ProviderError>>,
    insert_calls: AtomicUsize,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self {
            inserted: RwLock::new(Vec::new()),
            insert_failures: FailureScripts::default(),
            inaccessible: RwLock::new(HashMap::new()),
            insert_calls: AtomicUsize::new(0),
        }
    }

    /// Make every insert of `id` fail with `error`
    pub fn fail_insert(&self, id: &str, error: ProviderError) {
        self.insert_failures.set(MessageId::new(id), error, None);
    }

    /// Make the next `times` inserts of `id` fail with `error`
    pub fn fail_insert_times(&self, id: &str, error: ProviderError, times: usize) {
        self.insert_failures.set(MessageId::new(id), error, Some(times));
    }

    /// Make access verification for `archive` fail
    pub fn deny_archive(&self, archive: &str, error: ProviderError) {
        self.inaccessible
            .write()
            .unwrap()
            .insert(archive.to_string(), error);
    }

    /// Successful inserts, in order
    pub fn inserted(&self) -> Vec<(String, MessageId)> {
        self.inserted.read().unwrap().clone()
    }

    /// Ids successfully inserted into `archive`, in order
    pub fn inserted_into(&self, archive: &str) -> Vec<MessageId> {
        self.inserted
            .read()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == archive)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Number of insert attempts, failed ones included
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveProvider for InMemoryArchive {
    fn verify_access(&self, _ctx: &CredentialContext, archive: &str) -> Result<(), ProviderError> {
        match self.inaccessible.read().unwrap().get(archive) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn insert(
        &self,
        _ctx: &CredentialContext,
        archive: &str,
        unit: &MessageTransferUnit,
    ) -> Result<(), ProviderError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.insert_failures.take(&unit.id) {
            return Err(err);
        }
        self.inserted
            .write()
            .unwrap()
            .push((archive.to_string(), unit.id.clone()));
        Ok(())
    }
}

/// Token source returning a fixed token
struct FixedToken(String);

impl TokenSource for FixedToken {
    fn access_token(&self) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

/// Credential provider that always succeeds unless a token cache is denied
pub struct StaticCredentials {
    denied: RwLock<HashSet<PathBuf>>,
    acquired: AtomicUsize,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self {
            denied: RwLock::new(HashSet::new()),
            acquired: AtomicUsize::new(0),
        }
    }

    /// Fail every acquisition that uses `token_cache`
    pub fn deny(&self, token_cache: impl AsRef<Path>) {
        self.denied
            .write()
            .unwrap()
            .insert(token_cache.as_ref().to_path_buf());
    }

    /// Number of contexts handed out
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

impl Default for StaticCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for StaticCredentials {
    fn acquire(
        &self,
        scopes: &ScopeSet,
        cached: &CredentialRef,
    ) -> Result<CredentialContext, AuthError> {
        if self.denied.read().unwrap().contains(&cached.token_cache) {
            return Err(AuthError::new(
                scopes.role.label(),
                format!("refresh token in {} was revoked", cached.token_cache.display()),
            ));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(CredentialContext::new(
            scopes.role.label(),
            scopes.clone(),
            Arc::new(FixedToken(format!("token-{}", scopes.role.label()))),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CredentialContext {
        StaticCredentials::new()
            .acquire(&ScopeSet::source_read(), &CredentialRef::new("c.json", "t.json"))
            .unwrap()
    }

    #[test]
    fn test_listing_paginates() {
        let source = InMemorySource::with_page_size(2);
        source.add_messages("a@x.com", "m", 5);

        let first = source.list_page(&ctx(), "a@x.com", "in:all", None).unwrap();
        assert_eq!(first.ids.len(), 2);
        let token = first.next_page_token.unwrap();

        let second = source.list_page(&ctx(), "a@x.com", "in:all", Some(&token)).unwrap();
        assert_eq!(second.ids, vec![MessageId::new("m3"), MessageId::new("m4")]);

        let third = source
            .list_page(&ctx(), "a@x.com", "in:all", second.next_page_token.as_deref())
            .unwrap();
        assert_eq!(third.ids, vec![MessageId::new("m5")]);
        assert!(third.next_page_token.is_none());
    }

    #[test]
    fn test_scripted_fetch_failure_runs_out() {
        let source = InMemorySource::new();
        source.add_messages("a@x.com", "m", 1);
        source.fail_fetch_times("m1", ProviderError::Transient("503".into()), 2);

        let id = MessageId::new("m1");
        assert!(source.fetch(&ctx(), "a@x.com", &id).is_err());
        assert!(source.fetch(&ctx(), "a@x.com", &id).is_err());
        assert!(source.fetch(&ctx(), "a@x.com", &id).is_ok());
        assert_eq!(source.fetch_calls(), 3);
    }

    #[test]
    fn test_archive_records_inserts() {
        let archive = InMemoryArchive::new();
        let unit = MessageTransferUnit::new(MessageId::new("m1"), b"Subject: x\r\n\r\n".to_vec());
        archive.insert(&ctx(), "g@x.com", &unit).unwrap();
        assert_eq!(archive.inserted_into("g@x.com"), vec![MessageId::new("m1")]);
        assert!(archive.inserted_into("other@x.com").is_empty());
    }

    #[test]
    fn test_denied_credentials() {
        let creds = StaticCredentials::new();
        creds.deny("tokens/bob_gmail_token.json");
        let err = creds
            .acquire(
                &ScopeSet::source_read(),
                &CredentialRef::new("c.json", "tokens/bob_gmail_token.json"),
            )
            .unwrap_err();
        assert_eq!(err.label, "gmail");
        assert_eq!(creds.acquired(), 0);
    }
}
