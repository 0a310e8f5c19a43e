//! Lazy message enumeration

use std::collections::VecDeque;

use log::debug;

use crate::error::MigrationError;
use crate::models::MessageId;
use crate::providers::{CredentialContext, SourceProvider};
use crate::retry::RetryExecutor;

/// Restartable, page-at-a-time sequence of candidate message ids
///
/// Pages are only requested when the buffered ids run out, so a run that
/// stops early never lists the rest of the mailbox. Restarting from scratch
/// is safe because callers filter ids against the checkpoint.
pub struct MessageSearch<'a> {
    source: &'a dyn SourceProvider,
    ctx: &'a CredentialContext,
    account: &'a str,
    query: &'a str,
    buffer: VecDeque<MessageId>,
    next_page: Option<String>,
    exhausted: bool,
    pages: u32,
    estimate: Option<u32>,
}

impl<'a> MessageSearch<'a> {
    pub fn new(
        source: &'a dyn SourceProvider,
        ctx: &'a CredentialContext,
        account: &'a str,
        query: &'a str,
    ) -> Self {
        Self {
            source,
            ctx,
            account,
            query,
            buffer: VecDeque::new(),
            next_page: None,
            exhausted: false,
            pages: 0,
            estimate: None,
        }
    }

    /// Next candidate id, listing another page through `executor` if needed
    ///
    /// Returns `Ok(None)` once the query is exhausted.
    pub fn next_id(
        &mut self,
        executor: &mut RetryExecutor<'_>,
    ) -> Result<Option<MessageId>, MigrationError> {
        loop {
            if let Some(id) = self.buffer.pop_front() {
                return Ok(Some(id));
            }
            if self.exhausted {
                return Ok(None);
            }

            let (source, ctx, account, query) = (self.source, self.ctx, self.account, self.query);
            let token = self.next_page.take();
            let page = executor
                .run("list messages", || {
                    source.list_page(ctx, account, query, token.as_deref())
                })
                .map_err(|e| match e {
                    MigrationError::Interrupted => e,
                    e => MigrationError::Enumeration(Box::new(e)),
                });
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    self.next_page = token;
                    return Err(e);
                }
            };

            self.pages += 1;
            if page.result_size_estimate.is_some() {
                self.estimate = page.result_size_estimate;
            }
            debug!(
                "Listed page {} for {}: {} ids (estimate {:?})",
                self.pages,
                account,
                page.ids.len(),
                self.estimate
            );

            self.buffer.extend(page.ids);
            match page.next_page_token {
                Some(token) => self.next_page = Some(token),
                None => self.exhausted = true,
            }
        }
    }

    /// True once the last page was listed and every id handed out
    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }

    pub fn pages_listed(&self) -> u32 {
        self.pages
    }

    /// Latest result size estimate reported by the source
    pub fn estimate(&self) -> Option<u32> {
        self.estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::providers::memory::{InMemorySource, StaticCredentials};
    use crate::providers::{CredentialProvider, CredentialRef, ScopeSet};
    use crate::retry::RetryPolicy;
    use crate::throttle::RecordingSleeper;

    fn ctx() -> CredentialContext {
        StaticCredentials::new()
            .acquire(&ScopeSet::source_read(), &CredentialRef::new("c.json", "t.json"))
            .unwrap()
    }

    #[test]
    fn test_lists_pages_lazily() {
        let source = InMemorySource::with_page_size(2);
        source.add_messages("a@x.com", "m", 5);
        let ctx = ctx();
        let sleeper = RecordingSleeper::new();
        let mut exec = RetryExecutor::new("read", RetryPolicy::immediate(3), &sleeper);

        let mut search = MessageSearch::new(&source, &ctx, "a@x.com", "in:all");
        assert_eq!(search.next_id(&mut exec).unwrap(), Some(MessageId::new("m1")));
        assert_eq!(source.list_calls(), 1);
        assert_eq!(search.next_id(&mut exec).unwrap(), Some(MessageId::new("m2")));
        assert_eq!(source.list_calls(), 1);
        assert_eq!(search.next_id(&mut exec).unwrap(), Some(MessageId::new("m3")));
        assert_eq!(source.list_calls(), 2);

        let mut rest = Vec::new();
        while let Some(id) = search.next_id(&mut exec).unwrap() {
            rest.push(id);
        }
        assert_eq!(rest, vec![MessageId::new("m4"), MessageId::new("m5")]);
        assert!(search.is_exhausted());
        assert_eq!(search.pages_listed(), 3);
        assert_eq!(search.estimate(), Some(5));
    }

    #[test]
    fn test_empty_mailbox() {
        let source = InMemorySource::new();
        source.add_account("a@x.com");
        let ctx = ctx();
        let sleeper = RecordingSleeper::new();
        let mut exec = RetryExecutor::new("read", RetryPolicy::immediate(3), &sleeper);

        let mut search = MessageSearch::new(&source, &ctx, "a@x.com", "in:all");
        assert_eq!(search.next_id(&mut exec).unwrap(), None);
        assert!(search.is_exhausted());
    }

    #[test]
    fn test_listing_failure_is_enumeration_error() {
        let source = InMemorySource::new();
        source.add_messages("a@x.com", "m", 3);
        source.fail_listing("a@x.com", ProviderError::Transient("backend error".into()));
        let ctx = ctx();
        let sleeper = RecordingSleeper::new();
        let mut exec = RetryExecutor::new("read", RetryPolicy::immediate(3), &sleeper);

        let mut search = MessageSearch::new(&source, &ctx, "a@x.com", "in:all");
        let err = search.next_id(&mut exec).unwrap_err();
        assert!(matches!(err, MigrationError::Enumeration(_)));
        assert_eq!(source.list_calls(), 3);
    }

    #[test]
    fn test_transient_listing_failure_recovers() {
        let source = InMemorySource::new();
        source.add_messages("a@x.com", "m", 1);
        source.fail_listing_times("a@x.com", ProviderError::rate_limited("quota"), 1);
        let ctx = ctx();
        let sleeper = RecordingSleeper::new();
        let mut exec = RetryExecutor::new("read", RetryPolicy::immediate(3), &sleeper);

        let mut search = MessageSearch::new(&source, &ctx, "a@x.com", "in:all");
        assert_eq!(search.next_id(&mut exec).unwrap(), Some(MessageId::new("m1")));
        assert_eq!(exec.stats().retries, 1);
    }
}
