//! Gmail API HTTP client
//!
//! Lists and exports messages from the signed-in user's mailbox.
//! Uses synchronous HTTP (ureq).

use std::time::Duration;

use log::debug;

use super::api::{ListMessagesResponse, RawMessage};
use super::{http, normalize};
use crate::error::ProviderError;
use crate::models::{MessageId, MessageTransferUnit};
use crate::providers::{CredentialContext, MessagePage, SourceProvider};

/// Gmail API client for the source mailbox
pub struct GmailClient {
    agent: ureq::Agent,
    base_url: String,
    page_size: usize,
    max_body: u64,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Largest page the API hands out
    const MAX_PAGE_SIZE: usize = 500;

    /// Largest `format=raw` response read into memory
    ///
    /// base64 grows a message by 4/3, so this covers the 25 MiB archive
    /// limit with room for the JSON envelope.
    const MAX_RAW_BODY: u64 = 40 * 1024 * 1024;

    pub fn new() -> Self {
        Self {
            agent: http::agent(Duration::from_secs(120)),
            base_url: Self::BASE_URL.to_string(),
            page_size: Self::MAX_PAGE_SIZE,
            max_body: Self::MAX_RAW_BODY,
        }
    }

    /// Use a different API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Use a different ceiling for fetched message bodies
    pub fn with_max_body(mut self, max_body: u64) -> Self {
        self.max_body = max_body;
        self
    }

    fn list_url(&self, query: &str, page_token: Option<&str>) -> String {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}",
            self.base_url,
            self.page_size.min(Self::MAX_PAGE_SIZE)
        );
        if !query.is_empty() {
            url.push_str(&format!("&q={}", urlencoding::encode(query)));
        }
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }
        url
    }

    fn message_url(&self, id: &MessageId) -> String {
        format!(
            "{}/users/me/messages/{}?format=raw",
            self.base_url,
            urlencoding::encode(id.as_str())
        )
    }
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceProvider for GmailClient {
    fn list_page(
        &self,
        ctx: &CredentialContext,
        account: &str,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, ProviderError> {
        let access_token = ctx.bearer()?;
        let url = self.list_url(query, page_token);

        let response = http::check(
            "list messages",
            self.agent
                .get(&url)
                .header("Authorization", &format!("Bearer {}", access_token))
                .call(),
        )?;
        let list: ListMessagesResponse = http::read_json("list messages", response)?;

        let ids: Vec<MessageId> = list
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| MessageId::new(m.id))
            .collect();
        debug!("Gmail returned {} ids for {}", ids.len(), account);

        Ok(MessagePage {
            ids,
            next_page_token: list.next_page_token,
            result_size_estimate: list.result_size_estimate,
        })
    }

    fn fetch(
        &self,
        ctx: &CredentialContext,
        _account: &str,
        id: &MessageId,
    ) -> Result<MessageTransferUnit, ProviderError> {
        let access_token = ctx.bearer()?;
        let url = self.message_url(id);

        let response = http::check(
            "fetch message",
            self.agent
                .get(&url)
                .header("Authorization", &format!("Bearer {}", access_token))
                .call(),
        )?;
        let message: RawMessage =
            http::read_json_limited("fetch message", response, self.max_body)?;
        normalize::to_transfer_unit(message)
    }
}
