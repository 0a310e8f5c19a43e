//! Google API integration
//!
//! This module provides:
//! - OAuth2 installed-app authentication with per-credential token caches
//! - Gmail API client for enumerating and exporting raw messages
//! - Groups Migration API client for archive ingestion
//! - HTTP status classification into [`crate::error::ProviderError`]

mod auth;
mod credentials;
mod gmail;
mod groups;
mod http;
mod normalize;

pub use auth::{OAuthCredentialProvider, OAuthSession};
pub use credentials::ClientSecrets;
pub use gmail::GmailClient;
pub use groups::GroupsArchiveClient;
pub use normalize::{decode_raw, to_transfer_unit};

/// Google API response types
pub mod api {
    use serde::Deserialize;

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Message fetched with `format=raw`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RawMessage {
        pub id: String,
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
        /// Milliseconds since epoch, as a string
        pub internal_date: Option<String>,
        pub size_estimate: Option<u64>,
        /// base64url-encoded RFC 822 message
        pub raw: String,
    }

    /// Directory API group resource (only the fields we look at)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Group {
        pub email: String,
        pub name: Option<String>,
    }

    /// Groups Migration API insert response
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ArchiveInsertResponse {
        pub kind: Option<String>,
        pub response_code: Option<String>,
    }

    /// Standard Google API error envelope
    #[derive(Debug, Deserialize)]
    pub struct ErrorResponse {
        pub error: ErrorBody,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorBody {
        pub code: Option<u16>,
        #[serde(default)]
        pub message: String,
        pub status: Option<String>,
        #[serde(default)]
        pub errors: Vec<ErrorDetail>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorDetail {
        pub reason: Option<String>,
        pub message: Option<String>,
    }
}
