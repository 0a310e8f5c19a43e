//! Message identifiers and the per-message transfer unit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a source message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Threading headers read from the raw message
///
/// The archive receives the raw bytes untouched, so these are kept only to
/// log and report what was carried over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadingHeaders {
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub date: Option<String>,
    pub subject: Option<String>,
}

impl ThreadingHeaders {
    /// Extract threading headers from an RFC 822 message
    ///
    /// Only the header block (up to the first blank line) is inspected.
    /// Folded header lines are unfolded before matching.
    pub fn parse(raw: &[u8]) -> Self {
        let head_len = header_block_len(raw);
        let head = String::from_utf8_lossy(&raw[..head_len]);

        let mut headers = Self::default();
        let mut current: Option<(String, String)> = None;

        for line in head.lines() {
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = current.take() {
                headers.assign(&name, value);
            }
            if let Some((name, value)) = line.split_once(':') {
                current = Some((name.trim().to_string(), value.trim().to_string()));
            }
        }
        if let Some((name, value)) = current {
            headers.assign(&name, value);
        }

        headers
    }

    fn assign(&mut self, name: &str, value: String) {
        let slot = if name.eq_ignore_ascii_case("Message-ID") {
            &mut self.message_id
        } else if name.eq_ignore_ascii_case("In-Reply-To") {
            &mut self.in_reply_to
        } else if name.eq_ignore_ascii_case("References") {
            &mut self.references
        } else if name.eq_ignore_ascii_case("Date") {
            &mut self.date
        } else if name.eq_ignore_ascii_case("Subject") {
            &mut self.subject
        } else {
            return;
        };
        // First occurrence wins
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// Whether the message is part of a conversation
    pub fn is_reply(&self) -> bool {
        self.in_reply_to.is_some() || self.references.is_some()
    }
}

/// Length of the header block, excluding the separating blank line
fn header_block_len(raw: &[u8]) -> usize {
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = raw.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => raw.len(),
    }
}

/// One source message plus its preserved metadata
///
/// Constructed per message during transfer and dropped afterwards.
#[derive(Debug, Clone)]
pub struct MessageTransferUnit {
    /// Gmail message ID
    pub id: MessageId,
    /// Gmail thread ID
    pub thread_id: Option<String>,
    /// Gmail label IDs (e.g., "INBOX", "SENT", "UNREAD")
    pub label_ids: Vec<String>,
    /// Gmail's internal timestamp
    pub internal_date: Option<DateTime<Utc>>,
    /// Threading headers read from `raw`
    pub headers: ThreadingHeaders,
    /// The complete RFC 822 message
    pub raw: Vec<u8>,
}

impl MessageTransferUnit {
    /// Create a transfer unit from raw message bytes
    pub fn new(id: MessageId, raw: Vec<u8>) -> Self {
        let headers = ThreadingHeaders::parse(&raw);
        Self {
            id,
            thread_id: None,
            label_ids: Vec::new(),
            internal_date: None,
            headers,
            raw,
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_labels(mut self, label_ids: Vec<String>) -> Self {
        self.label_ids = label_ids;
        self
    }

    pub fn with_internal_date(mut self, internal_date: DateTime<Utc>) -> Self {
        self.internal_date = Some(internal_date);
        self
    }

    /// Size of the raw message in bytes
    pub fn size(&self) -> u64 {
        self.raw.len() as u64
    }

    /// Whether Gmail marked the message unread
    pub fn is_unread(&self) -> bool {
        self.label_ids.iter().any(|l| l == "UNREAD")
    }
}
