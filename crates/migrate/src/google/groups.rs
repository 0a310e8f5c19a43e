//! Groups Migration API client
//!
//! Inserts raw RFC 822 messages into a group's archive. Google keeps the
//! original headers, so dates and threading survive the migration.
//! Access checks go through the Admin SDK Directory API.

use std::time::Duration;

use log::{debug, info};

use super::api::{ArchiveInsertResponse, Group};
use super::http;
use crate::error::ProviderError;
use crate::models::MessageTransferUnit;
use crate::providers::{ArchiveProvider, CredentialContext};

/// Destination archive backed by the Groups Migration API
pub struct GroupsArchiveClient {
    agent: ureq::Agent,
    upload_url: String,
    directory_url: String,
}

impl GroupsArchiveClient {
    const UPLOAD_URL: &'static str = "https://www.googleapis.com/upload/groups/v1";
    const DIRECTORY_URL: &'static str = "https://admin.googleapis.com/admin/directory/v1";

    pub fn new() -> Self {
        Self {
            // Uploads of up to 25 MiB need a generous timeout
            agent: http::agent(Duration::from_secs(300)),
            upload_url: Self::UPLOAD_URL.to_string(),
            directory_url: Self::DIRECTORY_URL.to_string(),
        }
    }

    /// Use different API roots
    pub fn with_base_urls(
        mut self,
        upload_url: impl Into<String>,
        directory_url: impl Into<String>,
    ) -> Self {
        self.upload_url = upload_url.into().trim_end_matches('/').to_string();
        self.directory_url = directory_url.into().trim_end_matches('/').to_string();
        self
    }

    fn archive_url(&self, group: &str) -> String {
        format!(
            "{}/groups/{}/archive?uploadType=media",
            self.upload_url,
            urlencoding::encode(group)
        )
    }

    fn group_url(&self, group: &str) -> String {
        format!("{}/groups/{}", self.directory_url, urlencoding::encode(group))
    }
}

impl Default for GroupsArchiveClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveProvider for GroupsArchiveClient {
    fn verify_access(&self, ctx: &CredentialContext, archive: &str) -> Result<(), ProviderError> {
        let access_token = ctx.bearer()?;
        let response = http::check(
            "look up group",
            self.agent
                .get(&self.group_url(archive))
                .header("Authorization", &format!("Bearer {}", access_token))
                .call(),
        )?;
        let group: Group = http::read_json("look up group", response)?;
        info!(
            "Group {} is accessible{}",
            group.email,
            group.name.map(|n| format!(" ({})", n)).unwrap_or_default()
        );
        Ok(())
    }

    fn insert(
        &self,
        ctx: &CredentialContext,
        archive: &str,
        unit: &MessageTransferUnit,
    ) -> Result<(), ProviderError> {
        let access_token = ctx.bearer()?;
        let response = http::check(
            "insert message",
            self.agent
                .post(&self.archive_url(archive))
                .header("Authorization", &format!("Bearer {}", access_token))
                .header("Content-Type", "message/rfc822")
                .send(unit.raw.as_slice()),
        )?;

        let result: ArchiveInsertResponse = http::read_json("insert message", response)?;
        match result.response_code.as_deref() {
            Some("SUCCESS") | None => {
                debug!("Inserted {} into {}", unit.id, archive);
                Ok(())
            }
            Some(code) => Err(ProviderError::InvalidArgument(format!(
                "archive rejected message {}: {}",
                unit.id, code
            ))),
        }
    }
}
