//! OAuth2 authentication
//!
//! Implements the installed-app authorization code flow with a loopback
//! listener for the callback. Each credential (the user's Gmail read access,
//! the admin's archive write access) gets its own session and token cache.
//! Uses synchronous HTTP (ureq).

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::ClientSecrets;
use crate::error::AuthError;
use crate::providers::{CredentialContext, CredentialProvider, CredentialRef, ScopeSet, TokenSource};
use crate::throttle::CancelToken;

/// Refresh this long before the access token actually expires
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Cached token data
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    /// Scopes the token was granted for
    #[serde(default)]
    scopes: Vec<String>,
}

impl StoredToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at > chrono::Utc::now().timestamp() + EXPIRY_MARGIN_SECS)
    }

    fn covers(&self, scopes: &ScopeSet) -> bool {
        scopes.scopes.iter().all(|s| self.scopes.contains(s))
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    #[allow(dead_code)]
    token_type: String,
}

/// One OAuth identity: client secrets, requested scopes, and a token cache
///
/// Browser consent only happens in [`OAuthSession::get_access_token`]. Once a
/// migration is running, tokens come from [`TokenSource::access_token`],
/// which refreshes but never prompts.
pub struct OAuthSession {
    label: String,
    secrets: ClientSecrets,
    scopes: ScopeSet,
    token_path: PathBuf,
    cached: Mutex<Option<StoredToken>>,
    cancel: CancelToken,
}

impl OAuthSession {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Port range to try for local OAuth callback server
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// How long to wait for the user to finish consent in the browser
    const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);
    const CALLBACK_POLL: Duration = Duration::from_millis(200);

    pub fn new(
        label: impl Into<String>,
        secrets: ClientSecrets,
        scopes: ScopeSet,
        token_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            label: label.into(),
            secrets,
            scopes,
            token_path: token_path.into(),
            cached: Mutex::new(None),
            cancel: CancelToken::new(),
        }
    }

    /// Give up waiting for browser consent once `cancel` is set
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Get a valid access token, refreshing or re-authenticating as needed
    pub fn get_access_token(&self) -> Result<String> {
        let mut cached = self.lock_cache()?;
        if let Some(access_token) = self.reuse_or_refresh(&mut cached)? {
            return Ok(access_token);
        }

        // Need to authenticate from scratch
        let response = self.authorization_code_auth()?;
        let stored = self.save_token_response(&response)?;
        let access_token = stored.access_token.clone();
        *cached = Some(stored);
        Ok(access_token)
    }

    /// Get a valid access token from the cache or a refresh, never prompting
    pub fn get_access_token_unattended(&self) -> Result<String> {
        let mut cached = self.lock_cache()?;
        self.reuse_or_refresh(&mut cached)?.with_context(|| {
            format!(
                "{} authorization expired and could not be refreshed; run again to re-authorize",
                self.label
            )
        })
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, Option<StoredToken>>> {
        self.cached
            .lock()
            .map_err(|_| anyhow::anyhow!("token cache lock poisoned"))
    }

    /// Cached token if still fresh, else a refreshed one; `None` if neither
    fn reuse_or_refresh(&self, cached: &mut Option<StoredToken>) -> Result<Option<String>> {
        if cached.is_none() {
            *cached = self.load_token().ok();
        }

        let Some(token) = cached.as_ref().filter(|t| t.covers(&self.scopes)) else {
            return Ok(None);
        };
        if token.is_fresh() {
            return Ok(Some(token.access_token.clone()));
        }
        let Some(refresh_token) = token.refresh_token.clone() else {
            return Ok(None);
        };

        match self.refresh_access_token(&refresh_token) {
            Ok(response) => {
                let stored = self.save_token_response(&response)?;
                let access_token = stored.access_token.clone();
                *cached = Some(stored);
                debug!("Refreshed {} access token", self.label);
                Ok(Some(access_token))
            }
            Err(e) => {
                debug!("Refreshing {} token failed: {:#}", self.label, e);
                Ok(None)
            }
        }
    }

    /// Perform authorization code flow authentication
    fn authorization_code_auth(&self) -> Result<TokenResponse> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.secrets.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(&self.scopes.joined()),
        );

        println!("\n=== {} authentication required ===", self.label);
        println!("Opening browser for authentication...");
        println!("If the browser doesn't open, visit: {}", auth_url);

        if let Err(e) = open::that(&auth_url) {
            eprintln!("Failed to open browser: {}. Please open the URL manually.", e);
        }

        println!("Waiting for authorization...");
        let code = self.wait_for_callback(listener)?;

        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        info!("{} authentication successful", self.label);
        Ok(token)
    }

    /// Start a local TCP server on an available port
    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(format!("127.0.0.1:{}", port)) {
                return Ok((listener, port));
            }
        }
        anyhow::bail!(
            "Could not bind to any port in range {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )
    }

    /// Wait for OAuth callback and extract authorization code
    ///
    /// Gives up when the session is cancelled or consent takes too long.
    fn wait_for_callback(&self, listener: TcpListener) -> Result<String> {
        listener
            .set_nonblocking(true)
            .context("Failed to configure callback listener")?;
        let deadline = Instant::now() + Self::CONSENT_TIMEOUT;

        let mut stream = loop {
            match listener.accept() {
                Ok((stream, _)) => break stream,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if self.cancel.is_cancelled() {
                        anyhow::bail!("Interrupted while waiting for {} authorization", self.label);
                    }
                    if Instant::now() >= deadline {
                        anyhow::bail!(
                            "No {} authorization received within {} seconds",
                            self.label,
                            Self::CONSENT_TIMEOUT.as_secs()
                        );
                    }
                    std::thread::sleep(Self::CALLBACK_POLL);
                }
                Err(e) => return Err(e).context("Failed to accept connection"),
            }
        };
        stream
            .set_nonblocking(false)
            .context("Failed to configure callback connection")?;

        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        let code = callback_param(&request_line, "code");
        let error = callback_param(&request_line, "error");

        let (status, body) = if code.is_some() {
            ("200 OK", "Authentication successful! You can close this window.")
        } else {
            ("400 Bad Request", "Authentication failed. Please try again.")
        };

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        if let Some(err) = error {
            anyhow::bail!("OAuth error: {}", err);
        }

        code.context("No authorization code received")
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Preserve the refresh token if not returned
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    fn load_token(&self) -> Result<StoredToken> {
        config::load_json_file(&self.token_path)
    }

    fn save_token_response(&self, token: &TokenResponse) -> Result<StoredToken> {
        let stored = StoredToken {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
            scopes: self.scopes.scopes.clone(),
        };

        config::write_json_file(&self.token_path, &stored)
            .with_context(|| format!("Failed to save {} token", self.label))?;
        Ok(stored)
    }
}

impl TokenSource for OAuthSession {
    fn access_token(&self) -> Result<String> {
        self.get_access_token_unattended()
    }
}

/// Extract a query parameter from an HTTP request line
///
/// Format: `GET /?code=AUTH_CODE&scope=... HTTP/1.1`
fn callback_param(request_line: &str, name: &str) -> Option<String> {
    let path = request_line.split_whitespace().nth(1)?;
    let query = path.split_once('?')?.1;
    query.split('&').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key != name {
            return None;
        }
        Some(
            urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string()),
        )
    })
}

/// Credential provider backed by client secret files and token caches
#[derive(Debug, Default)]
pub struct OAuthCredentialProvider {
    cancel: CancelToken,
}

impl OAuthCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon pending browser consent once `cancel` is set
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl CredentialProvider for OAuthCredentialProvider {
    fn acquire(
        &self,
        scopes: &ScopeSet,
        cached: &CredentialRef,
    ) -> Result<CredentialContext, AuthError> {
        let label = scopes.role.label();
        let secrets = ClientSecrets::from_file(&cached.client_secrets)
            .map_err(|e| AuthError::new(label, format!("{:#}", e)))?;

        let session = OAuthSession::new(label, secrets, scopes.clone(), &cached.token_cache)
            .with_cancel(self.cancel.clone());
        session
            .get_access_token()
            .map_err(|e| AuthError::new(label, format!("{:#}", e)))?;
        info!(
            "Authenticated {} credential (token cache {})",
            label,
            cached.token_cache.display()
        );

        Ok(CredentialContext::new(label, scopes.clone(), Arc::new(session)))
    }
}
