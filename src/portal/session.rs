use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, REFERER, USER_AGENT};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::error::{BotError, Result};
use crate::portal::traits::Authenticator;
use crate::portal::types::LoginArtifacts;
use crate::status::SharedSink;

const JSON_ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";

/// Authenticated HTTP context shared by discovery, countdown and submission.
///
/// Cookies and headers are fixed at construction; concurrent tasks only read
/// them. Once invalidated every accessor fails with `NotAuthenticated`.
#[derive(Debug)]
pub struct Session {
    client: Client,
    logged_in: AtomicBool,
}

impl Session {
    /// Build a plain HTTP session from what the browser login produced.
    pub fn from_artifacts(config: &PortalConfig, artifacts: &LoginArtifacts) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        for cookie in &artifacts.cookies {
            let mut cookie_str = format!("{}={}", cookie.name, cookie.value);
            if !cookie.domain.is_empty() {
                cookie_str.push_str(&format!("; Domain={}", cookie.domain));
            }
            if !cookie.path.is_empty() {
                cookie_str.push_str(&format!("; Path={}", cookie.path));
            }
            jar.add_cookie_str(&cookie_str, &config.base_url);
        }
        debug!("Seeded cookie jar with {} cookies", artifacts.cookies.len());

        let user_agent = artifacts
            .user_agent
            .as_deref()
            .unwrap_or(config.user_agent.as_str());

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(user_agent)?);
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_ACCEPT));
        headers.insert(REFERER, header_value(config.discovery_url()?.as_str())?);

        let client = Client::builder()
            .cookie_provider(jar)
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            logged_in: AtomicBool::new(true),
        })
    }

    /// The shared client, or `NotAuthenticated` once the session was invalidated.
    pub fn client(&self) -> Result<&Client> {
        if self.is_logged_in() {
            Ok(&self.client)
        } else {
            Err(BotError::NotAuthenticated)
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.logged_in.store(false, Ordering::Release);
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| BotError::Config(format!("invalid header value '{value}': {e}")))
}

/// Drives the browser login once and turns it into a reusable `Session`.
pub struct SessionManager {
    authenticator: Arc<dyn Authenticator>,
    config: PortalConfig,
    sink: SharedSink,
    started: AtomicBool,
}

impl SessionManager {
    pub fn new(authenticator: Arc<dyn Authenticator>, config: PortalConfig, sink: SharedSink) -> Self {
        Self {
            authenticator,
            config,
            sink,
            started: AtomicBool::new(false),
        }
    }

    /// Start the browser. A second call only warns.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("Browser start requested twice, ignoring");
            self.sink.warning("Browser is already running.");
            return Ok(());
        }

        self.sink.info("Initializing browser...");
        if let Err(e) = self.authenticator.start().await {
            self.started.store(false, Ordering::Release);
            self.sink.error(&format!("Could not start the browser: {e}"));
            return Err(e);
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Log in through the browser and copy its state into an HTTP session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Arc<Session>> {
        if !self.is_started() {
            self.start().await?;
        }

        self.sink.info(&format!("Attempting to log in as {username}..."));
        let artifacts = match self.authenticator.login(username, password).await {
            Ok(artifacts) => artifacts,
            Err(e @ BotError::AuthTimeout { .. }) => {
                self.sink
                    .error("Login FAILED. Check credentials or website status.");
                return Err(e);
            }
            Err(e) => {
                self.sink
                    .error(&format!("An unexpected login error occurred: {e}"));
                return Err(e);
            }
        };

        let session = Session::from_artifacts(&self.config, &artifacts)?;
        info!(cookies = artifacts.cookies.len(), "🔐 Session established");
        self.sink.info("Login successful.");
        Ok(Arc::new(session))
    }

    pub async fn shutdown(&self) {
        if self.started.swap(false, Ordering::AcqRel) {
            self.sink.info("Shutting down browser.");
            self.authenticator.shutdown().await;
        }
    }
}
