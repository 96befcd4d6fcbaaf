use std::env;
use std::fmt;
use std::time::Duration;

use reqwest::Url;

use crate::error::{BotError, Result};

const DEFAULT_BASE_URL: &str = "https://www.woonnetrijnmond.nl";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Browser selectors used by the interactive login.
#[derive(Debug, Clone)]
pub struct LoginSelectors {
    /// CSS selector of the username input
    pub username: String,
    /// CSS selector of the password input
    pub password: String,
    /// XPath of the submit control
    pub submit_xpath: String,
    /// XPath of an element that only exists once logged in
    pub logged_in_xpath: String,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            username: "#username".to_string(),
            password: "#password".to_string(),
            submit_xpath:
                "//a[contains(@class, 'js-submit-button') and contains(text(), 'Inloggen')]"
                    .to_string(),
            logged_in_xpath: "//a[contains(text(), 'Uitloggen')]".to_string(),
        }
    }
}

/// Everything the core needs to talk to the portal.
///
/// Built by the caller; the core never reads the environment itself.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: Url,
    pub login_path: String,
    pub discovery_path: String,
    pub search_path: String,
    pub detail_path: String,
    pub timer_path: String,
    pub selectors: LoginSelectors,
    /// Hour (local time) at which the daily application window opens
    pub application_hour: u32,
    /// Publish time shown for listings without a timestamp
    pub default_publish_time: String,
    /// Width of the detail-fetch and submission worker pools
    pub concurrency: usize,
    pub search_page_size: u32,
    pub detail_filters: String,
    /// Accepted values of the form's submit control
    pub command_field: String,
    pub command_values: Vec<String>,
    pub token_field: String,
    pub confirmation_phrases: Vec<String>,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub timer_timeout: Duration,
    pub login_timeout: Duration,
    pub headless: bool,
}

impl PortalConfig {
    /// Default portal layout rooted at `base_url`.
    pub fn for_base_url(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BotError::Config(format!("base url '{base_url}': {e}")))?;

        Ok(Self {
            base_url,
            login_path: "/inloggeninschrijven/".to_string(),
            discovery_path: "/nieuw-aanbod/".to_string(),
            search_path:
                "/wsWoonnetRijnmond/Woonwensen/wsWoonwensen.asmx/GetWoonwensResultatenVoorPagina"
                    .to_string(),
            detail_path:
                "/wsWoonnetRijnmond/WoningenModule/Service.asmx/getAanbodEnVolgendeViaId"
                    .to_string(),
            timer_path: "/wsWoonnetRijnmond/WoningenModule/Service.asmx/getTijdTotNieuwAanbod"
                .to_string(),
            selectors: LoginSelectors::default(),
            application_hour: 20,
            default_publish_time: "20:00".to_string(),
            concurrency: 10,
            search_page_size: 100,
            detail_filters: "gebruik!=Complex|nieuwab==True".to_string(),
            command_field: "Command".to_string(),
            command_values: vec!["plaats-einkomen".to_string(), "plaats".to_string()],
            token_field: "__RequestVerificationToken".to_string(),
            confirmation_phrases: vec![
                "uw reactie is verwerkt".to_string(),
                "u heeft al gereageerd".to_string(),
            ],
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(30),
            timer_timeout: Duration::from_secs(10),
            login_timeout: Duration::from_secs(10),
            headless: true,
        })
    }

    pub fn login_url(&self) -> Result<Url> {
        self.join(&self.login_path)
    }

    pub fn discovery_url(&self) -> Result<Url> {
        self.join(&self.discovery_path)
    }

    pub fn search_url(&self) -> Result<Url> {
        self.join(&self.search_path)
    }

    pub fn detail_url(&self) -> Result<Url> {
        self.join(&self.detail_path)
    }

    pub fn timer_url(&self) -> Result<Url> {
        self.join(&self.timer_path)
    }

    /// `{base}/reageren/{id}`
    pub fn application_url(&self, listing_id: &str) -> Result<Url> {
        self.join(&format!("/reageren/{listing_id}"))
    }

    /// Resolve a possibly relative media path against the portal.
    pub fn absolute_url(&self, path: &str) -> Option<String> {
        self.base_url.join(path).ok().map(String::from)
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| BotError::Config(format!("path '{path}': {e}")))
    }
}

/// Top-level configuration for the operator binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub portal: PortalConfig,
    pub telemetry: TelemetryConfig,
    pub credentials: Credentials,
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl AppConfig {
    pub fn load() -> std::result::Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let base_url = env::var("SNIPER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let mut portal = PortalConfig::for_base_url(&base_url)
            .map_err(|_| ConfigError::InvalidBaseUrl(base_url.clone()))?;

        if let Ok(path) = env::var("SNIPER_LOGIN_PATH") {
            portal.login_path = path;
        }
        if let Ok(path) = env::var("SNIPER_DISCOVERY_PATH") {
            portal.discovery_path = path;
        }
        if let Ok(path) = env::var("SNIPER_SEARCH_PATH") {
            portal.search_path = path;
        }
        if let Ok(path) = env::var("SNIPER_DETAIL_PATH") {
            portal.detail_path = path;
        }
        if let Ok(path) = env::var("SNIPER_TIMER_PATH") {
            portal.timer_path = path;
        }

        if let Ok(hour) = env::var("SNIPER_APPLICATION_HOUR") {
            portal.application_hour = hour
                .parse::<u32>()
                .ok()
                .filter(|h| *h < 24)
                .ok_or(ConfigError::InvalidApplicationHour)?;
        }
        if let Ok(width) = env::var("SNIPER_CONCURRENCY") {
            portal.concurrency = width
                .parse::<usize>()
                .ok()
                .filter(|w| *w > 0)
                .ok_or(ConfigError::InvalidConcurrency)?;
        }
        if let Ok(headless) = env::var("SNIPER_HEADLESS") {
            portal.headless = !matches!(
                headless.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }

        let log_level = env::var("SNIPER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            portal,
            telemetry: TelemetryConfig { log_level },
            credentials: Credentials {
                username: env::var("SNIPER_USERNAME").ok(),
                password: env::var("SNIPER_PASSWORD").ok(),
            },
        })
    }
}

/// Invalid `SNIPER_*` settings found while loading the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SNIPER_BASE_URL '{0}' is not a valid URL")]
    InvalidBaseUrl(String),

    #[error("SNIPER_APPLICATION_HOUR must be an hour between 0 and 23")]
    InvalidApplicationHour,

    #[error("SNIPER_CONCURRENCY must be a positive integer")]
    InvalidConcurrency,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "SNIPER_BASE_URL",
            "SNIPER_APPLICATION_HOUR",
            "SNIPER_CONCURRENCY",
            "SNIPER_HEADLESS",
            "SNIPER_LOG_LEVEL",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.portal.application_hour, 20);
        assert_eq!(config.portal.concurrency, 10);
        assert!(config.portal.headless);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn rejects_out_of_range_hour() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SNIPER_APPLICATION_HOUR", "24");
        let err = AppConfig::load().expect_err("hour 24 is rejected");
        assert!(matches!(err, ConfigError::InvalidApplicationHour));
        reset_env();
    }

    #[test]
    fn rejects_zero_concurrency_with_readable_message() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("SNIPER_CONCURRENCY", "0");
        let err = AppConfig::load().expect_err("zero width is rejected");
        assert!(matches!(err, ConfigError::InvalidConcurrency));
        assert_eq!(
            err.to_string(),
            "SNIPER_CONCURRENCY must be a positive integer"
        );
        reset_env();
    }

    #[test]
    fn application_url_joins_listing_id() {
        let portal = PortalConfig::for_base_url("https://portal.example").expect("valid url");
        let url = portal.application_url("12345").expect("joins");
        assert_eq!(url.as_str(), "https://portal.example/reageren/12345");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials {
            username: Some("jan".to_string()),
            password: Some("geheim".to_string()),
        };
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("jan"));
        assert!(!rendered.contains("geheim"));
    }
}
