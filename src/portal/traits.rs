use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};

use crate::error::Result;
use crate::portal::types::LoginArtifacts;

/// Performs the interactive login and hands back what a plain HTTP session needs.
/// Lets the session manager run without a real browser in tests.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Start the underlying browser. Calling it twice is a no-op.
    async fn start(&self) -> Result<()>;

    /// Log in and return cookies plus user agent of the authenticated browser.
    async fn login(&self, username: &str, password: &str) -> Result<LoginArtifacts>;

    /// Release the browser.
    async fn shutdown(&self);
}

/// Source of local wall-clock time, used for classification and the fallback waiter
pub trait WallClock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl WallClock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}
