use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::error::{BotError, Result};
use crate::portal::session::Session;
use crate::portal::types::TimerBody;
use crate::status::SharedSink;

/// Asks the portal how long until new listings unlock.
pub struct CountdownResolver {
    session: Arc<Session>,
    config: PortalConfig,
    sink: SharedSink,
}

impl CountdownResolver {
    pub fn new(session: Arc<Session>, config: PortalConfig, sink: SharedSink) -> Self {
        Self {
            session,
            config,
            sink,
        }
    }

    /// Time until unlock according to the server, or `None` when the caller
    /// should fall back to the wall clock.
    ///
    /// Never takes longer than the timer request timeout.
    pub async fn resolve_wait(&self) -> Option<Duration> {
        match self.fetch_remaining().await {
            Ok(remaining) => {
                info!("⏱️ Server countdown: {:.1}s until unlock", remaining.as_secs_f64());
                self.sink.info(&format!(
                    "Server countdown received: {} until new listings.",
                    format_hms(remaining)
                ));
                Some(remaining)
            }
            Err(e) => {
                warn!("Countdown unavailable: {}", e);
                self.sink.warning(&format!(
                    "Server countdown unavailable ({e}), waiting for {:02}:00 local time instead.",
                    self.config.application_hour
                ));
                None
            }
        }
    }

    async fn fetch_remaining(&self) -> Result<Duration> {
        let client = self.session.client()?;
        let body = client
            .get(self.config.timer_url()?)
            .timeout(self.config.timer_timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!("Timer response: {}", body);

        let timer: TimerBody =
            serde_json::from_str(&body).map_err(|e| BotError::decode("countdown", e))?;
        millis_to_wait(timer.remaining_millis.as_ref())
    }
}

/// Non-positive values mean the window is already open.
fn millis_to_wait(value: Option<&Value>) -> Result<Duration> {
    let millis = match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64))
            .ok_or_else(|| BotError::decode("countdown", "remainingMillis out of range"))?,
        Some(other) => {
            return Err(BotError::decode(
                "countdown",
                format!("remainingMillis is not numeric: {other}"),
            ))
        }
        None => return Err(BotError::decode("countdown", "remainingMillis missing")),
    };

    Ok(Duration::from_millis(millis.max(0) as u64))
}

/// `HH:MM:SS`, rounded up to the next whole second; hours not wrapped at 24.
pub fn format_hms(duration: Duration) -> String {
    let total = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::types::LoginArtifacts;
    use crate::status::MemorySink;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn resolver_for(body: ResponseTemplate) -> (MockServer, CountdownResolver) {
        let server = MockServer::start().await;
        let mut config = PortalConfig::for_base_url(&server.uri()).expect("valid url");
        config.timer_timeout = Duration::from_millis(500);
        Mock::given(method("GET"))
            .and(path(config.timer_path.clone()))
            .respond_with(body)
            .mount(&server)
            .await;
        let session = Session::from_artifacts(&config, &LoginArtifacts::default()).expect("session");
        let resolver = CountdownResolver::new(Arc::new(session), config, MemorySink::new());
        (server, resolver)
    }

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_hms(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_hms(Duration::from_secs(3_725)), "01:02:05");
        assert_eq!(format_hms(Duration::from_millis(4_200)), "00:00:05");
    }

    #[tokio::test]
    async fn converts_millis_from_server() {
        let (_server, resolver) =
            resolver_for(ResponseTemplate::new(200).set_body_json(json!({ "remainingMillis": 5_000 })))
                .await;
        assert_eq!(resolver.resolve_wait().await, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn negative_countdown_means_unlock_now() {
        let (_server, resolver) =
            resolver_for(ResponseTemplate::new(200).set_body_json(json!({ "remainingMillis": -1200 })))
                .await;
        assert_eq!(resolver.resolve_wait().await, Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn non_numeric_countdown_falls_back() {
        let (_server, resolver) = resolver_for(
            ResponseTemplate::new(200).set_body_json(json!({ "remainingMillis": "soon" })),
        )
        .await;
        assert_eq!(resolver.resolve_wait().await, None);
    }

    #[tokio::test]
    async fn missing_field_falls_back() {
        let (_server, resolver) =
            resolver_for(ResponseTemplate::new(200).set_body_json(json!({ "other": 1 }))).await;
        assert_eq!(resolver.resolve_wait().await, None);
    }

    #[tokio::test]
    async fn server_error_falls_back() {
        let (_server, resolver) = resolver_for(ResponseTemplate::new(503)).await;
        assert_eq!(resolver.resolve_wait().await, None);
    }

    #[tokio::test]
    async fn slow_timer_is_abandoned_after_timeout() {
        let (_server, resolver) = resolver_for(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "remainingMillis": 1000 }))
                .set_delay(Duration::from_secs(5)),
        )
        .await;
        let started = std::time::Instant::now();
        assert_eq!(resolver.resolve_wait().await, None);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
