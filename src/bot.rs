use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::PortalConfig;
use crate::error::{BotError, Result};
use crate::models::{CategorizedListings, Category};
use crate::portal::form::ApplicationForm;
use crate::portal::{
    ApplicationSubmitter, Authenticator, CountdownResolver, ListingDiscovery, ScheduledWaiter,
    SearchParams, Session, SessionManager, WaitOutcome, WallClock,
};
use crate::status::SharedSink;

/// How many listings to go for, and from which categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// `None` applies to every selectable listing
    pub count: Option<usize>,
    /// Also consider `geenvoorrang` listings after the priority ones
    pub include_lower_priority: bool,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            count: Some(1),
            include_lower_priority: false,
        }
    }
}

/// Cheapest selectable listing ids, priority category first.
pub fn select_targets(categorized: &CategorizedListings, selection: &Selection) -> Vec<String> {
    let mut categories = vec![Category::Voorrang];
    if selection.include_lower_priority {
        categories.push(Category::Geenvoorrang);
    }

    let candidates = categories
        .iter()
        .filter_map(|category| categorized.get(category))
        .flatten()
        .filter(|listing| listing.is_selectable && !listing.category.is_excluded())
        .map(|listing| listing.id.clone());

    match selection.count {
        Some(count) => candidates.take(count).collect(),
        None => candidates.collect(),
    }
}

/// One bot run: owns the browser-backed session manager, the authenticated
/// session and the stop signal, and hands them to each component.
///
/// Dropping the bot invalidates the session; the authenticator tears the
/// browser down when its last handle goes away.
pub struct Bot {
    config: PortalConfig,
    sink: SharedSink,
    clock: Arc<dyn WallClock>,
    sessions: SessionManager,
    session: Option<Arc<Session>>,
    cancel: CancellationToken,
}

impl Bot {
    pub fn new(
        config: PortalConfig,
        authenticator: Arc<dyn Authenticator>,
        sink: SharedSink,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        let sessions = SessionManager::new(authenticator, config.clone(), sink.clone());
        Self {
            config,
            sink,
            clock,
            sessions,
            session: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Handle for stopping the run from anywhere; cancelling twice is harmless.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_logged_in())
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let session = self.sessions.login(username, password).await?;
        self.session = Some(session);
        Ok(())
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session
            .as_ref()
            .filter(|session| session.is_logged_in())
            .cloned()
            .ok_or(BotError::NotAuthenticated)
    }

    fn discovery(&self) -> Result<ListingDiscovery> {
        Ok(ListingDiscovery::new(
            self.session()?,
            self.config.clone(),
            self.sink.clone(),
            self.clock.clone(),
        ))
    }

    fn submitter(&self) -> Result<ApplicationSubmitter> {
        Ok(ApplicationSubmitter::new(
            self.session()?,
            self.config.clone(),
            self.sink.clone(),
        ))
    }

    pub async fn discover(&self, params: &SearchParams) -> Result<CategorizedListings> {
        self.discovery()?.discover_all_categorized(params).await
    }

    /// Submit right away.
    pub async fn apply_now(&self, listing_ids: &[String]) -> Result<usize> {
        self.submitter()?.apply_to(listing_ids, &self.cancel).await
    }

    /// Resolve the unlock moment, wait for it, then submit.
    ///
    /// A stop during the wait aborts the run with `Cancelled` before anything
    /// is sent.
    pub async fn apply_at_unlock(&self, listing_ids: &[String]) -> Result<usize> {
        let submitter = self.submitter()?;
        let resolver = CountdownResolver::new(self.session()?, self.config.clone(), self.sink.clone());
        let waiter = ScheduledWaiter::new(
            self.sink.clone(),
            self.clock.clone(),
            self.config.application_hour,
        );

        let countdown = resolver.resolve_wait().await;
        match waiter.wait(countdown, &self.cancel).await {
            WaitOutcome::Elapsed => submitter.apply_to(listing_ids, &self.cancel).await,
            WaitOutcome::Cancelled => Err(BotError::Cancelled),
        }
    }

    /// Discover until something selectable shows up, then apply at unlock.
    ///
    /// Gives up with `Ok(0)` when nothing is selectable once the application
    /// hour has been reached.
    pub async fn run_scheduled(
        &self,
        params: &SearchParams,
        selection: &Selection,
        rediscover_every: Duration,
    ) -> Result<usize> {
        let targets = loop {
            let categorized = self.discover(params).await?;
            let targets = select_targets(&categorized, selection);
            if !targets.is_empty() {
                break targets;
            }

            // Past the application hour everything open is already live.
            if self.clock.now().hour() >= self.config.application_hour {
                self.sink
                    .info("Application window has closed for today. Shutting down.");
                return Ok(0);
            }

            self.sink.info(&format!(
                "No selectable listings yet. Will check again in {}s.",
                rediscover_every.as_secs()
            ));
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(BotError::Cancelled),
                _ = tokio::time::sleep(rediscover_every) => {}
            }
        };

        info!("Selected {} targets: {:?}", targets.len(), targets);
        self.sink
            .info(&format!("Selected listings: {}", targets.join(", ")));
        self.apply_at_unlock(&targets).await
    }

    /// Discover and apply immediately.
    pub async fn run_now(&self, params: &SearchParams, selection: &Selection) -> Result<usize> {
        let categorized = self.discover(params).await?;
        let targets = select_targets(&categorized, selection);
        if targets.is_empty() {
            self.sink.info("No selectable listings found.");
            return Ok(0);
        }
        self.apply_now(&targets).await
    }

    /// Check that one listing's application form can be built; submit only when asked.
    pub async fn run_test(&self, listing_id: &str, submit: bool) -> Result<ApplicationForm> {
        self.sink
            .info(&format!("Test mode started for listing ID: {listing_id}"));
        let form = self.submitter()?.probe(listing_id).await?;
        let names: Vec<&str> = form.fields.keys().map(String::as_str).collect();
        self.sink.info(&format!(
            "Application form found with fields: {}",
            names.join(", ")
        ));
        if form.has_field(&self.config.token_field) {
            self.sink.info("Anti-forgery token found.");
        }

        if submit {
            self.apply_now(&[listing_id.to_string()]).await?;
        } else {
            self.sink
                .info("Test successful. Form was prepared but not submitted as requested.");
        }
        Ok(form)
    }

    /// Invalidate the session and close the browser.
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.invalidate();
        }
        self.sessions.shutdown().await;
    }
}

impl Drop for Bot {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{empty_categories, ListingSummary};
    use crate::portal::session::tests::FakeAuthenticator;
    use crate::portal::traits::SystemClock;
    use crate::portal::FixedClock;
    use crate::status::MemorySink;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing(id: &str, price: f64, category: Category, selectable: bool) -> ListingSummary {
        ListingSummary {
            id: id.to_string(),
            address: String::new(),
            property_type: String::new(),
            price_display: String::new(),
            price_value: price,
            status_text: "LIVE".to_string(),
            is_selectable: selectable,
            image_url: None,
            category,
        }
    }

    fn categorized() -> CategorizedListings {
        let mut grouped = empty_categories();
        grouped.insert(
            Category::Voorrang,
            vec![
                listing("v1", 700.0, Category::Voorrang, true),
                listing("v2", 750.0, Category::Voorrang, false),
                listing("v3", 800.0, Category::Voorrang, true),
            ],
        );
        grouped.insert(
            Category::Geenvoorrang,
            vec![listing("g1", 600.0, Category::Geenvoorrang, true)],
        );
        grouped.insert(
            Category::Uitgesloten,
            vec![listing("u1", 500.0, Category::Uitgesloten, false)],
        );
        grouped
    }

    #[test]
    fn selects_cheapest_selectable_priority_listings() {
        let targets = select_targets(
            &categorized(),
            &Selection {
                count: Some(2),
                include_lower_priority: false,
            },
        );
        assert_eq!(targets, vec!["v1", "v3"]);
    }

    #[test]
    fn max_mode_takes_everything_selectable_in_priority_order() {
        let targets = select_targets(
            &categorized(),
            &Selection {
                count: None,
                include_lower_priority: true,
            },
        );
        assert_eq!(targets, vec!["v1", "v3", "g1"]);
    }

    #[tokio::test]
    async fn operations_refuse_before_login() {
        let bot = Bot::new(
            PortalConfig::for_base_url("https://portal.example").expect("valid url"),
            Arc::new(FakeAuthenticator::default()),
            MemorySink::new(),
            Arc::new(SystemClock),
        );
        assert!(!bot.is_logged_in());
        assert!(matches!(
            bot.discover(&SearchParams::default()).await,
            Err(BotError::NotAuthenticated)
        ));
        assert!(matches!(
            bot.apply_now(&["1".to_string()]).await,
            Err(BotError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn shutdown_invalidates_session() {
        let mut bot = Bot::new(
            PortalConfig::for_base_url("https://portal.example").expect("valid url"),
            Arc::new(FakeAuthenticator::default()),
            MemorySink::new(),
            Arc::new(SystemClock),
        );
        bot.login("jan", "geheim").await.expect("login");
        assert!(bot.is_logged_in());

        bot.shutdown().await;
        assert!(!bot.is_logged_in());
        assert!(matches!(
            bot.apply_now(&["1".to_string()]).await,
            Err(BotError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn scheduled_run_stops_once_the_window_has_closed() {
        let server = MockServer::start().await;
        let config = PortalConfig::for_base_url(&server.uri()).expect("valid url");
        Mock::given(method("POST"))
            .and(path(config.search_path.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "d": { "resultaten": [], "totaal": 0 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let late = NaiveDate::from_ymd_opt(2025, 3, 14)
            .and_then(|d| d.and_hms_opt(21, 30, 0))
            .expect("valid time");
        let sink = MemorySink::new();
        let mut bot = Bot::new(
            config,
            Arc::new(FakeAuthenticator::default()),
            sink.clone(),
            Arc::new(FixedClock(late)),
        );
        bot.login("jan", "geheim").await.expect("login");

        let applied = tokio::time::timeout(
            Duration::from_secs(5),
            bot.run_scheduled(
                &SearchParams::default(),
                &Selection::default(),
                Duration::from_secs(60),
            ),
        )
        .await
        .expect("returns without waiting for another round")
        .expect("run completes");

        assert_eq!(applied, 0);
        assert!(sink.contains("Application window has closed"));
    }
}
