use std::sync::Arc;

use futures::stream::{self, StreamExt};
use reqwest::header::{ACCEPT, REFERER};
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PortalConfig;
use crate::error::{BotError, Result};
use crate::models::ApplicationOutcome;
use crate::portal::form::{
    confirmation_phrase, extract_form_fields, page_text, snippet, ApplicationForm, FormSpec,
};
use crate::portal::session::Session;
use crate::status::SharedSink;

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Submits application forms for a batch of listings with bounded parallelism.
pub struct ApplicationSubmitter {
    session: Arc<Session>,
    config: PortalConfig,
    sink: SharedSink,
}

impl ApplicationSubmitter {
    pub fn new(session: Arc<Session>, config: PortalConfig, sink: SharedSink) -> Self {
        Self {
            session,
            config,
            sink,
        }
    }

    /// Apply to every listing and return how many were confirmed.
    pub async fn apply_to(&self, listing_ids: &[String], cancel: &CancellationToken) -> Result<usize> {
        let outcomes = self.apply_all(listing_ids, cancel).await?;
        Ok(outcomes.iter().filter(|outcome| outcome.succeeded).count())
    }

    /// Apply to every listing, returning one outcome per id in completion order.
    ///
    /// Fails fast only when the session is not authenticated. Each listing's
    /// failure becomes its own outcome; all attempts finish (or observe the
    /// stop signal) before this returns.
    pub async fn apply_all(
        &self,
        listing_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<ApplicationOutcome>> {
        let client = self.session.client()?;

        if listing_ids.is_empty() {
            self.sink.info("No targets to apply to.");
            return Ok(Vec::new());
        }

        info!("🎯 Submitting {} applications", listing_ids.len());
        self.sink
            .info(&format!("Applying to {} listings...", listing_ids.len()));

        let outcomes: Vec<ApplicationOutcome> = stream::iter(listing_ids)
            .map(|listing_id| async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        ApplicationOutcome::failure(listing_id.as_str(), BotError::Cancelled.to_string())
                    }
                    result = self.submit_one(client, listing_id) => match result {
                        Ok(confirmation) => ApplicationOutcome::success(listing_id.as_str(), confirmation),
                        Err(e) => ApplicationOutcome::failure(listing_id.as_str(), e.to_string()),
                    },
                };
                self.report(&outcome);
                outcome
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|outcome| outcome.succeeded).count();
        self.sink.info(&format!(
            "Finished. Successfully applied to {} of {} listings.",
            succeeded,
            listing_ids.len()
        ));
        Ok(outcomes)
    }

    /// Fetch and validate the application form without submitting it.
    pub async fn probe(&self, listing_id: &str) -> Result<ApplicationForm> {
        let client = self.session.client()?;
        let (_, form) = self.prepare(client, listing_id).await?;
        Ok(form)
    }

    async fn prepare(&self, client: &Client, listing_id: &str) -> Result<(Url, ApplicationForm)> {
        let url = self.config.application_url(listing_id)?;
        debug!("Opening application page {}", url);

        let html = client
            .get(url.clone())
            .header(ACCEPT, HTML_ACCEPT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let spec = FormSpec {
            command_field: &self.config.command_field,
            command_values: &self.config.command_values,
        };
        let form = extract_form_fields(&html, spec).ok_or_else(|| BotError::FormNotFound {
            listing_id: listing_id.to_string(),
        })?;

        if !form.has_field(&self.config.token_field) {
            return Err(BotError::TokenMissing {
                listing_id: listing_id.to_string(),
            });
        }

        Ok((url, form))
    }

    async fn submit_one(&self, client: &Client, listing_id: &str) -> Result<String> {
        let (url, form) = self.prepare(client, listing_id).await?;
        debug!(
            "Submitting {} fields for listing {}",
            form.fields.len(),
            listing_id
        );

        // Status code is not trusted; only the page text decides.
        let body = client
            .post(url.clone())
            .header(REFERER, url.as_str())
            .header(ACCEPT, HTML_ACCEPT)
            .form(&form.fields)
            .send()
            .await?
            .text()
            .await?;

        let text = page_text(&body);
        match confirmation_phrase(&text, &self.config.confirmation_phrases) {
            Some(phrase) => Ok(phrase.to_string()),
            None => Err(BotError::SubmissionUnconfirmed {
                listing_id: listing_id.to_string(),
                snippet: snippet(&body),
            }),
        }
    }

    fn report(&self, outcome: &ApplicationOutcome) {
        if outcome.succeeded {
            self.sink.info(&format!(
                "Successfully applied to listing {}.",
                outcome.listing_id
            ));
        } else {
            self.sink.error(&format!(
                "FAILED to apply to {}: {}",
                outcome.listing_id,
                outcome.reason.as_deref().unwrap_or("unknown error")
            ));
        }
    }
}
