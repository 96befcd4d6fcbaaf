use thiserror::Error;

/// Failures produced by the timed-application core.
///
/// Per-listing variants (`FormNotFound`, `TokenMissing`, `SubmissionUnconfirmed`)
/// are converted into an `ApplicationOutcome` at the item boundary and never
/// abort a batch.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("timed out waiting for {stage} during login")]
    AuthTimeout { stage: &'static str },

    #[error("not authenticated: log in before using the portal session")]
    NotAuthenticated,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("could not decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("no application form found for listing {listing_id}")]
    FormNotFound { listing_id: String },

    #[error("anti-forgery token missing for listing {listing_id}")]
    TokenMissing { listing_id: String },

    #[error("submission for listing {listing_id} not confirmed: {snippet}")]
    SubmissionUnconfirmed { listing_id: String, snippet: String },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("stopped by user")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BotError {
    pub(crate) fn decode(what: &'static str, reason: impl ToString) -> Self {
        Self::Decode {
            what,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
