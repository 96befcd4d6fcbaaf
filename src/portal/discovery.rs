use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::error::{BotError, Result};
use crate::models::{empty_categories, CategorizedListings, Category, ListingSummary};
use crate::portal::session::Session;
use crate::portal::traits::WallClock;
use crate::portal::types::{
    DetailEnvelope, DetailRequest, ListingDetail, Scalar, SearchEnvelope, SearchParams,
    SearchPreferences, SearchRequest,
};
use crate::status::SharedSink;

const MAX_SEARCH_PAGES: u32 = 10;

const PUBLISH_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parse a portal price such as `€ 1.234,56`.
///
/// Everything except digits and the decimal comma is dropped. Empty or
/// unparseable text yields `0.0`.
pub fn parse_price(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',')
        .collect();

    if cleaned.is_empty() {
        return 0.0;
    }

    cleaned.replace(',', ".").parse().unwrap_or(0.0)
}

/// Display text and numeric value of a listing's rent.
fn price_of(detail: &ListingDetail) -> (String, f64) {
    match &detail.huurprijs {
        Some(Scalar::Number(number)) => {
            let value = number.as_f64().unwrap_or(0.0);
            (format!("€ {:.2}", value).replace('.', ","), value)
        }
        Some(Scalar::Text(text)) => (text.trim().to_string(), parse_price(text)),
        None => (String::new(), 0.0),
    }
}

fn parse_publish_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.with_timezone(&Local).naive_local());
    }
    PUBLISH_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

fn category_of(detail: &ListingDetail) -> Category {
    if detail.uitgesloten {
        Category::Uitgesloten
    } else if detail.voorrang {
        Category::Voorrang
    } else {
        Category::Geenvoorrang
    }
}

/// Derive status, selectability and price of one listing at `now`.
pub fn classify(
    id: &str,
    detail: &ListingDetail,
    now: NaiveDateTime,
    config: &PortalConfig,
) -> ListingSummary {
    let category = category_of(detail);
    let excluded = category.is_excluded();
    let publish = detail.publstart.as_deref().and_then(parse_publish_time);

    let late_day = now.hour() >= config.application_hour;
    let is_live = publish.is_some_and(|at| at <= now);
    let in_selectable_window = now.hour() + 2 >= config.application_hour;

    let time_label = publish
        .map(|at| at.format("%H:%M").to_string())
        .unwrap_or_else(|| config.default_publish_time.clone());

    let status_text = if (late_day && !excluded) || is_live {
        "LIVE".to_string()
    } else if in_selectable_window {
        format!("SELECTABLE({time_label})")
    } else {
        format!("PREVIEW({time_label})")
    };

    let (price_display, price_value) = price_of(detail);

    ListingSummary {
        id: id.to_string(),
        address: detail.address(),
        property_type: detail.objecttype.clone().unwrap_or_default(),
        price_display,
        price_value,
        status_text,
        is_selectable: (is_live || in_selectable_window) && !excluded,
        image_url: detail.first_image().and_then(|path| config.absolute_url(path)),
        category,
    }
}

/// Group classified listings and sort each group by price, cheapest first.
pub fn group_by_category(listings: Vec<ListingSummary>) -> CategorizedListings {
    let mut grouped = empty_categories();
    for listing in listings {
        grouped.entry(listing.category).or_default().push(listing);
    }
    for bucket in grouped.values_mut() {
        bucket.sort_by(|a, b| a.price_value.total_cmp(&b.price_value));
    }
    grouped
}

/// Finds and classifies candidate listings through the portal's JSON API
pub struct ListingDiscovery {
    session: Arc<Session>,
    config: PortalConfig,
    sink: SharedSink,
    clock: Arc<dyn WallClock>,
}

impl ListingDiscovery {
    pub fn new(
        session: Arc<Session>,
        config: PortalConfig,
        sink: SharedSink,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        Self {
            session,
            config,
            sink,
            clock,
        }
    }

    /// Run one discovery cycle.
    ///
    /// Only `NotAuthenticated` is returned as an error. A failed search is
    /// reported and yields empty categories; a failed detail fetch drops that
    /// one listing.
    pub async fn discover_all_categorized(&self, params: &SearchParams) -> Result<CategorizedListings> {
        let client = self.session.client()?;

        let ids = match self.search_ids(client, params).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Listing search failed: {}", e);
                self.sink.error(&format!("Listing search failed: {e}"));
                return Ok(empty_categories());
            }
        };

        if ids.is_empty() {
            self.sink.info("No listings found.");
            return Ok(empty_categories());
        }

        self.sink
            .info(&format!("Found {} listings, fetching details...", ids.len()));

        let details: Vec<(String, ListingDetail)> = stream::iter(ids)
            .map(|id| async move {
                let detail = self.fetch_detail(client, &id).await;
                (id, detail)
            })
            .buffered(self.config.concurrency.max(1))
            .filter_map(|(id, detail)| async move {
                match detail {
                    Ok(detail) => Some((id, detail)),
                    Err(e) => {
                        warn!("Dropping listing {}: {}", id, e);
                        self.sink
                            .warning(&format!("Could not load details for listing {id}: {e}"));
                        None
                    }
                }
            })
            .collect()
            .await;

        let now = self.clock.now();
        let summaries: Vec<ListingSummary> = details
            .iter()
            .map(|(id, detail)| classify(id, detail, now, &self.config))
            .collect();

        let selectable = summaries.iter().filter(|s| s.is_selectable).count();
        info!(
            "✅ Classified {} listings ({} selectable)",
            summaries.len(),
            selectable
        );
        self.sink.info(&format!(
            "Discovered {} listings, {} selectable.",
            summaries.len(),
            selectable
        ));

        Ok(group_by_category(summaries))
    }

    async fn search_ids(&self, client: &Client, params: &SearchParams) -> Result<Vec<String>> {
        let url = self.config.search_url()?;
        let page_size = self.config.search_page_size;
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        for page in 1..=MAX_SEARCH_PAGES {
            let request = SearchRequest {
                filter_mode: params.mode.filter_mode(),
                page,
                page_size,
                preferences: SearchPreferences {
                    criteria: &params.criteria,
                },
            };

            debug!("Fetching search page {}", page);
            let body = client
                .post(url.clone())
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;

            let envelope: SearchEnvelope = serde_json::from_str(&body)
                .map_err(|e| BotError::decode("search results", e))?;
            let hits = envelope.d.results.len();

            for hit in envelope.d.results {
                let Some(id) = hit.id.map(|id| id.to_string()) else {
                    continue;
                };
                if !id.is_empty() && seen.insert(id.clone()) {
                    ids.push(id);
                }
            }

            let reached_total = envelope
                .d
                .total
                .is_some_and(|total| u64::from(page) * u64::from(page_size) >= u64::from(total));
            if hits < page_size as usize || reached_total {
                break;
            }
        }

        debug!("Search returned {} unique listing ids", ids.len());
        Ok(ids)
    }

    async fn fetch_detail(&self, client: &Client, id: &str) -> Result<ListingDetail> {
        let request = DetailRequest {
            id,
            filters: &self.config.detail_filters,
        };

        let body = client
            .post(self.config.detail_url()?)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let envelope: DetailEnvelope =
            serde_json::from_str(&body).map_err(|e| BotError::decode("listing detail", e))?;
        Ok(envelope.d.listing)
    }
}
