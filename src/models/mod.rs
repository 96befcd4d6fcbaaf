use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority bucket a listing falls into for the logged-in applicant
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Applicant matches the preference criteria
    Voorrang,
    /// Appliable, but with lower priority
    Geenvoorrang,
    /// Visible, application disallowed
    Uitgesloten,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::Voorrang,
        Category::Geenvoorrang,
        Category::Uitgesloten,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Voorrang => "voorrang",
            Category::Geenvoorrang => "geenvoorrang",
            Category::Uitgesloten => "uitgesloten",
        }
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, Category::Uitgesloten)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One listing as seen during a single discovery cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingSummary {
    pub id: String,
    pub address: String,
    pub property_type: String,
    pub price_display: String,
    pub price_value: f64,
    /// `LIVE`, `SELECTABLE(hh:mm)` or `PREVIEW(hh:mm)`
    pub status_text: String,
    pub is_selectable: bool,
    pub image_url: Option<String>,
    pub category: Category,
}

/// Discovery output: every category is always present, each sorted by price.
pub type CategorizedListings = BTreeMap<Category, Vec<ListingSummary>>;

pub fn empty_categories() -> CategorizedListings {
    Category::ALL.iter().map(|c| (*c, Vec::new())).collect()
}

/// Result of one submission attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationOutcome {
    pub listing_id: String,
    pub succeeded: bool,
    pub reason: Option<String>,
}

impl ApplicationOutcome {
    pub fn success(listing_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            succeeded: true,
            reason: Some(reason.into()),
        }
    }

    pub fn failure(listing_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            succeeded: false,
            reason: Some(reason.into()),
        }
    }
}

/// Form field name to value, ordered for deterministic submission bodies
pub type FormPayload = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_categories_has_all_three_buckets() {
        let categories = empty_categories();
        assert_eq!(categories.len(), 3);
        assert!(categories.values().all(Vec::is_empty));
    }

    #[test]
    fn category_serializes_lowercase() {
        let json = serde_json::to_string(&Category::Geenvoorrang).expect("serializes");
        assert_eq!(json, "\"geenvoorrang\"");
    }
}
