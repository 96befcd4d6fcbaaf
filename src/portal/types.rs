use std::fmt;

use serde::{Deserialize, Serialize};

/// Which part of the listing feed to search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Only listings published (or publishing) today
    #[default]
    TodayOnly,
    /// Everything currently live plus upcoming listings
    CurrentAndUpcoming,
}

impl SearchMode {
    pub fn filter_mode(&self) -> &'static str {
        match self {
            SearchMode::TodayOnly => "AlleenNieuwVandaag",
            SearchMode::CurrentAndUpcoming => "HuidigEnKomend",
        }
    }
}

/// One optional preference criterion forwarded to the search API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreferenceCriterion {
    #[serde(rename = "kenmerkType")]
    pub kind: String,
    #[serde(rename = "waarde")]
    pub value: String,
    #[serde(rename = "geenVoorkeur", default)]
    pub no_preference: bool,
}

/// Search parameters for the listing-search endpoint
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub mode: SearchMode,
    pub criteria: Vec<PreferenceCriterion>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SearchRequest<'a> {
    #[serde(rename = "filterMode")]
    pub filter_mode: &'static str,
    #[serde(rename = "paginaNummer")]
    pub page: u32,
    #[serde(rename = "paginaGrootte")]
    pub page_size: u32,
    #[serde(rename = "woonwens")]
    pub preferences: SearchPreferences<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SearchPreferences<'a> {
    #[serde(rename = "Kenmerken")]
    pub criteria: &'a [PreferenceCriterion],
}

/// String or bare number; the portal is not consistent about either.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(text) => f.write_str(text.trim()),
            Scalar::Number(number) => write!(f, "{number}"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchEnvelope {
    pub d: SearchPage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchPage {
    #[serde(rename = "resultaten", default)]
    pub results: Vec<SearchHit>,
    #[serde(rename = "totaal", default)]
    pub total: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchHit {
    pub id: Option<Scalar>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DetailRequest<'a> {
    pub id: &'a str,
    pub filters: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DetailEnvelope {
    pub d: DetailBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DetailBody {
    #[serde(rename = "Aanbod")]
    pub listing: ListingDetail,
}

/// Raw per-listing detail as returned by the detail API
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListingDetail {
    pub id: Option<Scalar>,
    #[serde(default)]
    pub straat: Option<String>,
    #[serde(default)]
    pub huisnummer: Option<Scalar>,
    #[serde(default)]
    pub huisletter: Option<String>,
    #[serde(default)]
    pub plaats: Option<String>,
    #[serde(default)]
    pub huurprijs: Option<Scalar>,
    /// Publish timestamp, ISO-8601 local time or with offset
    #[serde(default)]
    pub publstart: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub objecttype: Option<String>,
    #[serde(default)]
    pub voorrang: bool,
    #[serde(default)]
    pub uitgesloten: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MediaItem {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub fotoviewer: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ListingDetail {
    pub fn address(&self) -> String {
        let number = self
            .huisnummer
            .as_ref()
            .map(|n| format!("{n}{}", self.huisletter.as_deref().unwrap_or("").trim()))
            .unwrap_or_default();

        let street = [self.straat.as_deref().unwrap_or("").trim(), number.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        match self.plaats.as_deref().map(str::trim) {
            Some(city) if !city.is_empty() && !street.is_empty() => format!("{street}, {city}"),
            Some(city) if !city.is_empty() => city.to_string(),
            _ => street,
        }
    }

    pub fn first_image(&self) -> Option<&str> {
        self.media
            .iter()
            .find_map(|m| m.fotoviewer.as_deref().or(m.url.as_deref()))
            .filter(|path| !path.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TimerBody {
    #[serde(rename = "remainingMillis")]
    pub remaining_millis: Option<serde_json::Value>,
}

/// A cookie copied out of the browser context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// What a successful interactive login leaves behind
#[derive(Debug, Clone, Default)]
pub struct LoginArtifacts {
    pub user_agent: Option<String>,
    pub cookies: Vec<BrowserCookie>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_joins_street_number_letter_and_city() {
        let detail = ListingDetail {
            straat: Some("Coolsingel".to_string()),
            huisnummer: Some(Scalar::Number(serde_json::Number::from(12))),
            huisletter: Some("B".to_string()),
            plaats: Some("Rotterdam".to_string()),
            ..Default::default()
        };
        assert_eq!(detail.address(), "Coolsingel 12B, Rotterdam");
    }

    #[test]
    fn detail_accepts_numeric_and_textual_ids() {
        let body: DetailEnvelope = serde_json::from_str(
            r#"{"d":{"Aanbod":{"id":42,"huurprijs":"€ 712,50","media":[{"type":"foto","fotoviewer":"/img/1.jpg"}]}}}"#,
        )
        .expect("decodes");
        let listing = body.d.listing;
        assert_eq!(listing.id.as_ref().map(|id| id.to_string()), Some("42".to_string()));
        assert_eq!(listing.first_image(), Some("/img/1.jpg"));
        assert!(!listing.voorrang);
    }

    #[test]
    fn search_request_uses_portal_field_names() {
        let criteria = vec![PreferenceCriterion {
            kind: "24".to_string(),
            value: "1".to_string(),
            no_preference: false,
        }];
        let request = SearchRequest {
            filter_mode: SearchMode::TodayOnly.filter_mode(),
            page: 1,
            page_size: 50,
            preferences: SearchPreferences {
                criteria: &criteria,
            },
        };
        let json = serde_json::to_value(&request).expect("serializes");
        assert_eq!(json["filterMode"], "AlleenNieuwVandaag");
        assert_eq!(json["paginaGrootte"], 50);
        assert_eq!(json["woonwens"]["Kenmerken"][0]["kenmerkType"], "24");
    }
}
