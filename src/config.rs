//! Harvest configuration.
//!
//! Everything site-specific lives here as data: listing URLs, selector
//! schemas, embedded-JSON rules, delays and output paths. Built-in defaults
//! target the new-home listing site; a TOML file can override any section.

use crate::error::{HarvestError, Result};
use crate::extract::{DerivedField, DetailRules, EmbeddedJsonRule, ExtractionSchema, FieldRule};
use crate::scrapers::{BrowserConfig, HttpConfig};
use crate::throttle::{Backoff, DelayPolicy, MAX_DELAY_SECS};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub site: SiteConfig,
    pub throttle: ThrottleConfig,
    pub http: HttpConfig,
    pub browser: BrowserConfig,
    pub media: MediaConfig,
    pub search_api: SearchApiConfig,
    pub output: OutputConfig,
}

impl HarvestConfig {
    /// Load from a TOML file, or fall back to built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                let raw = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| HarvestError::Config(e.to_string()))
    }

    /// Compile every selector so mistakes surface before any fetching starts
    pub fn validate(&self) -> Result<()> {
        self.site.listing.compile()?;
        self.site.detail.compile()?;
        if self.site.id_field.trim().is_empty() {
            return Err(HarvestError::Config("site.id_field must not be empty".into()));
        }
        if self.media.concurrency == 0 {
            return Err(HarvestError::Config("media.concurrency must be at least 1".into()));
        }
        self.throttle.validate()
    }
}

/// One listing site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub name: String,
    /// Origin used to resolve relative links
    pub base_url: String,
    pub first_page_url: String,
    /// URL of page N > 1, with `{page}` standing in for the number
    pub page_url_template: String,
    pub pages: u32,
    /// Field holding the natural identifier of a record
    pub id_field: String,
    /// Appended to `address` when non-empty
    pub address2_field: Option<String>,
    /// A record needs its detail page while any of these is missing or empty
    pub detail_fields: Vec<String>,
    /// Cap on detail pages fetched per run
    pub max_details: Option<usize>,
    pub listing: ExtractionSchema,
    pub detail: DetailRules,
}

impl SiteConfig {
    /// `(page_number, url)` for every listing page to visit
    pub fn listing_urls(&self) -> Vec<(u32, String)> {
        (1..=self.pages)
            .map(|page| {
                let url = if page == 1 {
                    self.first_page_url.clone()
                } else {
                    self.page_url_template.replace("{page}", &page.to_string())
                };
                (page, url)
            })
            .collect()
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        let area = "https://www.newhomesource.com/homes/nc/raleigh-durham-chapel-hill-area/clayton";
        Self {
            name: "newhomesource".to_string(),
            base_url: "https://www.newhomesource.com".to_string(),
            first_page_url: format!("{}?hotdeals=true", area),
            page_url_template: format!("{}/page-{{page}}?hotdeals=true", area),
            pages: 1,
            id_field: "link".to_string(),
            address2_field: Some("address2".to_string()),
            detail_fields: vec!["images".to_string(), "promotions".to_string()],
            max_details: None,
            listing: default_listing_schema(),
            detail: default_detail_rules(),
        }
    }
}

fn default_listing_schema() -> ExtractionSchema {
    let facts = ".nhs-c-card__body h3.nhs-c-card__facts";
    ExtractionSchema {
        name: "Community Listings".to_string(),
        base_selector: ".nhs-c-card--housing".to_string(),
        fields: vec![
            FieldRule::text("title", &format!("{} a", facts)),
            FieldRule::text(
                "price",
                ".nhs-c-card__body p.nhs-c-card__price span[data-qa='price_label']",
            ),
            FieldRule::text("address", &format!("{} a", facts)),
            FieldRule::text(
                "address2",
                &format!("{} span[data-qa='plan-card-address']", facts),
            ),
            FieldRule::text(
                "details",
                ".nhs-c-card__body p.nhs-c-card__facts[data-qa='card_specs']",
            ),
            FieldRule::text(
                "builder",
                ".nhs-c-card__body p.nhs-c-card__facts[data-qa='listing_brand']",
            ),
            FieldRule::attribute("link", &format!("{} a", facts), "href"),
        ],
    }
}

fn default_detail_rules() -> DetailRules {
    let embedded_fields = [
        "State", "StateAbbr", "BuilderId", "MarketId", "MarketName", "CommunityId",
        "CommunityName", "Latitude", "Longitude", "PrLo", "PrHi", "SftLo", "SftHi", "Type",
        "ProjectType", "CommunityType", "HomeCount", "QmInCount", "Phone", "IsTrackingNumber",
        "Addr", "City", "Zip", "SpecId", "Price", "Sft", "Br", "Ba", "Gr",
    ];
    let aliases = [
        ("real_estate_property_price_short", "Price"),
        ("real_estate_property_price", "Price"),
        ("real_estate_property_size", "Sft"),
        ("real_estate_property_bedrooms", "Br"),
        ("real_estate_property_bathrooms", "Ba"),
        ("real_estate_property_garage", "Gr"),
    ];
    let constants = [
        ("real_estate_property_virtual_tour_type", "0"),
        ("real_estate_property_price_unit", "1"),
        ("real_estate_property_price_prefix", "From"),
        ("real_estate_property_price_on_call", "0"),
        ("real_estate_additional_features", "1"),
        ("real_estate_property_featured", "0"),
        ("real_estate_property_country", "US"),
    ];

    DetailRules {
        promotions: Some(ExtractionSchema {
            name: "Community Promos".to_string(),
            base_selector: ".nhs-c-special-offers__card".to_string(),
            fields: vec![
                FieldRule::text("promo_title", "[data-qa='special_offers_title_card']"),
                FieldRule::text("promo_content", "[data-qa='special_offers_card_content']"),
                FieldRule::attribute("promo_link", "[data-qa='special_offers_card_link']", "href"),
            ],
        }),
        embedded: Some(EmbeddedJsonRule {
            script_selector: "script[data-component='fullImageViewerData']".to_string(),
            fields: embedded_fields.iter().map(|f| f.to_string()).collect(),
            aliases: aliases
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            constants: constants
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            images_path: vec!["Collections".into(), "Elements".into(), "Url".into()],
        }),
        derived: vec![
            DerivedField::new("title", &["address"], " "),
            DerivedField::new("real_estate_property_address", &["address"], " "),
            DerivedField::new("community_address", &["Addr", "City", "StateAbbr", "Zip"], " "),
            DerivedField::new("real_estate_property_zip", &["Zip"], " "),
            DerivedField::new("real_estate_property_location", &["Latitude", "Longitude"], ","),
            DerivedField::new("content", &["promotions[].promo_title", "builder"], " "),
        ],
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Between listing pages
    pub listing: DelayPolicy,
    /// Before each detail page
    pub detail: DelayPolicy,
    /// Between pages in batch page mode
    pub batch: DelayPolicy,
    pub backoff: Backoff,
}

impl ThrottleConfig {
    /// Delays must be finite, non-negative, ordered and at most a day
    pub fn validate(&self) -> Result<()> {
        for (name, policy) in [
            ("listing", &self.listing),
            ("detail", &self.detail),
            ("batch", &self.batch),
        ] {
            check_secs(&format!("throttle.{}.min_secs", name), policy.min_secs)?;
            check_secs(&format!("throttle.{}.max_secs", name), policy.max_secs)?;
            if policy.min_secs > policy.max_secs {
                return Err(HarvestError::Config(format!(
                    "throttle.{}: min_secs {} exceeds max_secs {}",
                    name, policy.min_secs, policy.max_secs
                )));
            }
        }

        check_secs("throttle.backoff.max_secs", self.backoff.max_secs)?;
        if !self.backoff.multiplier.is_finite() || self.backoff.multiplier < 1.0 {
            return Err(HarvestError::Config(format!(
                "throttle.backoff.multiplier must be a finite number >= 1, got {}",
                self.backoff.multiplier
            )));
        }
        Ok(())
    }
}

fn check_secs(name: &str, secs: f64) -> Result<()> {
    if !secs.is_finite() || !(0.0..=MAX_DELAY_SECS).contains(&secs) {
        return Err(HarvestError::Config(format!(
            "{} must be between 0 and {} seconds, got {}",
            name, MAX_DELAY_SECS, secs
        )));
    }
    Ok(())
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            listing: DelayPolicy::new(10.0, 15.0),
            detail: DelayPolicy::new(50.0, 80.0),
            batch: DelayPolicy::new(2.0, 2.0),
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Downloads in flight at once
    pub concurrency: usize,
    /// Tab-separated URL -> path mapping, kept inside the destination directory
    pub mapping_file: String,
    pub failed_file: String,
    /// Only URLs containing one of these (case-insensitive) are downloaded
    pub extensions: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            concurrency: 30,
            mapping_file: "image_property_mapping.csv".to_string(),
            failed_file: "failed_downloads.txt".to_string(),
            extensions: [".jpg", ".jpeg", ".png", ".gif"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

/// JSON search endpoint that lists detail-page links
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchApiConfig {
    pub endpoint: String,
    pub headers: IndexMap<String, String>,
    pub payload: Value,
    /// Dot path from a result entry to its link
    pub link_path: String,
    /// Prepended to relative links
    pub link_prefix: String,
}

impl Default for SearchApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.drhorton.com/coveo/rest/search/v2".to_string(),
            headers: IndexMap::from([
                (
                    "Accept".to_string(),
                    "application/json, text/plain, */*".to_string(),
                ),
                ("Origin".to_string(), "https://www.drhorton.com".to_string()),
                (
                    "Referer".to_string(),
                    "https://www.drhorton.com/florida".to_string(),
                ),
            ]),
            payload: json!({
                "referrer": "https://www.drhorton.com/florida",
                "aq": "(@fz95xtemplatename67549==\"Community Landing\") (@fid67549<>\"\") ($qf(function:'dist(@fcoordinatesz32xlatitude67549, @fcoordinatesz32xlongitude67549, 27.90688, -84.07391)', fieldName: 'distance')) (@distance<450000)",
                "cq": "(@source==\"Coveo_web_index - 93DrHortonProd\") (@fcoordinatesz32xlatitude67549) (@fz95xlanguage67549==en) (@fz95xlatestversion67549==1)",
                "numberOfResults": 5000,
                "fieldsToInclude": ["@furllink67549"],
                "pipeline": "allresults",
                "searchHub": "Florida",
                "term": ""
            }),
            link_path: "raw.furllink67549".to_string(),
            link_prefix: "https://www.drhorton.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub records: PathBuf,
    pub links: PathBuf,
    pub pages_dir: PathBuf,
    /// File name prefix for single-page output
    pub page_prefix: String,
    /// Automatic store flush every N mutations; 0 flushes only after each page
    pub flush_every: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            records: PathBuf::from("data/listings.json"),
            links: PathBuf::from("data/links.json"),
            pages_dir: PathBuf::from("data/pages"),
            page_prefix: "page".to_string(),
            flush_every: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FieldKind;

    #[test]
    fn test_defaults_are_valid() {
        HarvestConfig::default().validate().unwrap();
    }

    #[test]
    fn test_listing_urls() {
        let site = SiteConfig {
            first_page_url: "https://x/homes?hotdeals=true".to_string(),
            page_url_template: "https://x/homes/page-{page}?hotdeals=true".to_string(),
            pages: 3,
            ..Default::default()
        };
        assert_eq!(
            site.listing_urls(),
            vec![
                (1, "https://x/homes?hotdeals=true".to_string()),
                (2, "https://x/homes/page-2?hotdeals=true".to_string()),
                (3, "https://x/homes/page-3?hotdeals=true".to_string()),
            ]
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HarvestConfig::from_toml(
            r#"
            [site]
            pages = 3
            max_details = 42

            [throttle.detail]
            min_secs = 1.0
            max_secs = 2.0

            [media]
            concurrency = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.site.pages, 3);
        assert_eq!(config.site.max_details, Some(42));
        assert_eq!(config.site.id_field, "link");
        assert_eq!(config.throttle.detail, DelayPolicy::new(1.0, 2.0));
        assert_eq!(config.throttle.listing, DelayPolicy::new(10.0, 15.0));
        assert_eq!(config.media.concurrency, 4);
        assert_eq!(config.media.mapping_file, "image_property_mapping.csv");
    }

    #[test]
    fn test_toml_overrides_listing_schema() {
        let config = HarvestConfig::from_toml(
            r#"
            [site.listing]
            name = "cards"
            base_selector = "article.card"

            [[site.listing.fields]]
            name = "link"
            selector = "a"
            type = "attribute"
            attribute = "href"
            "#,
        )
        .unwrap();

        assert_eq!(config.site.listing.base_selector, "article.card");
        assert!(matches!(
            config.site.listing.fields[0].kind,
            FieldKind::Attribute { .. }
        ));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_delays() {
        for raw in [
            "[throttle.detail]\nmin_secs = 1e20\nmax_secs = 1e20",
            "[throttle.listing]\nmin_secs = 1.0\nmax_secs = inf",
            "[throttle.batch]\nmin_secs = -1.0\nmax_secs = 2.0",
            "[throttle.detail]\nmin_secs = 80.0\nmax_secs = 50.0",
            "[throttle.backoff]\nmultiplier = 2.0\nmax_secs = nan",
            "[throttle.backoff]\nmultiplier = 0.5\nmax_secs = 300.0",
        ] {
            let config = HarvestConfig::from_toml(raw).unwrap();
            assert!(
                matches!(config.validate(), Err(HarvestError::Config(_))),
                "accepted: {}",
                raw
            );
        }
    }

    #[test]
    fn test_validate_rejects_bad_selector() {
        let mut config = HarvestConfig::default();
        config.site.listing.base_selector = "[[".to_string();
        assert!(config.validate().is_err());
    }
}
