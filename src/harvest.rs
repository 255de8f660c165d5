//! Two-phase listing collection.
//!
//! Phase 1 walks the listing pages and merges every card into the store.
//! Phase 2 visits the detail page of each record that still lacks its detail
//! fields. The store is flushed after every page, so an interrupted run
//! resumes by simply running again: complete records are skipped.

use crate::config::{SiteConfig, ThrottleConfig};
use crate::error::Result;
use crate::extract::{CompiledSchema, DetailExtractor};
use crate::models::Record;
use crate::scrapers::PageFetcher;
use crate::store::{JsonFileStore, MergeOutcome, RecordStore, UpdatePredicate};
use crate::throttle::Throttle;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

/// Counters reported at the end of a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HarvestSummary {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub new_records: usize,
    pub existing_records: usize,
    pub skipped_records: usize,
    pub details_updated: usize,
    pub details_complete: usize,
    pub details_failed: usize,
    pub total_records: usize,
}

pub struct Harvester {
    fetcher: Box<dyn PageFetcher>,
    site: SiteConfig,
    listing: CompiledSchema,
    detail: DetailExtractor,
    predicate: UpdatePredicate,
    listing_throttle: Throttle,
    detail_throttle: Throttle,
}

impl Harvester {
    pub fn new(
        fetcher: Box<dyn PageFetcher>,
        site: SiteConfig,
        throttle: &ThrottleConfig,
    ) -> Result<Self> {
        let listing = site.listing.compile()?;
        let detail = site.detail.compile()?;
        let predicate = UpdatePredicate::new(site.detail_fields.iter().cloned());

        Ok(Self {
            fetcher,
            site,
            listing,
            detail,
            predicate,
            listing_throttle: Throttle::new(throttle.listing, throttle.backoff),
            detail_throttle: Throttle::new(throttle.detail, throttle.backoff),
        })
    }

    pub fn with_throttles(mut self, listing: Throttle, detail: Throttle) -> Self {
        self.listing_throttle = listing;
        self.detail_throttle = detail;
        self
    }

    pub fn with_max_details(mut self, max_details: Option<usize>) -> Self {
        self.site.max_details = max_details;
        self
    }

    pub async fn run(&self, store: &mut JsonFileStore) -> Result<HarvestSummary> {
        let mut summary = HarvestSummary::default();

        info!("=== Phase 1: Collecting basic information ===");
        self.collect_listings(store, &mut summary).await?;

        info!("=== Phase 2: Collecting detailed information ===");
        self.collect_details(store, &mut summary).await?;

        summary.total_records = store.len();
        info!(
            total = summary.total_records,
            new = summary.new_records,
            updated = summary.details_updated,
            failed = summary.details_failed,
            "Harvest finished, results saved to {}",
            store.path().display()
        );
        Ok(summary)
    }

    pub async fn collect_listings(
        &self,
        store: &mut JsonFileStore,
        summary: &mut HarvestSummary,
    ) -> Result<()> {
        for (index, (page_number, url)) in self.site.listing_urls().into_iter().enumerate() {
            if index > 0 {
                self.listing_throttle.pause().await;
            }

            info!("Processing page {}: {}", page_number, url);
            let html = match self.fetcher.fetch(&url).await {
                Ok(html) => html,
                Err(e) => {
                    warn!("Failed to fetch listing page {}: {}", page_number, e);
                    summary.pages_failed += 1;
                    self.listing_throttle.record_failure();
                    continue;
                }
            };
            self.listing_throttle.record_success();
            summary.pages_fetched += 1;

            let cards = self.listing.extract_html(&html);
            info!("Found {} listings on page {}", cards.len(), page_number);

            for card in cards {
                let record = self.prepare_listing(card, page_number);
                match store.merge(record)? {
                    MergeOutcome::Inserted => summary.new_records += 1,
                    MergeOutcome::Existing => summary.existing_records += 1,
                    MergeOutcome::Skipped => summary.skipped_records += 1,
                }
            }

            store.flush()?;
            debug!("Saved data after page {}", page_number);
        }

        Ok(())
    }

    pub async fn collect_details(
        &self,
        store: &mut JsonFileStore,
        summary: &mut HarvestSummary,
    ) -> Result<()> {
        let ids = store.ids();
        let total = ids.len();
        let mut attempted = 0;

        for (index, id) in ids.iter().enumerate() {
            if !store.needs_update(id, &self.predicate) {
                debug!("Skipping record {} (already has details): {}", index + 1, id);
                summary.details_complete += 1;
                continue;
            }

            if let Some(max) = self.site.max_details {
                if attempted >= max {
                    info!("Reached the limit of {} detail pages for this run", max);
                    break;
                }
            }
            attempted += 1;

            info!("Processing record {} of {}: {}", index + 1, total, id);
            self.detail_throttle.pause().await;

            let html = match self.fetcher.fetch(id).await {
                Ok(html) => html,
                Err(e) => {
                    warn!("Error fetching details from {}: {}", id, e);
                    summary.details_failed += 1;
                    self.detail_throttle.record_failure();
                    continue;
                }
            };
            self.detail_throttle.record_success();

            let detail = self.detail.extract(&html);
            if !store.apply_detail(id, detail, |record| self.detail.derive(record))? {
                continue;
            }
            store.flush()?;
            summary.details_updated += 1;
        }

        Ok(())
    }

    /// Resolve the identifier link, fold the secondary address line into
    /// `address` and stamp the page the card came from
    fn prepare_listing(&self, mut record: Record, page_number: u32) -> Record {
        let id_field = &self.site.id_field;
        if let Some(link) = record.get_str(id_field).map(str::to_string) {
            record.set(id_field.clone(), Value::String(self.resolve_link(&link)));
        }

        if let Some(field) = &self.site.address2_field {
            let extra = record.get_str(field).map(str::trim).unwrap_or_default();
            if !extra.is_empty() {
                let address = match record.get_str("address").map(str::trim) {
                    Some(address) if !address.is_empty() => format!("{} {}", address, extra),
                    _ => extra.to_string(),
                };
                record.set("address", Value::String(address));
            }
        }

        record.set("page_number", Value::from(page_number));
        record
    }

    fn resolve_link(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            return link.to_string();
        }
        Url::parse(&self.site.base_url)
            .and_then(|base| base.join(link))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| link.to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeFetcher;
    use super::*;
    use crate::throttle::testing::RecordingSleeper;
    use crate::throttle::{Backoff, DelayPolicy};
    use tempfile::tempdir;

    const PAGE_1: &str = "https://homes.test/area?hotdeals=true";
    const PAGE_2: &str = "https://homes.test/area/page-2?hotdeals=true";
    const DETAIL_A: &str = "https://www.newhomesource.com/specdetail/964-myers/2833981";
    const DETAIL_B: &str = "https://www.newhomesource.com/specdetail/2425-englemann/2883536";

    fn card(href: &str, address: &str, address2: &str, builder: &str) -> String {
        format!(
            r#"<div class="nhs-c-card--housing"><div class="nhs-c-card__body">
                 <h3 class="nhs-c-card__facts"><a href="{href}">{address}</a>
                   <span data-qa="plan-card-address">{address2}</span></h3>
                 <p class="nhs-c-card__price"><span data-qa="price_label">From $641,320</span></p>
                 <p class="nhs-c-card__facts" data-qa="card_specs">4 Br | 3.5 Ba | 2 Gr</p>
                 <p class="nhs-c-card__facts" data-qa="listing_brand">{builder}</p>
               </div></div>"#
        )
    }

    fn listing_page(cards: &[String]) -> String {
        format!("<html><body>{}</body></html>", cards.concat())
    }

    fn detail_page(image: &str, promo: &str) -> String {
        format!(
            r#"<html><head><script data-component="fullImageViewerData">
                 {{"CommunityId": 7, "Addr": "964 Myers", "City": "Morrisville", "StateAbbr": "NC",
                   "Zip": "27560", "Latitude": "35.8", "Longitude": "-78.8", "Price": 799990,
                   "Collections": [{{"Elements": [{{"Url": "{image}"}}]}}]}}
               </script></head><body>
                 <div class="nhs-c-special-offers__card">
                   <h4 data-qa="special_offers_title_card">{promo}</h4>
                   <div data-qa="special_offers_card_content">Paid closing costs</div>
                   <a data-qa="special_offers_card_link" href="/promo/1">More</a>
                 </div>
               </body></html>"#
        )
    }

    fn site() -> SiteConfig {
        SiteConfig {
            first_page_url: PAGE_1.to_string(),
            page_url_template: "https://homes.test/area/page-{page}?hotdeals=true".to_string(),
            pages: 2,
            ..Default::default()
        }
    }

    fn fixture() -> FakeFetcher {
        let page1 = listing_page(&[card(
            "/specdetail/964-myers/2833981",
            "964 Myers Point Drive.",
            "Morrisville, NC 27560",
            "Baker Residential",
        )]);
        let page2 = listing_page(&[
            card(
                "/specdetail/2425-englemann/2883536",
                "2425 Englemann Drive.",
                "",
                "M/I Homes",
            ),
            card(
                "/specdetail/964-myers/2833981",
                "duplicate",
                "",
                "Baker Residential",
            ),
        ]);
        let detail_a = detail_page("https://img.test/homes/111-front.jpg", "Built for You");
        let detail_b = detail_page("https://img.test/homes/222-back.jpg", "Reduced rates");

        FakeFetcher::new(&[
            (PAGE_1, &page1),
            (PAGE_2, &page2),
            (DETAIL_A, &detail_a),
            (DETAIL_B, &detail_b),
        ])
    }

    fn quiet_throttle() -> ThrottleConfig {
        ThrottleConfig {
            listing: DelayPolicy::none(),
            detail: DelayPolicy::none(),
            batch: DelayPolicy::none(),
            backoff: Backoff::default(),
        }
    }

    fn harvester(fetcher: &FakeFetcher) -> Harvester {
        Harvester::new(Box::new(fetcher.clone()), site(), &quiet_throttle()).unwrap()
    }

    #[tokio::test]
    async fn test_full_run_collects_listings_and_details() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        let fetcher = fixture();

        let mut store = JsonFileStore::open(&path, "link").unwrap();
        let summary = harvester(&fetcher).run(&mut store).await.unwrap();

        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(summary.new_records, 2);
        assert_eq!(summary.existing_records, 1);
        assert_eq!(summary.details_updated, 2);
        assert_eq!(summary.total_records, 2);

        let reloaded = JsonFileStore::open(&path, "link").unwrap();
        let a = reloaded.get(DETAIL_A).unwrap();
        assert_eq!(
            a.get_str("address"),
            Some("964 Myers Point Drive. Morrisville, NC 27560")
        );
        assert_eq!(a.get_str("title"), a.get_str("address"));
        assert_eq!(a.get("page_number"), Some(&Value::from(1)));
        assert_eq!(a.images(), vec!["https://img.test/homes/111-front.jpg"]);
        assert_eq!(a.promotions()[0].promo_title, "Built for You");
        assert_eq!(a.get_str("content"), Some("Built for You Baker Residential"));
        assert_eq!(a.get_str("real_estate_property_location"), Some("35.8,-78.8"));
        assert_eq!(a.get_str("community_address"), Some("964 Myers Morrisville NC 27560"));
        assert_eq!(a.get_str("real_estate_property_country"), Some("US"));
    }

    #[tokio::test]
    async fn test_rerun_skips_complete_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");

        let first = fixture();
        let mut store = JsonFileStore::open(&path, "link").unwrap();
        harvester(&first).run(&mut store).await.unwrap();

        let second = fixture();
        let mut store = JsonFileStore::open(&path, "link").unwrap();
        let summary = harvester(&second).run(&mut store).await.unwrap();

        assert_eq!(second.calls_for(DETAIL_A), 0);
        assert_eq!(second.calls_for(DETAIL_B), 0);
        assert_eq!(summary.new_records, 0);
        assert_eq!(summary.details_complete, 2);
        assert_eq!(summary.details_updated, 0);
    }

    #[tokio::test]
    async fn test_detail_failure_keeps_basic_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listings.json");
        let page = listing_page(&[
            card("/specdetail/missing/1", "1 Gone Street", "", "Nobody"),
            card(
                "/specdetail/2425-englemann/2883536",
                "2425 Englemann Drive.",
                "",
                "M/I Homes",
            ),
        ]);
        let detail_b = detail_page("https://img.test/homes/222-back.jpg", "Reduced rates");
        let fetcher = FakeFetcher::new(&[(PAGE_1, &page), (DETAIL_B, &detail_b)]);

        let mut site = site();
        site.pages = 1;
        let harvester =
            Harvester::new(Box::new(fetcher.clone()), site, &quiet_throttle()).unwrap();
        let mut store = JsonFileStore::open(&path, "link").unwrap();
        let summary = harvester.run(&mut store).await.unwrap();

        assert_eq!(summary.details_failed, 1);
        assert_eq!(summary.details_updated, 1);

        let reloaded = JsonFileStore::open(&path, "link").unwrap();
        let gone = reloaded
            .get("https://www.newhomesource.com/specdetail/missing/1")
            .unwrap();
        assert_eq!(gone.get_str("builder"), Some("Nobody"));
        assert!(!gone.contains("images"));
        assert!(reloaded.get(DETAIL_B).unwrap().is_filled("images"));
    }

    #[tokio::test]
    async fn test_failed_listing_page_does_not_abort() {
        let dir = tempdir().unwrap();
        let page2 = listing_page(&[card(
            "/specdetail/2425-englemann/2883536",
            "2425 Englemann Drive.",
            "",
            "M/I Homes",
        )]);
        let fetcher = FakeFetcher::new(&[(PAGE_2, &page2)]);

        let mut store = JsonFileStore::open(dir.path().join("out.json"), "link").unwrap();
        let mut summary = HarvestSummary::default();
        harvester(&fetcher)
            .collect_listings(&mut store, &mut summary)
            .await
            .unwrap();

        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.pages_fetched, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_max_details_caps_fetches_and_throttle_pauses() {
        let dir = tempdir().unwrap();
        let fetcher = fixture();
        let listing_sleeper = RecordingSleeper::default();
        let detail_sleeper = RecordingSleeper::default();
        let fixed = DelayPolicy::new(1.0, 1.0);

        let harvester = harvester(&fetcher)
            .with_max_details(Some(1))
            .with_throttles(
                Throttle::with_sleeper(fixed, Backoff::default(), Box::new(listing_sleeper.clone())),
                Throttle::with_sleeper(fixed, Backoff::default(), Box::new(detail_sleeper.clone())),
            );

        let mut store = JsonFileStore::open(dir.path().join("out.json"), "link").unwrap();
        let summary = harvester.run(&mut store).await.unwrap();

        assert_eq!(summary.details_updated, 1);
        assert_eq!(fetcher.calls_for(DETAIL_A), 1);
        assert_eq!(fetcher.calls_for(DETAIL_B), 0);
        assert_eq!(listing_sleeper.total(), 1);
        assert_eq!(detail_sleeper.total(), 1);
    }
}
