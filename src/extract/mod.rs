//! Declarative extraction.
//!
//! Sites describe what to pull out of a page as data: an [`ExtractionSchema`]
//! of CSS selectors for repeated cards, an [`EmbeddedJsonRule`] for JSON blobs
//! shipped inside `<script>` tags, and [`DerivedField`]s that stitch existing
//! fields together. One generic routine applies them to any page.

mod derived;
mod embedded;

pub use derived::DerivedField;
pub use embedded::{CompiledEmbeddedRule, EmbeddedJsonRule};

use crate::error::{HarvestError, Result};
use crate::models::Record;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Parse a CSS selector, turning failures into configuration errors
pub fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| HarvestError::Selector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

/// Selector rules for a list of repeated elements (listing cards, promo cards)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    pub name: String,
    /// Container matched once per output record
    pub base_selector: String,
    pub fields: Vec<FieldRule>,
}

/// One output field, read from the first match of `selector` inside the container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    pub selector: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Html,
    Attribute { attribute: String },
}

impl FieldRule {
    pub fn text(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            kind: FieldKind::Text,
        }
    }

    pub fn html(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            kind: FieldKind::Html,
        }
    }

    pub fn attribute(name: &str, selector: &str, attribute: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            kind: FieldKind::Attribute {
                attribute: attribute.to_string(),
            },
        }
    }
}

/// An [`ExtractionSchema`] with its selectors parsed
#[derive(Debug)]
pub struct CompiledSchema {
    pub name: String,
    base: Selector,
    fields: Vec<(String, Selector, FieldKind)>,
}

impl ExtractionSchema {
    pub fn compile(&self) -> Result<CompiledSchema> {
        let base = parse_selector(&self.base_selector)?;
        let fields = self
            .fields
            .iter()
            .map(|rule| Ok((rule.name.clone(), parse_selector(&rule.selector)?, rule.kind.clone())))
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledSchema {
            name: self.name.clone(),
            base,
            fields,
        })
    }
}

impl CompiledSchema {
    /// Apply the schema to a whole document, one record per container.
    /// Selectors that miss leave their field absent.
    pub fn extract(&self, document: &Html) -> Vec<Record> {
        let records: Vec<Record> = document
            .select(&self.base)
            .map(|container| self.extract_container(container))
            .filter(|record| !record.is_empty())
            .collect();

        debug!("{}: extracted {} records", self.name, records.len());
        records
    }

    pub fn extract_html(&self, html: &str) -> Vec<Record> {
        self.extract(&Html::parse_document(html))
    }

    fn extract_container(&self, container: ElementRef<'_>) -> Record {
        let mut record = Record::new();

        for (name, selector, kind) in &self.fields {
            let Some(element) = container.select(selector).next() else {
                continue;
            };

            let value = match kind {
                FieldKind::Text => {
                    let text = normalize_whitespace(&element.text().collect::<String>());
                    if text.is_empty() {
                        continue;
                    }
                    text
                }
                FieldKind::Html => element.html(),
                FieldKind::Attribute { attribute } => match element.value().attr(attribute) {
                    Some(value) => value.trim().to_string(),
                    None => continue,
                },
            };

            record.set(name.clone(), Value::String(value));
        }

        record
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Everything a detail page contributes to a record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotions: Option<ExtractionSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded: Option<EmbeddedJsonRule>,
    /// Applied after the detail fields are overlaid onto the stored record
    #[serde(default)]
    pub derived: Vec<DerivedField>,
}

/// Compiled [`DetailRules`]
#[derive(Debug)]
pub struct DetailExtractor {
    promotions: Option<CompiledSchema>,
    embedded: Option<CompiledEmbeddedRule>,
    derived: Vec<DerivedField>,
}

impl DetailRules {
    pub fn compile(&self) -> Result<DetailExtractor> {
        Ok(DetailExtractor {
            promotions: self.promotions.as_ref().map(|s| s.compile()).transpose()?,
            embedded: self.embedded.as_ref().map(|r| r.compile()).transpose()?,
            derived: self.derived.clone(),
        })
    }
}

impl DetailExtractor {
    /// Extract the detail fields of one page.
    ///
    /// `promotions` and `images` are always set when their rule is configured,
    /// empty when nothing matched, so the stored record reflects the latest fetch.
    pub fn extract(&self, html: &str) -> Record {
        let document = Html::parse_document(html);
        let mut detail = Record::new();

        if let Some(schema) = &self.promotions {
            let promos: Vec<Value> = schema
                .extract(&document)
                .into_iter()
                .map(|r| Value::Object(r.into_map()))
                .collect();
            detail.set("promotions", Value::Array(promos));
        }

        if let Some(rule) = &self.embedded {
            match rule.extract(&document) {
                Some(fields) => detail.overlay(fields),
                None => detail.set("images", Value::Array(Vec::new())),
            }
        }

        detail
    }

    /// Recompute derived fields on a merged record
    pub fn derive(&self, record: &mut Record) {
        for field in &self.derived {
            field.apply(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <div class="card">
            <h3 class="facts"><a href="/plan/ashford/2523216">Ashford | Wake   Forest, NC</a>
              <span data-qa="plan-card-address">Wake Forest, NC 27587</span></h3>
            <p class="price"><span data-qa="price_label">From $487,999</span></p>
          </div>
          <div class="card">
            <h3 class="facts"><a href="/specdetail/964-myers/2833981">964 Myers Point Drive</a></h3>
          </div>
          <div class="card"><p>nothing useful</p></div>
        </body></html>
    "#;

    fn listing_schema() -> ExtractionSchema {
        ExtractionSchema {
            name: "cards".to_string(),
            base_selector: "div.card".to_string(),
            fields: vec![
                FieldRule::text("title", "h3.facts a"),
                FieldRule::text("address2", "span[data-qa='plan-card-address']"),
                FieldRule::text("price", "span[data-qa='price_label']"),
                FieldRule::attribute("link", "h3.facts a", "href"),
            ],
        }
    }

    #[test]
    fn test_extracts_one_record_per_container() {
        let schema = listing_schema().compile().unwrap();
        let records = schema.extract_html(LISTING);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_str("title"), Some("Ashford | Wake Forest, NC"));
        assert_eq!(records[0].get_str("price"), Some("From $487,999"));
        assert_eq!(records[0].get_str("link"), Some("/plan/ashford/2523216"));
        assert_eq!(records[1].get_str("link"), Some("/specdetail/964-myers/2833981"));
    }

    #[test]
    fn test_selector_miss_leaves_field_absent() {
        let schema = listing_schema().compile().unwrap();
        let records = schema.extract_html(LISTING);

        assert!(!records[1].contains("price"));
        assert!(!records[1].contains("address2"));
    }

    #[test]
    fn test_invalid_selector_is_config_error() {
        let mut schema = listing_schema();
        schema.fields.push(FieldRule::text("broken", "div[[["));
        let err = schema.compile().unwrap_err();
        assert!(matches!(err, HarvestError::Selector { .. }));
    }

    #[test]
    fn test_schema_from_toml() {
        let schema: ExtractionSchema = toml::from_str(
            r#"
            name = "promos"
            base_selector = ".offer"
            [[fields]]
            name = "promo_title"
            selector = ".title"
            type = "text"
            [[fields]]
            name = "promo_link"
            selector = "a"
            type = "attribute"
            attribute = "href"
            "#,
        )
        .unwrap();

        assert_eq!(schema.fields[0].kind, FieldKind::Text);
        assert_eq!(
            schema.fields[1].kind,
            FieldKind::Attribute {
                attribute: "href".to_string()
            }
        );
    }

    #[test]
    fn test_detail_extractor_sets_empty_promotions_and_images() {
        let rules = DetailRules {
            promotions: Some(ExtractionSchema {
                name: "promos".to_string(),
                base_selector: ".offer".to_string(),
                fields: vec![FieldRule::text("promo_title", ".title")],
            }),
            embedded: Some(EmbeddedJsonRule {
                script_selector: "script[data-component='viewer']".to_string(),
                ..Default::default()
            }),
            derived: Vec::new(),
        };
        let detail = rules.compile().unwrap().extract("<html><body></body></html>");

        assert_eq!(detail.get("promotions"), Some(&Value::Array(vec![])));
        assert_eq!(detail.get("images"), Some(&Value::Array(vec![])));
    }
}
