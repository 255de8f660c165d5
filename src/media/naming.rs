use crate::models::{last_segment, Record};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use url::Url;

const DEFAULT_EXTENSION: &str = ".jpg";

fn url_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

/// Extension of the URL path including the dot, `.jpg` when there is none
pub fn file_extension(url: &str) -> String {
    let path = url_path(url);
    Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Deterministic file name for a media URL.
///
/// Image hosts put a numeric id at the front of a path segment
/// (`.../111-front.jpg`); the last segment with one names the file.
/// Otherwise the SHA-256 of the URL is used.
pub fn media_file_name(url: &str) -> String {
    let extension = file_extension(url);
    let path = url_path(url);

    let numeric_id = path.rsplit('/').find_map(|segment| {
        let head = segment.split('-').next().unwrap_or_default();
        (!head.is_empty() && head.bytes().all(|b| b.is_ascii_digit())).then_some(head)
    });

    match numeric_id {
        Some(id) => format!("{}{}", id, extension),
        None => hashed_file_name(url),
    }
}

/// SHA-256 of the full URL plus its extension. Unique per URL, used when
/// the short name is already taken by another URL.
pub fn hashed_file_name(url: &str) -> String {
    format!(
        "{}{}",
        hex::encode(Sha256::digest(url.as_bytes())),
        file_extension(url)
    )
}

/// Per-listing directory name: last segment of the record's link
pub fn listing_dir_name(record: &Record, id_field: &str) -> String {
    record
        .id(id_field)
        .and_then(last_segment)
        .unwrap_or("unknown")
        .to_string()
}

pub fn media_path(dest: &Path, listing_dir: &str, url: &str) -> PathBuf {
    dest.join(listing_dir).join(media_file_name(url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_id_names_file() {
        assert_eq!(
            media_file_name("https://nhs-dynamic.secure.footprint.net/Images/Homes/Baker/2833981-250110.jpg?w=1200"),
            "2833981.jpg"
        );
        assert_eq!(
            media_file_name("https://img.test/homes/4411/front.png"),
            "4411.png"
        );
    }

    #[test]
    fn test_hash_fallback_is_stable() {
        let url = "https://img.test/homes/front-elevation.jpeg";
        let name = media_file_name(url);
        assert!(name.ends_with(".jpeg"));
        assert_eq!(name.len(), 64 + ".jpeg".len());
        assert_eq!(name, media_file_name(url));
    }

    #[test]
    fn test_extension_defaults_to_jpg() {
        assert_eq!(file_extension("https://img.test/homes/photo"), ".jpg");
        assert_eq!(file_extension("https://img.test/homes/photo.gif?x=1"), ".gif");
    }

    #[test]
    fn test_listing_dir_name() {
        let record = Record::try_from(json!({"link": "https://x/specdetail/a/2883536"})).unwrap();
        assert_eq!(listing_dir_name(&record, "link"), "2883536");
        assert_eq!(listing_dir_name(&Record::new(), "link"), "unknown");
    }
}
