//! Inline image embedding
//!
//! Engine images are keyed by file name. Markdown references them as
//! `![](images/<name>)`; embedding swaps each reference for a data URI so the
//! response is self-contained.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::{Captures, Regex};

static IMAGE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[\]\((images/.*?)\)").expect("image reference pattern"));

/// MIME type from the image bytes, falling back to the file extension
pub fn mime_type(name: &str, data: &[u8]) -> String {
    match image::guess_format(data) {
        Ok(format) => format.to_mime_type().to_string(),
        Err(_) => mime_guess::from_path(name)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string()),
    }
}

pub fn data_uri(name: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type(name, data), BASE64.encode(data))
}

/// Data URIs for the images `wanted` selects, keyed by file name
pub fn encode_images(
    images: &BTreeMap<String, Vec<u8>>,
    wanted: impl Fn(&str) -> bool,
) -> BTreeMap<String, String> {
    images
        .iter()
        .filter(|(name, _)| wanted(name.as_str()))
        .map(|(name, data)| (name.clone(), data_uri(name, data)))
        .collect()
}

/// Image file names referenced as `![](images/<name>)`
pub fn referenced_images(markdown: &str) -> BTreeSet<String> {
    IMAGE_REF
        .captures_iter(markdown)
        .map(|caps| caps[1].trim_start_matches("images/").to_string())
        .collect()
}

/// Replace `![](images/<name>)` references that have an encoded image
pub fn embed_markdown_images(markdown: &str, encoded: &BTreeMap<String, String>) -> String {
    IMAGE_REF
        .replace_all(markdown, |caps: &Captures<'_>| {
            let path = &caps[1];
            let name = path.trim_start_matches("images/");
            match encoded.get(name) {
                Some(uri) => format!("![]({})", uri),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
