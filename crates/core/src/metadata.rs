//! Source metadata as reported by a downloader.

use serde::{Deserialize, Serialize};

/// One selectable file of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_bytes: Option<u64>,
}

impl Variant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            length_bytes: None,
        }
    }

    pub fn with_length(mut self, length_bytes: u64) -> Self {
        self.length_bytes = Some(length_bytes);
        self
    }
}

/// Description of a source URL: its name and the variants it offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub variants: Vec<Variant>,
    /// Whether more than one variant may be selected for a single job.
    #[serde(default)]
    pub allow_multiple_variants: bool,
    pub downloader_name: String,
}

impl Metadata {
    pub fn variant(&self, id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_matches_field_names() {
        let metadata = Metadata {
            url: "magnet:?xt=urn:btih:abc".to_string(),
            name: "Album".to_string(),
            variants: vec![Variant::new("01.mp3").with_length(10), Variant::new("02.mp3")],
            allow_multiple_variants: true,
            downloader_name: "torrent".to_string(),
        };

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["variants"][0], json!({"id": "01.mp3", "length_bytes": 10}));
        assert_eq!(value["variants"][1], json!({"id": "02.mp3"}));
        assert_eq!(value["allow_multiple_variants"], json!(true));
        assert_eq!(value["downloader_name"], json!("torrent"));

        let back: Metadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, metadata);
        assert!(back.variant("02.mp3").is_some());
        assert!(back.variant("03.mp3").is_none());
    }
}
