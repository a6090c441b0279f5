use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable catalog identifier of a photo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(pub String);

impl PhotoId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhotoId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for PhotoId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Pre-generated image resolutions, ordered from cheapest to largest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum VariantTier {
    Thumb,
    Small,
    Medium,
    Large,
    Original,
}

impl VariantTier {
    pub const ALL: [VariantTier; 5] = [
        VariantTier::Thumb,
        VariantTier::Small,
        VariantTier::Medium,
        VariantTier::Large,
        VariantTier::Original,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VariantTier::Thumb => "thumb",
            VariantTier::Small => "small",
            VariantTier::Medium => "medium",
            VariantTier::Large => "large",
            VariantTier::Original => "original",
        }
    }
}

impl fmt::Display for VariantTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog entry as handed to the engine. Read-only once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoSummary {
    pub id: PhotoId,
    /// Intrinsic pixel width.
    pub width: u32,
    /// Intrinsic pixel height.
    pub height: u32,
    /// Resource locator per stored tier; sparse sets are allowed.
    #[serde(default)]
    pub variant_urls: BTreeMap<VariantTier, String>,
    pub ordinal: u64,
    #[serde(default = "PhotoSummary::default_visible")]
    pub visible: bool,
}

impl PhotoSummary {
    const fn default_visible() -> bool {
        true
    }

    pub fn new(id: impl Into<PhotoId>, width: u32, height: u32, ordinal: u64) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            variant_urls: BTreeMap::new(),
            ordinal,
            visible: true,
        }
    }

    pub fn with_variant(mut self, tier: VariantTier, url: impl Into<String>) -> Self {
        self.variant_urls.insert(tier, url.into());
        self
    }

    /// Width over height; zero when the entry has no usable height.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        f64::from(self.width) / f64::from(self.height)
    }
}

/// Opaque continuation handed out by the Catalog Service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageToken(pub String);

/// One page of catalog results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage {
    pub photos: Vec<PhotoSummary>,
    pub next_page_token: Option<PageToken>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered_cheapest_first() {
        let mut shuffled = vec![
            VariantTier::Original,
            VariantTier::Thumb,
            VariantTier::Large,
            VariantTier::Small,
            VariantTier::Medium,
        ];
        shuffled.sort();
        assert_eq!(shuffled, VariantTier::ALL.to_vec());
    }

    #[test]
    fn zero_height_has_no_aspect_ratio() {
        let photo = PhotoSummary::new("a", 100, 0, 0);
        assert_eq!(photo.aspect_ratio(), 0.0);
    }

    #[test]
    fn parses_catalog_json() {
        let json = r#"{
            "photos": [
                {"id": "p1", "width": 3000, "height": 2000, "ordinal": 4,
                 "variantUrls": {"thumb": "https://cdn/p1/t.jpg", "original": "https://cdn/p1.jpg"}},
                {"id": "p2", "width": 10, "height": 10, "ordinal": 5, "visible": false}
            ],
            "nextPageToken": "abc"
        }"#;
        let page: CatalogPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.photos.len(), 2);
        assert!(page.photos[0].visible);
        assert!(!page.photos[1].visible);
        assert_eq!(
            page.photos[0].variant_urls.get(&VariantTier::Thumb).map(String::as_str),
            Some("https://cdn/p1/t.jpg")
        );
        assert_eq!(page.next_page_token, Some(PageToken("abc".into())));
    }
}
