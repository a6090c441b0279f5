use serde::{Deserialize, Serialize};

use crate::model::{PhotoSummary, VariantTier};

/// Native pixel widths of the generated tiers. `original` is always the
/// photo's intrinsic width and every other tier is capped by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct VariantWidths {
    pub thumb: u32,
    pub small: u32,
    pub medium: u32,
    pub large: u32,
}

impl Default for VariantWidths {
    fn default() -> Self {
        Self {
            thumb: 320,
            small: 640,
            medium: 1280,
            large: 2048,
        }
    }
}

impl VariantWidths {
    pub fn native_width(&self, tier: VariantTier, photo: &PhotoSummary) -> u32 {
        let generated = match tier {
            VariantTier::Thumb => self.thumb,
            VariantTier::Small => self.small,
            VariantTier::Medium => self.medium,
            VariantTier::Large => self.large,
            VariantTier::Original => return photo.width,
        };
        generated.min(photo.width)
    }

    pub(crate) fn is_ascending(&self) -> bool {
        self.thumb > 0
            && self.thumb <= self.small
            && self.small <= self.medium
            && self.medium <= self.large
    }
}

/// Outcome of a variant lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum Resolved {
    Variant { tier: VariantTier, url: String },
    /// No tier is stored; the renderer shows a placeholder.
    Missing,
}

impl Resolved {
    pub fn tier(&self) -> Option<VariantTier> {
        match self {
            Resolved::Variant { tier, .. } => Some(*tier),
            Resolved::Missing => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Resolved::Variant { url, .. } => Some(url),
            Resolved::Missing => None,
        }
    }
}

/// Picks the cheapest stored resource that covers a tile at a pixel density.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariantResolver {
    widths: VariantWidths,
}

impl VariantResolver {
    pub fn new(widths: VariantWidths) -> Self {
        Self { widths }
    }

    pub fn widths(&self) -> &VariantWidths {
        &self.widths
    }

    /// Device pixels a tile of `rendered_width_px` needs.
    pub fn effective_pixels(rendered_width_px: f64, device_pixel_ratio: f64) -> f64 {
        let dpr = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
        (rendered_width_px * dpr).max(0.0)
    }

    /// Smallest tier wide enough for the tile, ignoring which URLs exist.
    pub fn sufficient_tier(
        &self,
        photo: &PhotoSummary,
        rendered_width_px: f64,
        device_pixel_ratio: f64,
    ) -> VariantTier {
        let needed = Self::effective_pixels(rendered_width_px, device_pixel_ratio);
        VariantTier::ALL
            .into_iter()
            .find(|tier| f64::from(self.widths.native_width(*tier, photo)) >= needed)
            .unwrap_or(VariantTier::Original)
    }

    pub fn resolve(
        &self,
        photo: &PhotoSummary,
        rendered_width_px: f64,
        device_pixel_ratio: f64,
    ) -> Resolved {
        let wanted = self.sufficient_tier(photo, rendered_width_px, device_pixel_ratio);
        let upward = VariantTier::ALL.into_iter().filter(|tier| *tier >= wanted);
        let downward = VariantTier::ALL.into_iter().rev().filter(|tier| *tier < wanted);
        upward
            .chain(downward)
            .find_map(|tier| {
                photo.variant_urls.get(&tier).map(|url| Resolved::Variant {
                    tier,
                    url: url.clone(),
                })
            })
            .unwrap_or(Resolved::Missing)
    }
}
