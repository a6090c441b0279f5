use std::path::Path;
use std::time::Duration;

use anyhow::{Result, ensure};
use serde::Deserialize;

use crate::processing::layout::LayoutOptions;
use crate::processing::variant::VariantWidths;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Row height photos are scaled to before justification, in px.
    pub target_row_height: f64,
    /// Shortest row the packer accepts before shedding a photo.
    pub min_row_height: f64,
    /// Tallest row the packer stretches to.
    pub max_row_height: f64,
    /// Gap between neighbouring tiles and between rows, in px.
    pub margin: f64,
    /// Stretch the trailing row regardless of how full it is.
    pub justify_last_row: bool,
    /// Fraction of the container width an unfinished last row must reach
    /// before it is stretched.
    pub last_row_fill_threshold: f64,
    /// Rows beyond the visible range (in scroll direction) whose variants
    /// are resolved and decoded ahead of time.
    pub preload_row_margin: usize,
    /// Remaining content below the viewport, in viewport heights, that
    /// triggers the next page fetch.
    pub pagination_trigger_distance: f64,
    /// Quiet period after the last resize before rows are recomputed.
    pub resize_debounce_ms: u64,
    /// Pagination retry policy.
    pub fetch: FetchOptions,
    /// Native widths of the generated image tiers.
    pub variants: VariantWidths,
    /// Maximum number of concurrent image decodes.
    pub decoder_max_in_flight: usize,
    /// Capacity of each subscription stream.
    pub event_buffer: usize,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.min_row_height > 0.0,
            "min-row-height must be greater than zero"
        );
        ensure!(
            self.min_row_height <= self.target_row_height
                && self.target_row_height <= self.max_row_height,
            "row heights must satisfy min-row-height <= target-row-height <= max-row-height"
        );
        ensure!(
            self.max_row_height.is_finite(),
            "max-row-height must be finite"
        );
        ensure!(
            self.margin >= 0.0 && self.margin.is_finite(),
            "margin must be a non-negative number"
        );
        ensure!(
            (0.0..=1.0).contains(&self.last_row_fill_threshold),
            "last-row-fill-threshold must be between 0.0 and 1.0"
        );
        ensure!(
            self.pagination_trigger_distance >= 0.0
                && self.pagination_trigger_distance.is_finite(),
            "pagination-trigger-distance must be a non-negative number"
        );
        ensure!(
            self.decoder_max_in_flight > 0,
            "decoder-max-in-flight must be greater than zero"
        );
        ensure!(
            self.event_buffer > 0,
            "event-buffer must be greater than zero"
        );
        ensure!(
            self.variants.is_ascending(),
            "variants must be positive and ordered thumb <= small <= medium <= large"
        );
        self.fetch.validate()?;
        Ok(self)
    }

    pub fn layout_options(&self, container_width: f64) -> LayoutOptions {
        LayoutOptions {
            container_width,
            target_row_height: self.target_row_height,
            min_row_height: self.min_row_height,
            max_row_height: self.max_row_height,
            margin: self.margin,
            justify_last_row: self.justify_last_row,
            last_row_fill_threshold: self.last_row_fill_threshold,
        }
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            target_row_height: 200.0,
            min_row_height: 120.0,
            max_row_height: 280.0,
            margin: 10.0,
            justify_last_row: false,
            last_row_fill_threshold: 0.5,
            preload_row_margin: 2,
            pagination_trigger_distance: 1.0,
            resize_debounce_ms: 150,
            fetch: FetchOptions::default(),
            variants: VariantWidths::default(),
            decoder_max_in_flight: 4,
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct FetchOptions {
    /// Attempts per page before the failure is surfaced as retry-available.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt.
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Upper bound for a single backoff delay.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Random fraction shaved off each delay to spread retries out.
    pub jitter: f64,
}

impl FetchOptions {
    const fn default_max_attempts() -> u32 {
        3
    }

    const fn default_initial_backoff() -> Duration {
        Duration::from_millis(250)
    }

    const fn default_max_backoff() -> Duration {
        Duration::from_secs(5)
    }

    /// Delay before attempt `attempt + 1`, without jitter. `attempt` starts at 1.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.max_attempts >= 1, "fetch.max-attempts must be >= 1");
        ensure!(
            self.initial_backoff <= self.max_backoff,
            "fetch.initial-backoff must not exceed fetch.max-backoff"
        );
        ensure!(
            (0.0..1.0).contains(&self.jitter),
            "fetch.jitter must be in [0.0, 1.0)"
        );
        Ok(())
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_backoff: Self::default_initial_backoff(),
            max_backoff: Self::default_max_backoff(),
            jitter: 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let fetch = FetchOptions {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..FetchOptions::default()
        };
        assert_eq!(fetch.backoff_for(1), Duration::from_millis(100));
        assert_eq!(fetch.backoff_for(2), Duration::from_millis(200));
        assert_eq!(fetch.backoff_for(3), Duration::from_millis(350));
        assert_eq!(fetch.backoff_for(40), Duration::from_millis(350));
    }

    #[test]
    fn layout_options_carry_row_settings() {
        let cfg = Configuration::default();
        let opts = cfg.layout_options(900.0);
        assert_eq!(opts.container_width, 900.0);
        assert_eq!(opts.target_row_height, 200.0);
        assert_eq!(opts.margin, 10.0);
        assert!(!opts.justify_last_row);
    }
}
