//! Progress budgeting.
//!
//! A run has a fixed allowance of percentage points for downloads. Each image
//! gets a share proportional to its size, and that share is spread over its
//! chunks: either one point every `spacing_count` chunks, or
//! `percent_increment` points on every chunk.

use crate::image::FirmwareImage;

/// Points available to downloads.
pub const PROGRESS_RANGE: u32 = 82;

/// Points reserved for the erase step when formatting.
pub const ERASE_PROGRESS: u32 = 4;

/// Highest percentage reported before the run shuts down.
pub const PROGRESS_CEILING: u8 = 98;

/// Per-image progress pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBudget {
    /// Chunks between two progress updates.
    pub spacing_count: u32,
    /// Points added per update.
    pub percent_increment: u32,
}

impl Default for ProgressBudget {
    fn default() -> Self {
        Self {
            spacing_count: 1,
            percent_increment: 1,
        }
    }
}

/// Budget for one image of `size` bytes out of `total_bytes`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn budget_for(size: u64, total_bytes: u64, allowance: u32, chunk_size: usize) -> ProgressBudget {
    let total = total_bytes.max(1) as f64;
    let share = (size as f64 * f64::from(allowance) / total).max(1.0);
    let chunks = (size as f64 / chunk_size.max(1) as f64).max(1.0);

    if chunks > share {
        ProgressBudget {
            spacing_count: ((chunks / share) as u32).max(1),
            percent_increment: 1,
        }
    } else {
        ProgressBudget {
            spacing_count: 1,
            percent_increment: ((share / chunks) as u32).max(1),
        }
    }
}

/// Budgets for `images` sent in `chunk_size` pieces, in the same order.
pub fn compute_budget(
    images: &[FirmwareImage],
    total_bytes: u64,
    formatting: bool,
    chunk_size: usize,
) -> Vec<ProgressBudget> {
    let allowance = if formatting {
        PROGRESS_RANGE - ERASE_PROGRESS
    } else {
        PROGRESS_RANGE
    };
    images
        .iter()
        .map(|image| budget_for(image.size, total_bytes, allowance, chunk_size))
        .collect()
}

/// Cumulative percentage and the last message shown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    percent: u8,
    message: String,
}

impl ProgressState {
    /// Current percentage.
    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Last non-empty message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Add `increment` points, clamped to [`PROGRESS_CEILING`].
    ///
    /// An empty `message` keeps the previous one.
    pub fn advance(&mut self, message: &str, increment: u32) -> (&str, u8) {
        let next = u32::from(self.percent).saturating_add(increment);
        self.percent = u8::try_from(next.min(u32::from(PROGRESS_CEILING))).unwrap_or(PROGRESS_CEILING);
        if !message.is_empty() {
            message.clone_into(&mut self.message);
        }
        (&self.message, self.percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::mmwave::protocol::DEFAULT_CHUNK_SIZE;

    fn image(size: u64) -> FirmwareImage {
        FirmwareImage {
            size,
            ..FirmwareImage::new("image.bin", 1)
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn total_points(images: &[FirmwareImage], budgets: &[ProgressBudget]) -> f64 {
        images
            .iter()
            .zip(budgets)
            .map(|(image, b)| {
                let chunks = image.size as f64 / DEFAULT_CHUNK_SIZE as f64;
                chunks / f64::from(b.spacing_count) * f64::from(b.percent_increment)
            })
            .sum()
    }

    #[test]
    fn test_large_image_spaces_updates() {
        let budget = budget_for(512_000, 512_000, PROGRESS_RANGE, DEFAULT_CHUNK_SIZE);
        assert_eq!(budget.percent_increment, 1);
        assert_eq!(budget.spacing_count, 26);
    }

    #[test]
    fn test_small_image_increments_per_chunk() {
        let budget = budget_for(4000, 4000, PROGRESS_RANGE, DEFAULT_CHUNK_SIZE);
        assert_eq!(budget.spacing_count, 1);
        assert_eq!(budget.percent_increment, 4);
    }

    #[test]
    fn test_tiny_image_has_minimum_budget() {
        let budget = budget_for(10, 1_000_000, PROGRESS_RANGE, DEFAULT_CHUNK_SIZE);
        assert_eq!(budget, ProgressBudget::default());
    }

    #[test]
    fn test_budget_approximates_allowance() {
        let images = vec![image(300_000), image(100_000)];
        let total = images.iter().map(|i| i.size).sum();

        let budgets = compute_budget(&images, total, true, DEFAULT_CHUNK_SIZE);
        let points = total_points(&images, &budgets);
        assert!((points - 78.0).abs() < 7.8, "points = {points}");

        let budgets = compute_budget(&images, total, false, DEFAULT_CHUNK_SIZE);
        let points = total_points(&images, &budgets);
        assert!((points - 82.0).abs() < 8.2, "points = {points}");
    }

    #[test]
    fn test_budget_follows_chunk_size() {
        let images = vec![image(48_000)];
        // 200 chunks of 240 bytes over 82 points, 50 chunks of 960 bytes.
        let small = compute_budget(&images, 48_000, false, 240);
        let large = compute_budget(&images, 48_000, false, 960);
        assert_eq!(small[0].spacing_count, 2);
        assert_eq!(large[0].spacing_count, 1);
        assert_eq!(large[0].percent_increment, 1);
    }

    #[test]
    fn test_budget_entries_never_below_one() {
        let sizes = [1, 239, 240, 241, 4000, 65_536, 166_912, 1_048_575];
        let images: Vec<_> = sizes.iter().map(|s| image(*s)).collect();
        let total = sizes.iter().sum();
        for formatting in [false, true] {
            for b in compute_budget(&images, total, formatting, DEFAULT_CHUNK_SIZE) {
                assert!(b.spacing_count >= 1);
                assert!(b.percent_increment >= 1);
            }
        }
    }

    #[test]
    fn test_progress_state_clamps_and_keeps_message() {
        let mut state = ProgressState::default();
        assert_eq!(state.advance("Opening COM port", 1), ("Opening COM port", 1));
        assert_eq!(state.advance("", 50), ("Opening COM port", 51));
        assert_eq!(state.advance("Downloading", 60), ("Downloading", PROGRESS_CEILING));
        assert_eq!(state.percent(), 98);
        assert_eq!(state.message(), "Downloading");
    }
}
