//! Font-Fit Engine
//!
//! Picks the largest single-line font size that keeps a string inside a
//! width budget. Two strategies share one policy:
//!
//! - **Exact**: binary search over integer sizes in `[min_size, max_size]`,
//!   measuring each candidate with a [`TextMeasure`]. A size fits iff
//!   `measured <= max_width * (1 - safety_margin)`; the largest fitting size
//!   wins, `min_size` if none fit.
//! - **Heuristic**: no measurement. Width is estimated as
//!   `chars * size * 0.6`; long strings decay linearly from `max_size` past a
//!   length threshold, and an over-budget estimate is solved for directly.
//!
//! Every result is clamped to `[min_size, max_size]`.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Average glyph advance in em units used by the heuristic strategy.
pub const AVERAGE_GLYPH_WIDTH_EM: f32 = 0.6;
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitPolicyError {
    #[error("Font size range is invalid: min {min} > max {max}")]
    InvalidRange { min: f32, max: f32 },

    #[error("Minimum font size must be positive, got {0}")]
    NonPositiveMin(f32),

    #[error("Width fraction must be in (0, 1], got {0}")]
    WidthFraction(f32),

    #[error("Safety margin must be in [0, 1), got {0}")]
    SafetyMargin(f32),
}

/// Immutable sizing bounds, fixed at startup. Deserialization goes through
/// [`FitPolicy::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawFitPolicy")]
pub struct FitPolicy {
    pub min_size: f32,
    pub max_size: f32,
    pub width_fraction: f32,
    pub safety_margin: f32,
}

impl FitPolicy {
    pub fn new(
        min_size: f32,
        max_size: f32,
        width_fraction: f32,
        safety_margin: f32,
    ) -> Result<Self, FitPolicyError> {
        if !(min_size > 0.0) {
            return Err(FitPolicyError::NonPositiveMin(min_size));
        }
        if !max_size.is_finite() || min_size > max_size {
            return Err(FitPolicyError::InvalidRange { min: min_size, max: max_size });
        }
        if !(width_fraction > 0.0 && width_fraction <= 1.0) {
            return Err(FitPolicyError::WidthFraction(width_fraction));
        }
        if !(0.0..1.0).contains(&safety_margin) {
            return Err(FitPolicyError::SafetyMargin(safety_margin));
        }
        Ok(Self { min_size, max_size, width_fraction, safety_margin })
    }

    /// The share of a container's width that text may occupy.
    pub fn width_budget(&self, container_width: f32) -> f32 {
        container_width * self.width_fraction
    }

    /// Width a measured line must not exceed.
    pub fn usable_width(&self, max_width: f32) -> f32 {
        max_width * (1.0 - self.safety_margin)
    }

    pub fn clamp(&self, size: f32) -> f32 {
        size.clamp(self.min_size, self.max_size)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFitPolicy {
    min_size: f32,
    max_size: f32,
    width_fraction: f32,
    safety_margin: f32,
}

impl TryFrom<RawFitPolicy> for FitPolicy {
    type Error = FitPolicyError;

    fn try_from(raw: RawFitPolicy) -> Result<Self, Self::Error> {
        FitPolicy::new(raw.min_size, raw.max_size, raw.width_fraction, raw.safety_margin)
    }
}

impl Default for FitPolicy {
    fn default() -> Self {
        Self {
            min_size: 8.0,
            max_size: 16.0,
            width_fraction: 0.75,
            safety_margin: 0.05,
        }
    }
}

/// Rendered single-line width of `text` at `size_px`, in pixels.
pub trait TextMeasure {
    fn measure(&self, text: &str, size_px: f32) -> f32;
}

/// Length-based decay parameters for the heuristic strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeuristicProfile {
    pub length_threshold: usize,
    pub decay_per_char: f32,
}

impl HeuristicProfile {
    pub const COMPACT: Self = Self { length_threshold: 20, decay_per_char: 0.15 };
    pub const GENEROUS: Self = Self { length_threshold: 40, decay_per_char: 0.15 };
}

impl Default for HeuristicProfile {
    fn default() -> Self {
        Self::COMPACT
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitStrategy {
    Exact,
    Heuristic(HeuristicProfile),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitResult {
    pub text: String,
    pub font_size_px: f32,
}

/// Largest integer size whose measured width fits, or `min_size`.
pub fn fit_exact<M>(text: &str, max_width: f32, policy: &FitPolicy, measure: &M) -> f32
where
    M: TextMeasure + ?Sized,
{
    if text.is_empty() {
        return policy.max_size;
    }

    let usable = policy.usable_width(max_width);
    let mut low = policy.min_size.ceil() as i64;
    let mut high = policy.max_size.floor() as i64;
    let mut best: Option<i64> = None;

    while low <= high {
        let mid = low + (high - low) / 2;
        if measure.measure(text, mid as f32) <= usable {
            best = Some(mid);
            low = mid + 1;
        } else {
            high = mid - 1;
        }
    }

    match best {
        Some(size) => policy.clamp(size as f32),
        None => policy.min_size,
    }
}

/// Approximate size from string length alone.
pub fn fit_heuristic(text: &str, max_width: f32, policy: &FitPolicy, profile: &HeuristicProfile) -> f32 {
    let len = text.chars().count();
    if len == 0 {
        return policy.max_size;
    }

    let mut size = policy.max_size;
    if len > profile.length_threshold {
        size -= (len - profile.length_threshold) as f32 * profile.decay_per_char;
    }

    let usable = policy.usable_width(max_width);
    let estimated = len as f32 * size * AVERAGE_GLYPH_WIDTH_EM;
    if estimated > usable {
        size = usable / (len as f32 * AVERAGE_GLYPH_WIDTH_EM);
    }

    policy.clamp(size)
}

pub fn fit<M>(
    text: &str,
    max_width: f32,
    policy: &FitPolicy,
    strategy: FitStrategy,
    measure: &M,
) -> FitResult
where
    M: TextMeasure + ?Sized,
{
    let font_size_px = match strategy {
        FitStrategy::Exact => fit_exact(text, max_width, policy, measure),
        FitStrategy::Heuristic(profile) => fit_heuristic(text, max_width, policy, &profile),
    };
    FitResult { text: text.to_string(), font_size_px }
}

/// Memoizes sizes per (text, container width). Evicts in insertion order.
#[derive(Debug)]
pub struct FontSizeCache {
    capacity: usize,
    entries: HashMap<(String, u32), f32>,
    order: VecDeque<(String, u32)>,
}

impl FontSizeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn key(text: &str, container_width: f32) -> (String, u32) {
        (text.to_string(), container_width.round().max(0.0) as u32)
    }

    pub fn get(&self, text: &str, container_width: f32) -> Option<f32> {
        self.entries.get(&Self::key(text, container_width)).copied()
    }

    pub fn insert(&mut self, text: &str, container_width: f32, size: f32) {
        let key = Self::key(text, container_width);
        if self.entries.insert(key.clone(), size).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn get_or_insert_with<F>(&mut self, text: &str, container_width: f32, compute: F) -> f32
    where
        F: FnOnce() -> f32,
    {
        if let Some(size) = self.get(text, container_width) {
            return size;
        }
        let size = compute();
        self.insert(text, container_width, size);
        size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl Default for FontSizeCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Every char is `em` wide; counts calls.
    struct FixedWidth {
        em: f32,
        calls: Cell<usize>,
    }

    impl TextMeasure for FixedWidth {
        fn measure(&self, text: &str, size_px: f32) -> f32 {
            self.calls.set(self.calls.get() + 1);
            text.chars().count() as f32 * size_px * self.em
        }
    }

    fn fixed(em: f32) -> FixedWidth {
        FixedWidth { em, calls: Cell::new(0) }
    }

    #[test]
    fn test_policy_rejects_bad_values() {
        assert!(FitPolicy::new(16.0, 8.0, 0.75, 0.05).is_err());
        assert!(FitPolicy::new(0.0, 8.0, 0.75, 0.05).is_err());
        assert!(FitPolicy::new(8.0, 16.0, 0.0, 0.05).is_err());
        assert!(FitPolicy::new(8.0, 16.0, 1.0, 1.0).is_err());
        assert!(FitPolicy::new(8.0, 16.0, 1.0, 0.0).is_ok());
        assert!(FitPolicy::new(8.0, f32::NAN, 0.75, 0.05).is_err());
        assert!(FitPolicy::new(8.0, f32::INFINITY, 0.75, 0.05).is_err());
    }

    #[test]
    fn test_deserialized_policy_is_validated() {
        let policy: FitPolicy = serde_json::from_str(
            r#"{"minSize": 10, "maxSize": 20, "widthFraction": 0.8, "safetyMargin": 0.1}"#,
        )
        .unwrap();
        assert_eq!(policy.clamp(30.0), 20.0);

        let inverted = serde_json::from_str::<FitPolicy>(
            r#"{"minSize": 20, "maxSize": 10, "widthFraction": 0.8, "safetyMargin": 0.1}"#,
        );
        assert!(inverted.unwrap_err().to_string().contains("min 20 > max 10"));

        let round_trip: FitPolicy = serde_json::from_value(serde_json::to_value(FitPolicy::default()).unwrap()).unwrap();
        assert_eq!(round_trip, FitPolicy::default());
    }

    #[test]
    fn test_exact_picks_largest_fitting() {
        let policy = FitPolicy::default();
        let measure = fixed(0.5);
        // 10 chars * size * 0.5 <= 100 * 0.95 -> size <= 19 -> capped at 16
        assert_eq!(fit_exact("abcdefghij", 100.0, &policy, &measure), 16.0);
        // 10 chars * size * 0.5 <= 60 * 0.95 = 57 -> size <= 11.4 -> 11
        assert_eq!(fit_exact("abcdefghij", 60.0, &policy, &measure), 11.0);
    }

    #[test]
    fn test_exact_falls_back_to_min() {
        let policy = FitPolicy::default();
        assert_eq!(fit_exact(&"w".repeat(500), 50.0, &policy, &fixed(0.6)), 8.0);
    }

    #[test]
    fn test_exact_measurement_count_is_logarithmic() {
        let policy = FitPolicy::new(8.0, 72.0, 0.75, 0.05).unwrap();
        let measure = fixed(0.5);
        fit_exact("Rotaract Club of Testville", 400.0, &policy, &measure);
        // 65 candidates -> at most ceil(log2(65)) + 1 probes
        assert!(measure.calls.get() <= 8, "probes: {}", measure.calls.get());
    }

    #[test]
    fn test_heuristic_short_text_gets_max() {
        let policy = FitPolicy::default();
        assert_eq!(fit_heuristic("Alex Smith", 600.0, &policy, &HeuristicProfile::COMPACT), 16.0);
    }

    #[test]
    fn test_heuristic_decays_past_threshold() {
        let policy = FitPolicy::default();
        let size = fit_heuristic(&"a".repeat(30), 10_000.0, &policy, &HeuristicProfile::COMPACT);
        assert!((size - (16.0 - 10.0 * 0.15)).abs() < 1e-4);

        let generous = fit_heuristic(&"a".repeat(30), 10_000.0, &policy, &HeuristicProfile::GENEROUS);
        assert_eq!(generous, 16.0);
    }

    #[test]
    fn test_heuristic_solves_for_width() {
        let policy = FitPolicy::default();
        // 10 chars at 16px estimates 96px; budget 50 * 0.95 = 47.5 -> 47.5 / 6 = 7.9 -> clamped to 8
        assert_eq!(fit_heuristic("abcdefghij", 50.0, &policy, &HeuristicProfile::COMPACT), 8.0);
        // budget 80 * 0.95 = 76 -> 76 / 6 = 12.67
        let size = fit_heuristic("abcdefghij", 80.0, &policy, &HeuristicProfile::COMPACT);
        assert!((size - 76.0 / 6.0).abs() < 1e-4);
    }

    #[test]
    fn test_fit_dispatches_strategy() {
        let policy = FitPolicy::default();
        let measure = fixed(0.5);
        let exact = fit("abcdefghij", 60.0, &policy, FitStrategy::Exact, &measure);
        assert_eq!(exact.font_size_px, 11.0);
        assert_eq!(exact.text, "abcdefghij");

        let calls = measure.calls.get();
        fit("abcdefghij", 60.0, &policy, FitStrategy::Heuristic(HeuristicProfile::COMPACT), &measure);
        assert_eq!(measure.calls.get(), calls, "heuristic must not measure");
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut cache = FontSizeCache::new(2);
        cache.insert("a", 800.0, 10.0);
        cache.insert("b", 800.0, 11.0);
        cache.insert("a", 800.0, 12.0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a", 800.0), Some(12.0));

        cache.insert("c", 800.0, 13.0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a", 800.0), None);
        assert_eq!(cache.get("b", 800.0), Some(11.0));
        assert_eq!(cache.get("c", 800.0), Some(13.0));
    }

    #[test]
    fn test_cache_keys_on_container_width() {
        let mut cache = FontSizeCache::default();
        let mut computed = 0;
        let mut compute = |v: f32| {
            computed += 1;
            v
        };
        cache.get_or_insert_with("Alex", 800.0, || compute(14.0));
        cache.get_or_insert_with("Alex", 800.2, || compute(99.0));
        cache.get_or_insert_with("Alex", 640.0, || compute(12.0));
        assert_eq!(computed, 2);
        assert_eq!(cache.get("Alex", 800.0), Some(14.0));
        assert_eq!(cache.get("Alex", 640.0), Some(12.0));
    }
}
