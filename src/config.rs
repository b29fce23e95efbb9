//! Configuration System - Typed Generator Settings
//!
//! JSON in camelCase. Missing keys take the defaults below, unknown keys are
//! ignored. Overrides merge field by field and the result is validated
//! before anything is built from it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fit::{FitPolicy, FitPolicyError, FitStrategy, HeuristicProfile};
use crate::input::{Sanitizer, DEFAULT_MAX_INPUT_LENGTH};
use crate::print::{PrintSpec, DEFAULT_EDGE_OVERFLOW_MM};
use crate::retry::{RetryPolicy, DEFAULT_BACKOFF_STEP};
use crate::templates::DEFAULT_TEMPLATE_TIMEOUT;
use crate::validation::{Validator, DEFAULT_ALLOWED_CHARACTERS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid font-fit settings: {0}")]
    Fit(#[from] FitPolicyError),

    #[error("maxRetries must be at least 1")]
    ZeroRetries,

    #[error("previewWidth must be positive, got {0}")]
    PreviewWidth(f32),

    #[error("edgeOverflowMm must be between 0 and 5, got {0}")]
    EdgeOverflow(f64),

    #[error("security.maxInputLength must be at least 1")]
    ZeroInputLength,

    #[error("security.allowedCharacters is not a valid pattern: {0}")]
    AllowedCharacters(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Exact,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Compact,
    Generous,
}

impl ProfileKind {
    pub fn profile(&self) -> HeuristicProfile {
        match self {
            ProfileKind::Compact => HeuristicProfile::COMPACT,
            ProfileKind::Generous => HeuristicProfile::GENEROUS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    pub max_input_length: usize,
    pub allowed_characters: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_input_length: DEFAULT_MAX_INPUT_LENGTH,
            allowed_characters: DEFAULT_ALLOWED_CHARACTERS.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeneratorConfig {
    pub is_dev: bool,
    pub max_font_size: f32,
    pub min_font_size: f32,
    /// Milliseconds.
    pub debounce_delay: u64,
    pub max_retries: u32,
    /// Per-attempt timeout, milliseconds.
    pub timeout: u64,
    /// Milliseconds.
    pub template_timeout: u64,
    pub preview_width: f32,
    pub width_fraction: f32,
    pub safety_margin: f32,
    /// Bleed added around the page image, millimetres.
    pub edge_overflow_mm: f64,
    pub preview_strategy: StrategyKind,
    pub heuristic_profile: ProfileKind,
    pub security: SecurityConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            is_dev: false,
            max_font_size: 16.0,
            min_font_size: 8.0,
            debounce_delay: 200,
            max_retries: 3,
            timeout: 10_000,
            template_timeout: DEFAULT_TEMPLATE_TIMEOUT.as_millis() as u64,
            preview_width: 800.0,
            width_fraction: 0.75,
            safety_margin: 0.05,
            edge_overflow_mm: DEFAULT_EDGE_OVERFLOW_MM,
            preview_strategy: StrategyKind::Exact,
            heuristic_profile: ProfileKind::Compact,
            security: SecurityConfig::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fit_policy()?;
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if !(self.preview_width > 0.0) {
            return Err(ConfigError::PreviewWidth(self.preview_width));
        }
        self.print_spec()?;
        if self.security.max_input_length == 0 {
            return Err(ConfigError::ZeroInputLength);
        }
        if self.security.allowed_characters.trim().is_empty() {
            return Err(ConfigError::AllowedCharacters("pattern is empty".to_string()));
        }
        Validator::new(&self.security.allowed_characters)
            .map_err(|e| ConfigError::AllowedCharacters(e.to_string()))?;
        Ok(())
    }

    /// Applies `overrides` and re-validates; `self` is untouched on error.
    pub fn merged(&self, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut merged = self.clone();
        overrides.apply_to(&mut merged);
        merged.validate()?;
        Ok(merged)
    }

    pub fn fit_policy(&self) -> Result<FitPolicy, FitPolicyError> {
        FitPolicy::new(self.min_font_size, self.max_font_size, self.width_fraction, self.safety_margin)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            attempt_timeout: Duration::from_millis(self.timeout),
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }

    pub fn print_spec(&self) -> Result<PrintSpec, ConfigError> {
        PrintSpec::with_edge_overflow(self.edge_overflow_mm)
            .map_err(|_| ConfigError::EdgeOverflow(self.edge_overflow_mm))
    }

    pub fn preview_fit_strategy(&self) -> FitStrategy {
        match self.preview_strategy {
            StrategyKind::Exact => FitStrategy::Exact,
            StrategyKind::Heuristic => FitStrategy::Heuristic(self.heuristic_profile.profile()),
        }
    }

    pub fn sanitizer(&self) -> Sanitizer {
        Sanitizer::new(self.security.max_input_length)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_delay)
    }

    pub fn template_timeout(&self) -> Duration {
        Duration::from_millis(self.template_timeout)
    }
}

/// Partial configuration. `None` keeps the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigOverrides {
    pub is_dev: Option<bool>,
    pub max_font_size: Option<f32>,
    pub min_font_size: Option<f32>,
    pub debounce_delay: Option<u64>,
    pub max_retries: Option<u32>,
    pub timeout: Option<u64>,
    pub template_timeout: Option<u64>,
    pub preview_width: Option<f32>,
    pub width_fraction: Option<f32>,
    pub safety_margin: Option<f32>,
    pub edge_overflow_mm: Option<f64>,
    pub preview_strategy: Option<StrategyKind>,
    pub heuristic_profile: Option<ProfileKind>,
    pub max_input_length: Option<usize>,
    pub allowed_characters: Option<String>,
}

impl ConfigOverrides {
    pub fn apply_to(&self, config: &mut GeneratorConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut config.is_dev, &self.is_dev);
        set(&mut config.max_font_size, &self.max_font_size);
        set(&mut config.min_font_size, &self.min_font_size);
        set(&mut config.debounce_delay, &self.debounce_delay);
        set(&mut config.max_retries, &self.max_retries);
        set(&mut config.timeout, &self.timeout);
        set(&mut config.template_timeout, &self.template_timeout);
        set(&mut config.preview_width, &self.preview_width);
        set(&mut config.width_fraction, &self.width_fraction);
        set(&mut config.safety_margin, &self.safety_margin);
        set(&mut config.edge_overflow_mm, &self.edge_overflow_mm);
        set(&mut config.preview_strategy, &self.preview_strategy);
        set(&mut config.heuristic_profile, &self.heuristic_profile);
        set(&mut config.security.max_input_length, &self.max_input_length);
        set(&mut config.security.allowed_characters, &self.allowed_characters);
    }
}
