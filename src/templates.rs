//! Template System - Layout Contracts and the Template Image Lifecycle
//!
//! A `CertificateLayout` fixes where text lands on the certificate. A
//! `TemplateImage` tracks the background artwork: Loading -> Ready | Failed.
//! Failed is terminal for the session.

use std::fs;
use std::path::Path;
use std::time::Duration;

use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::ENGINE_VERSION;

pub const DEFAULT_TEMPLATE_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed to read template: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode template image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Invalid layout: {0}")]
    Layout(#[from] serde_json::Error),

    #[error("Layout {0} requires engine >= {1}, current is {2}")]
    EngineVersionMismatch(String, String, String),

    #[error("Invalid version: {0}")]
    Version(#[from] semver::Error),

    #[error("No template supplied")]
    Missing,
}

/// Placement constants for the certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateLayout {
    pub id: String,
    pub name: String,
    pub engine_min_version: String,
    #[serde(default = "default_name_y")]
    pub name_y_fraction: f32,
    #[serde(default = "default_organization_y")]
    pub organization_y_fraction: f32,
    #[serde(default = "default_text_color")]
    pub text_color: [u8; 3],
    #[serde(default)]
    pub fallback: FallbackLayout,
}

fn default_name_y() -> f32 { 0.484 }
fn default_organization_y() -> f32 { 0.555 }
fn default_text_color() -> [u8; 3] { [0, 0, 0] }

impl Default for CertificateLayout {
    fn default() -> Self {
        Self {
            id: "rise-certificate".to_string(),
            name: "RISE Certificate".to_string(),
            engine_min_version: crate::MIN_LAYOUT_ENGINE_VERSION.to_string(),
            name_y_fraction: default_name_y(),
            organization_y_fraction: default_organization_y(),
            text_color: default_text_color(),
            fallback: FallbackLayout::default(),
        }
    }
}

impl CertificateLayout {
    pub fn load_from_path(path: &Path) -> Result<Self, TemplateError> {
        let content = fs::read_to_string(path)?;
        let layout: CertificateLayout = serde_json::from_str(&content)?;
        layout.check_engine_version()?;
        Ok(layout)
    }

    pub fn check_engine_version(&self) -> Result<(), TemplateError> {
        let engine_ver = semver::Version::parse(ENGINE_VERSION)?;
        let min_ver = semver::Version::parse(&self.engine_min_version)?;

        if engine_ver < min_ver {
            return Err(TemplateError::EngineVersionMismatch(
                self.id.clone(),
                self.engine_min_version.clone(),
                ENGINE_VERSION.to_string(),
            ));
        }
        Ok(())
    }
}

/// Generated certificate used when the template artwork is unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FallbackLayout {
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
    pub outer_border: [u8; 3],
    pub inner_border: [u8; 3],
    pub title: String,
    pub subtitle: String,
    pub completion_line: String,
    pub name_y_fraction: f32,
    pub organization_y_fraction: f32,
    /// Line-wrap budget as a fraction of the width.
    pub wrap_fraction: f32,
    pub show_issue_date: bool,
}

impl Default for FallbackLayout {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            background: [248, 249, 250],
            outer_border: [222, 226, 230],
            inner_border: [108, 117, 125],
            title: "Certificate of Completion".to_string(),
            subtitle: "This is to certify that".to_string(),
            completion_line: "has successfully completed the course".to_string(),
            name_y_fraction: 0.49,
            organization_y_fraction: 0.53,
            wrap_fraction: 0.6,
            show_issue_date: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum TemplateFailure {
    LoadError(String),
    ZeroDimensions,
    TimedOut,
}

#[derive(Debug, Clone)]
pub enum TemplateState {
    /// No load has been started; composes like Failed.
    Unrequested,
    Loading { deadline: Duration },
    Ready(RgbaImage),
    Failed(TemplateFailure),
}

/// The background artwork and where it is in its lifecycle.
#[derive(Debug, Clone)]
pub struct TemplateImage {
    state: TemplateState,
}

impl TemplateImage {
    pub fn unrequested() -> Self {
        Self { state: TemplateState::Unrequested }
    }

    /// Starts loading at `now`; Ready must be reached before `now + timeout`.
    pub fn loading(now: Duration, timeout: Duration) -> Self {
        Self {
            state: TemplateState::Loading { deadline: now + timeout },
        }
    }

    pub fn failed(failure: TemplateFailure) -> Self {
        Self { state: TemplateState::Failed(failure) }
    }

    pub fn ready(image: RgbaImage) -> Self {
        if image.width() == 0 || image.height() == 0 {
            return Self::failed(TemplateFailure::ZeroDimensions);
        }
        Self { state: TemplateState::Ready(image) }
    }

    pub fn state(&self) -> &TemplateState {
        &self.state
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            TemplateState::Unrequested => "unrequested",
            TemplateState::Loading { .. } => "loading",
            TemplateState::Ready(_) => "ready",
            TemplateState::Failed(_) => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, TemplateState::Ready(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, TemplateState::Loading { .. })
    }

    /// Only an unrequested template may start loading. Ready and Failed are
    /// final for the session.
    pub fn can_begin_load(&self) -> bool {
        matches!(self.state, TemplateState::Unrequested)
    }

    pub fn pixels(&self) -> Option<&RgbaImage> {
        match &self.state {
            TemplateState::Ready(image) => Some(image),
            _ => None,
        }
    }

    /// Natural pixel dimensions once Ready.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.pixels().map(|p| p.dimensions())
    }

    /// Delivers the outcome of the external load. Ignored unless Loading.
    /// A result arriving after the deadline counts as a timeout.
    pub fn resolve(&mut self, result: Result<DynamicImage, TemplateError>, now: Duration) {
        let deadline = match self.state {
            TemplateState::Loading { deadline } => deadline,
            _ => return,
        };

        if now >= deadline {
            warn!("Certificate template arrived after timeout, using fallback design");
            self.state = TemplateState::Failed(TemplateFailure::TimedOut);
            return;
        }

        match result {
            Ok(image) => {
                let image = image.to_rgba8();
                if image.width() == 0 || image.height() == 0 {
                    warn!("Certificate template decoded with zero dimensions");
                    self.state = TemplateState::Failed(TemplateFailure::ZeroDimensions);
                } else {
                    info!(width = image.width(), height = image.height(), "Certificate template loaded");
                    self.state = TemplateState::Ready(image);
                }
            }
            Err(e) => {
                warn!(error = %e, "Certificate template failed to load, using fallback");
                self.state = TemplateState::Failed(TemplateFailure::LoadError(e.to_string()));
            }
        }
    }

    /// Fails the load if the deadline has passed. Returns true on transition.
    pub fn expire(&mut self, now: Duration) -> bool {
        match self.state {
            TemplateState::Loading { deadline } if now >= deadline => {
                warn!("Certificate template not loaded after timeout, using fallback design");
                self.state = TemplateState::Failed(TemplateFailure::TimedOut);
                true
            }
            _ => false,
        }
    }
}

/// Decodes template artwork from disk.
pub fn decode_template(path: &Path) -> Result<DynamicImage, TemplateError> {
    if !path.exists() {
        return Err(TemplateError::Missing);
    }
    let bytes = fs::read(path)?;
    Ok(image::load_from_memory(&bytes)?)
}
