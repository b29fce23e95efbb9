//! CertForge Core - Certificate Text-Fit and Compose Pipeline
//!
//! Turns a name and an organization into a single-page certificate PDF:
//! sanitize and validate the fields, fit each string on one line, composite
//! onto the template artwork (or a generated fallback design), size the page
//! from the raster at 96 DPI and encode it.
//!
//! [`CertificateGenerator`] is the entry point; every other module is a
//! collaborator it owns.

pub mod input;
pub mod validation;
pub mod fit;
pub mod typeface;
pub mod templates;
pub mod compose;
pub mod print;
pub mod pdf;
pub mod retry;
pub mod scheduler;
pub mod config;
pub mod hashing;
pub mod pipeline;

pub use input::{sanitize, FieldRole, Sanitizer, TextField};
pub use validation::{ValidationError, ValidationRule, Validator};
pub use fit::{fit, fit_exact, fit_heuristic, FitPolicy, FitResult, FitStrategy, HeuristicProfile, TextMeasure};
pub use typeface::{GlyphTypeface, MetricTypeface, Typeface};
pub use templates::{CertificateLayout, TemplateImage, TemplateState};
pub use compose::{Compositor, CompositionSpec, RasterImage};
pub use print::{to_page, Orientation, PageDescriptor, SCREEN_DPI};
pub use pdf::{derive_filename, CertificateDocument, DocumentEncoder, EncoderSlot, LopdfEncoder};
pub use retry::{Clock, ManualClock, RetryPolicy, SystemClock};
pub use config::{ConfigOverrides, GeneratorConfig};
pub use hashing::{canonical_json, sha256_hex};
pub use pipeline::{
    CertificateGenerator, ErrorClass, ExportOutcome, ExportReceipt, ExportedCertificate,
    GeneratorError, Phase, SubmitOutcome,
};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_LAYOUT_ENGINE_VERSION: &str = "1.0.0";
