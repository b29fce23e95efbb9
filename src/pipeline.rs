//! Certificate Generator - Single Entry Point
//!
//! Owns every collaborator and drives the generation state machine:
//!
//! ```text
//! Idle -> Validating -> Idle (invalid)
//!                    -> Generating -> ReadyToExport -> Exporting -> Idle
//! ```
//!
//! Submit and export requests that arrive while Generating or Exporting are
//! ignored. Composition and encoding each run under the retry policy; a
//! document is only produced once both have succeeded. Every failure ends
//! in Idle with a user-facing message.

use std::rc::Rc;

use chrono::{DateTime, NaiveDate, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compose::{ComposeError, Compositor, RasterImage};
use crate::config::{ConfigError, GeneratorConfig};
use crate::fit::{fit, FitPolicy, FitResult, FontSizeCache};
use crate::hashing::{compute_request_hash, raster_hash, sha256_hex};
use crate::input::{FieldRole, Sanitizer, TextField};
use crate::pdf::{derive_filename, CertificateDocument, EncodeError, EncoderSlot};
use crate::print::{PageDescriptor, PrintSpec};
use crate::retry::{Clock, OperationTimeout, RetryPolicy, Retryable, SystemClock};
use crate::scheduler::{TaskHandle, TaskQueue};
use crate::templates::{CertificateLayout, TemplateError, TemplateImage};
use crate::typeface::{MetricTypeface, Typeface};
use crate::validation::{ValidationError, Validator};
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Template failed to load: {0}")]
    TemplateLoadFailed(#[from] TemplateError),

    #[error("Encoding library failed to load: {0}")]
    EncodingLibraryLoadFailed(String),

    #[error(transparent)]
    OperationTimeout(#[from] OperationTimeout),

    #[error("Composition failed: {0}")]
    CompositionFailure(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Resource,
    Timeout,
    Composition,
    Encoding,
}

impl GeneratorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GeneratorError::Validation(_) => ErrorClass::Validation,
            GeneratorError::TemplateLoadFailed(_)
            | GeneratorError::EncodingLibraryLoadFailed(_)
            | GeneratorError::Config(_) => ErrorClass::Resource,
            GeneratorError::OperationTimeout(_) => ErrorClass::Timeout,
            GeneratorError::CompositionFailure(_) => ErrorClass::Composition,
            GeneratorError::Encoding(_) | GeneratorError::Serialization(_) => ErrorClass::Encoding,
        }
    }

    /// Message shown to the person filling in the form.
    pub fn user_message(&self) -> String {
        match self.class() {
            ErrorClass::Validation => self.to_string(),
            ErrorClass::Resource => "Failed to load required resources. Please try again.".to_string(),
            ErrorClass::Timeout => "Certificate generation timed out. Please try again.".to_string(),
            ErrorClass::Composition => "Failed to generate certificate. Please try again.".to_string(),
            ErrorClass::Encoding => "Failed to create PDF. Please try again.".to_string(),
        }
    }
}

impl From<ComposeError> for GeneratorError {
    fn from(err: ComposeError) -> Self {
        match err {
            ComposeError::Timeout(timeout) => GeneratorError::OperationTimeout(timeout),
            other => GeneratorError::CompositionFailure(other.to_string()),
        }
    }
}

impl From<EncodeError> for GeneratorError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::LoadFailed(reason) => GeneratorError::EncodingLibraryLoadFailed(reason),
            EncodeError::Timeout(timeout) => GeneratorError::OperationTimeout(timeout),
            other => GeneratorError::Encoding(other.to_string()),
        }
    }
}

impl Retryable for GeneratorError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            GeneratorError::OperationTimeout(_)
                | GeneratorError::CompositionFailure(_)
                | GeneratorError::Encoding(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Validating,
    Generating,
    ReadyToExport,
    Exporting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    RefreshPreview(FieldRole),
    TemplateTimeout,
    Compose(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Validation passed; composition is queued for the next tick.
    Accepted,
    Ignored,
}

#[derive(Debug)]
pub enum ExportOutcome {
    Exported(Box<ExportedCertificate>),
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReceipt {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub engine_version: String,
    pub filename: String,
    pub page: PageDescriptor,
    pub raster_size: [u32; 2],
    pub template_state: String,
    pub typeface: String,
    pub raster_hash: String,
    pub document_hash: String,
    pub request_hash: String,
}

#[derive(Debug)]
pub struct ExportedCertificate {
    pub document: CertificateDocument,
    pub raster: RasterImage,
    pub receipt: ExportReceipt,
}

/// Inputs that determine an export's pixels.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportRequest<'a> {
    name: &'a str,
    organization: &'a str,
    template_state: &'static str,
    template_size: Option<(u32, u32)>,
    typeface: &'a str,
    issued_on: NaiveDate,
}

struct Composed {
    raster: RasterImage,
    issued_on: NaiveDate,
}

pub struct CertificateGenerator {
    config: GeneratorConfig,
    policy: FitPolicy,
    retry: RetryPolicy,
    print: PrintSpec,
    sanitizer: Sanitizer,
    validator: Validator,
    typeface: Box<dyn Typeface>,
    layout: CertificateLayout,
    clock: Rc<dyn Clock>,
    encoder: EncoderSlot,
    tasks: TaskQueue<Task>,
    template_timeout: Option<TaskHandle>,
    template: TemplateImage,
    fields: [TextField; 2],
    previews: [Option<FitResult>; 2],
    font_cache: FontSizeCache,
    composed: Option<Composed>,
    phase: Phase,
    last_error: Option<String>,
}

impl CertificateGenerator {
    /// Built-in metric typeface, default layout, wall clock, lopdf encoder.
    pub fn new(config: GeneratorConfig) -> Result<Self, GeneratorError> {
        config.validate()?;
        let policy = config.fit_policy().map_err(ConfigError::from)?;
        let validator = Validator::new(&config.security.allowed_characters)
            .map_err(|e| ConfigError::AllowedCharacters(e.to_string()))?;

        Ok(Self {
            policy,
            retry: config.retry_policy(),
            print: config.print_spec()?,
            sanitizer: config.sanitizer(),
            validator,
            typeface: Box::new(MetricTypeface::sans()),
            layout: CertificateLayout::default(),
            clock: Rc::new(SystemClock::new()),
            encoder: EncoderSlot::lopdf(),
            tasks: TaskQueue::new(),
            template_timeout: None,
            template: TemplateImage::unrequested(),
            fields: [TextField::empty(FieldRole::Name), TextField::empty(FieldRole::Organization)],
            previews: [None, None],
            font_cache: FontSizeCache::default(),
            composed: None,
            phase: Phase::Idle,
            last_error: None,
            config,
        })
    }

    pub fn with_typeface(mut self, typeface: Box<dyn Typeface>) -> Self {
        self.typeface = typeface;
        self
    }

    pub fn with_layout(mut self, layout: CertificateLayout) -> Result<Self, GeneratorError> {
        layout.check_engine_version()?;
        self.layout = layout;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderSlot) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn template(&self) -> &TemplateImage {
        &self.template
    }

    pub fn field(&self, role: FieldRole) -> &TextField {
        &self.fields[role.index()]
    }

    pub fn preview(&self, role: FieldRole) -> Option<&FitResult> {
        self.previews[role.index()].as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn cached_sizes(&self) -> usize {
        self.font_cache.len()
    }

    pub fn is_encoder_loaded(&self) -> bool {
        self.encoder.is_loaded()
    }

    // ---- template lifecycle ----

    /// Starts the template load and arms its timeout. A template loads at
    /// most once per generator; returns false if a load was already started.
    pub fn begin_template_load(&mut self) -> bool {
        if !self.template.can_begin_load() {
            debug!(template = self.template.state_name(), "Template load already started");
            return false;
        }
        let now = self.clock.now();
        let timeout = self.config.template_timeout();
        self.template = TemplateImage::loading(now, timeout);
        self.template_timeout = Some(self.tasks.schedule(now, timeout, Task::TemplateTimeout));
        debug!(?timeout, "Waiting for certificate template");
        true
    }

    /// Delivers the external load result.
    pub fn template_loaded(&mut self, result: Result<DynamicImage, TemplateError>) {
        self.template.resolve(result, self.clock.now());
        if !self.template.is_loading() {
            if let Some(handle) = self.template_timeout.take() {
                self.tasks.cancel(handle);
            }
        }
    }

    // ---- input & preview ----

    /// Records an edit and debounces the preview refresh for that field.
    pub fn on_input(&mut self, role: FieldRole, raw: &str) {
        self.fields[role.index()] = TextField::new(role, raw, &self.sanitizer);
        self.last_error = None;
        if self.phase == Phase::ReadyToExport {
            self.composed = None;
            self.phase = Phase::Idle;
        }
        let now = self.clock.now();
        self.tasks.debounce(preview_slot(role), now, self.config.debounce(), Task::RefreshPreview(role));
    }

    /// Runs every task that is due. Returns how many ran.
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now();
        let due = self.tasks.take_due(now);
        let count = due.len();
        for task in due {
            match task {
                Task::RefreshPreview(role) => self.refresh_preview(role),
                Task::TemplateTimeout => {
                    self.template_timeout = None;
                    self.template.expire(now);
                }
                Task::Compose(issued_on) => self.run_generation(issued_on),
            }
        }
        count
    }

    pub fn refresh_preview(&mut self, role: FieldRole) {
        let idx = role.index();
        let text = self.fields[idx].sanitized_value.clone();
        if text.is_empty() {
            self.previews[idx] = None;
            return;
        }

        let container = self.config.preview_width;
        let budget = self.policy.width_budget(container);
        let policy = self.policy;
        let strategy = self.config.preview_fit_strategy();
        let typeface = self.typeface.as_ref();
        let font_size_px = self.font_cache.get_or_insert_with(&text, container, || {
            fit(&text, budget, &policy, strategy, typeface).font_size_px
        });

        debug!(role = ?role, font_size_px, "Preview refreshed");
        self.previews[idx] = Some(FitResult { text, font_size_px });
    }

    /// Validates one field on demand and records its message.
    pub fn validate_field(&mut self, role: FieldRole) -> Result<(), ValidationError> {
        let result = self.validator.validate(role, &self.fields[role.index()].sanitized_value);
        self.last_error = result.as_ref().err().map(|e| e.to_string());
        result
    }

    pub fn clear_caches(&mut self) {
        self.font_cache.clear();
        for role in FieldRole::ALL {
            self.tasks.cancel_slot(preview_slot(role));
        }
        debug!("Cleared font-size cache and pending previews");
    }

    // ---- generation & export ----

    /// Validates the form and queues composition.
    pub fn submit(&mut self, issued_on: NaiveDate) -> Result<SubmitOutcome, GeneratorError> {
        if self.is_busy() {
            debug!(phase = ?self.phase, "Ignoring submit while busy");
            return Ok(SubmitOutcome::Ignored);
        }

        self.validate_form()?;
        self.phase = Phase::Generating;
        let now = self.clock.now();
        self.tasks.schedule(now, std::time::Duration::ZERO, Task::Compose(issued_on));
        Ok(SubmitOutcome::Accepted)
    }

    /// From ReadyToExport encodes the composed raster; from Idle validates
    /// and composes first. The encoder is loaded before any composition.
    pub fn export(&mut self, issued_on: NaiveDate) -> Result<ExportOutcome, GeneratorError> {
        if self.is_busy() {
            debug!(phase = ?self.phase, "Ignoring export while busy");
            return Ok(ExportOutcome::Ignored);
        }

        let ready = self.phase == Phase::ReadyToExport && self.composed.is_some();
        if !ready {
            self.validate_form()?;
        }
        if let Err(e) = self.encoder.get().map(|_| ()) {
            return Err(self.fail(e.into()));
        }

        let composed = match self.composed.take().filter(|_| ready) {
            Some(composed) => composed,
            None => {
                self.phase = Phase::Generating;
                let raster = self.compose_with_retry(issued_on).map_err(|e| self.fail(e))?;
                Composed { raster, issued_on }
            }
        };

        self.phase = Phase::Exporting;
        let result = self.encode(composed);
        self.phase = Phase::Idle;
        match result {
            Ok(exported) => {
                info!(
                    filename = %exported.receipt.filename,
                    bytes = exported.document.bytes.len(),
                    "Certificate exported"
                );
                Ok(ExportOutcome::Exported(Box::new(exported)))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::Generating | Phase::Exporting)
    }

    fn validate_form(&mut self) -> Result<(), GeneratorError> {
        self.phase = Phase::Validating;
        if let Err(e) = self.validator.validate_form(&self.fields) {
            self.phase = Phase::Idle;
            self.last_error = Some(e.to_string());
            return Err(e.into());
        }
        self.last_error = None;
        Ok(())
    }

    fn run_generation(&mut self, issued_on: NaiveDate) {
        if self.phase != Phase::Generating {
            return;
        }
        match self.compose_with_retry(issued_on) {
            Ok(raster) => {
                self.composed = Some(Composed { raster, issued_on });
                self.phase = Phase::ReadyToExport;
                info!("Certificate ready to export");
            }
            Err(e) => {
                self.fail(e);
            }
        }
    }

    fn fail(&mut self, err: GeneratorError) -> GeneratorError {
        warn!(error = %err, class = ?err.class(), "Certificate generation failed");
        self.phase = Phase::Idle;
        self.composed = None;
        self.last_error = Some(err.user_message());
        err
    }

    fn compose_with_retry(&self, issued_on: NaiveDate) -> Result<RasterImage, GeneratorError> {
        let compositor = Compositor::new(
            self.typeface.as_ref(),
            &self.layout,
            self.policy,
            self.config.preview_width,
            self.config.heuristic_profile.profile(),
        );
        self.retry.run(self.clock.as_ref(), "compose", |_, deadline| {
            let raster = compositor.compose(&self.template, &self.fields, issued_on, Some(deadline))?;
            Ok::<_, GeneratorError>(raster)
        })
    }

    fn encode(&self, composed: Composed) -> Result<ExportedCertificate, GeneratorError> {
        let encoder = self.encoder.get()?;
        let raster = composed.raster;
        let page = self.print.page_for(&raster);
        let placement = page.image_placement(self.print.edge_overflow_mm);

        let bytes = self.retry.run(self.clock.as_ref(), "encode", |_, deadline| {
            let bytes = encoder.encode(&raster, &page, &placement)?;
            deadline.check()?;
            Ok::<_, GeneratorError>(bytes)
        })?;

        let name = &self.fields[FieldRole::Name.index()].sanitized_value;
        let filename = derive_filename(name, composed.issued_on);
        let request = ExportRequest {
            name,
            organization: &self.fields[FieldRole::Organization.index()].sanitized_value,
            template_state: self.template.state_name(),
            template_size: self.template.dimensions(),
            typeface: self.typeface.family(),
            issued_on: composed.issued_on,
        };

        let receipt = ExportReceipt {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
            filename: filename.clone(),
            page,
            raster_size: [raster.width(), raster.height()],
            template_state: self.template.state_name().to_string(),
            typeface: self.typeface.family().to_string(),
            raster_hash: raster_hash(&raster),
            document_hash: sha256_hex(&bytes),
            request_hash: compute_request_hash(&request, ENGINE_VERSION)?,
        };

        Ok(ExportedCertificate {
            document: CertificateDocument { filename, bytes },
            raster,
            receipt,
        })
    }
}

fn preview_slot(role: FieldRole) -> &'static str {
    match role {
        FieldRole::Name => "preview.name",
        FieldRole::Organization => "preview.organization",
    }
}
