//! CertForge CLI - Bridge interface
//!
//! Commands: fit, validate, render
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on validation or generation failure

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use base64::Engine;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use certforge_core::templates::decode_template;
use certforge_core::{
    fit, CertificateGenerator, CertificateLayout, ExportOutcome, FieldRole, FitStrategy,
    GeneratorConfig, GeneratorError, GlyphTypeface, MetricTypeface, TextField, Typeface,
};

#[derive(Parser)]
#[command(name = "certforge-cli")]
#[command(about = "CertForge CLI - Certificate text fitting and PDF export")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON generator config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// TrueType/OpenType font used for measuring and drawing
    #[arg(short, long, global = true)]
    font: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Exact,
    Heuristic,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the font size for one string
    Fit {
        #[arg(short, long)]
        text: String,

        /// Container width in pixels
        #[arg(short, long, default_value_t = 800.0)]
        width: f32,

        #[arg(short, long, value_enum, default_value = "exact")]
        strategy: StrategyArg,
    },

    /// Validate both form fields
    Validate {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        organization: String,
    },

    /// Compose and export a certificate PDF
    Render {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        organization: String,

        /// Template artwork (PNG or JPEG); omitted means the fallback design
        #[arg(short, long)]
        template: Option<PathBuf>,

        /// Layout contract JSON
        #[arg(short, long)]
        layout: Option<PathBuf>,

        /// Issue date, YYYY-MM-DD (defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Directory to write the PDF into
        #[arg(long)]
        out: Option<PathBuf>,

        /// Embed the PDF in the JSON output
        #[arg(long)]
        base64: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match GeneratorConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                println!("{}", json!({"success": false, "error": format!("Failed to load config: {}", e)}));
                return ExitCode::FAILURE;
            }
        },
        None => GeneratorConfig::default(),
    };
    init_tracing(config.is_dev);

    let typeface = match load_typeface(cli.font.as_deref()) {
        Ok(t) => t,
        Err(e) => {
            println!("{}", json!({"success": false, "error": format!("Failed to load font: {}", e)}));
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Fit { text, width, strategy } => run_fit(&config, typeface.as_ref(), &text, width, strategy),
        Commands::Validate { name, organization } => run_validate(&config, &name, &organization),
        Commands::Render { name, organization, template, layout, date, out, base64 } => {
            let request = RenderRequest {
                name,
                organization,
                template,
                layout,
                date: date.unwrap_or_else(|| chrono::Local::now().date_naive()),
                out,
                base64,
            };
            match run_render(config, typeface, &request) {
                Ok(output) => {
                    println!("{:#}", output);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    println!(
                        "{:#}",
                        json!({
                            "success": false,
                            "class": e.class(),
                            "error": e.user_message(),
                            "detail": e.to_string(),
                        })
                    );
                    ExitCode::from(2)
                }
            }
        }
    }
}

fn init_tracing(is_dev: bool) {
    let default_level = if is_dev { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_typeface(font: Option<&Path>) -> Result<Box<dyn Typeface>, certforge_core::typeface::TypefaceError> {
    Ok(match font {
        Some(path) => Box::new(GlyphTypeface::from_path(path)?),
        None => Box::new(MetricTypeface::sans()),
    })
}

fn run_fit(config: &GeneratorConfig, typeface: &dyn Typeface, text: &str, width: f32, strategy: StrategyArg) -> ExitCode {
    let policy = match config.fit_policy() {
        Ok(p) => p,
        Err(e) => {
            println!("{}", json!({"success": false, "error": e.to_string()}));
            return ExitCode::FAILURE;
        }
    };
    let strategy = match strategy {
        StrategyArg::Exact => FitStrategy::Exact,
        StrategyArg::Heuristic => FitStrategy::Heuristic(config.heuristic_profile.profile()),
    };

    let sanitized = config.sanitizer().sanitize(text);
    let result = fit(&sanitized, policy.width_budget(width), &policy, strategy, typeface);
    println!("{:#}", json!(result));
    ExitCode::SUCCESS
}

fn run_validate(config: &GeneratorConfig, name: &str, organization: &str) -> ExitCode {
    let validator = match certforge_core::Validator::new(&config.security.allowed_characters) {
        Ok(v) => v,
        Err(e) => {
            println!("{}", json!({"valid": false, "error": format!("Invalid allowed-character pattern: {}", e)}));
            return ExitCode::FAILURE;
        }
    };

    let sanitizer = config.sanitizer();
    let fields = [
        TextField::new(FieldRole::Name, name, &sanitizer),
        TextField::new(FieldRole::Organization, organization, &sanitizer),
    ];

    match validator.validate_form(&fields) {
        Ok(()) => {
            println!("{:#}", json!({"valid": true, "fields": fields}));
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!(
                "{:#}",
                json!({"valid": false, "field": e.role(), "error": e.to_string(), "violation": e})
            );
            ExitCode::from(2)
        }
    }
}

struct RenderRequest {
    name: String,
    organization: String,
    template: Option<PathBuf>,
    layout: Option<PathBuf>,
    date: NaiveDate,
    out: Option<PathBuf>,
    base64: bool,
}

fn run_render(
    config: GeneratorConfig,
    typeface: Box<dyn Typeface>,
    request: &RenderRequest,
) -> Result<Value, GeneratorError> {
    let mut generator = CertificateGenerator::new(config)?.with_typeface(typeface);
    if let Some(path) = &request.layout {
        generator = generator.with_layout(CertificateLayout::load_from_path(path)?)?;
    }

    if let Some(path) = &request.template {
        generator.begin_template_load();
        generator.template_loaded(decode_template(path));
    }
    debug!(template = generator.template().state_name(), "Template resolved");

    generator.on_input(FieldRole::Name, &request.name);
    generator.on_input(FieldRole::Organization, &request.organization);

    let exported = match generator.export(request.date)? {
        ExportOutcome::Exported(exported) => exported,
        ExportOutcome::Ignored => {
            return Ok(json!({"success": false, "error": "Generator busy"}));
        }
    };

    let path = match &request.out {
        Some(dir) => Some(
            exported
                .document
                .save(dir)
                .map_err(|e| GeneratorError::Encoding(format!("Failed to write PDF: {}", e)))?,
        ),
        None => None,
    };

    let mut output = json!({
        "success": true,
        "receipt": exported.receipt,
        "path": path,
    });
    if request.base64 {
        output["pdfBase64"] =
            Value::String(base64::engine::general_purpose::STANDARD.encode(&exported.document.bytes));
    }
    Ok(output)
}
