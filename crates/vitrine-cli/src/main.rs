use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use vitrine_contracts::events::EventWriter;
use vitrine_contracts::images::ImageBuffer;
use vitrine_contracts::models::{CameraAngle, PersonaPreference};
use vitrine_contracts::providers::{parse_provider_order, SecretKey};
use vitrine_contracts::runs::receipts::{build_receipt, write_receipt, ReceiptOutput};
use vitrine_contracts::runs::request::GenerationRequest;
use vitrine_contracts::store::DocumentStore;
use vitrine_engine::cutout::CutoutAttempt;
use vitrine_engine::removal::HttpRemovalTransport;
use vitrine_engine::source::sha256_hex;
use vitrine_engine::{
    BackgroundRemovalRouter, CancelToken, EnvVars, FloodFillCutout, GenerationResult,
    PipelineConfig, PipelineTransports, PixelTransparencyAnalyzer, ProductImagePipeline,
    ProviderSecretResolver,
};

const SECRETS_PATH_ENV: &str = "VITRINE_SECRETS_PATH";
const DEFAULT_SECRETS_PATH: &str = ".vitrine/secrets.json";

#[derive(Debug, Parser)]
#[command(name = "vitrine", version, about = "Catalog model-shot generator with transparent backgrounds")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one catalog image from product photos.
    Generate(GenerateArgs),
    /// Print the transparency analysis of an image.
    Analyze(AnalyzeArgs),
    /// Key out a plain backdrop without calling any provider.
    Cutout(ImageOutArgs),
    /// Remove the background through the configured providers.
    RemoveBg(RemoveBgArgs),
    /// Inspect or change stored provider credentials.
    Secrets(SecretsArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// Source image URL; the first one is the canonical reference.
    #[arg(long = "url")]
    urls: Vec<String>,
    /// JSON file holding a full request; flags override its fields.
    #[arg(long)]
    request: Option<PathBuf>,
    #[arg(long)]
    color_reference: Option<String>,
    #[arg(long)]
    anchor: Option<String>,
    #[arg(long, value_parser = parse_angle)]
    angle: Option<CameraAngle>,
    /// Render the garment in this color.
    #[arg(long)]
    color: Option<String>,
    #[arg(long)]
    customization: Option<String>,
    /// `deterministic`, `random` or a persona id.
    #[arg(long)]
    persona: Option<String>,
    #[arg(long)]
    product_name: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long = "product-color")]
    product_colors: Vec<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long = "fallback")]
    fallbacks: Vec<String>,
    #[arg(long)]
    local_cutout: bool,
    #[arg(long)]
    min_edge: Option<u32>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    secrets: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
}

#[derive(Debug, Parser)]
struct ImageOutArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct RemoveBgArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    secrets: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SecretsArgs {
    #[arg(long)]
    secrets: Option<PathBuf>,
    #[command(subcommand)]
    action: SecretsAction,
}

#[derive(Debug, Subcommand)]
enum SecretsAction {
    /// Which keys are configured and where they come from. Never prints key values.
    Status,
    /// Store a key (`gemini`, `removebg`, `clipdrop`); omit the value to clear it.
    Set {
        #[arg(value_parser = parse_secret_key)]
        provider: SecretKey,
        value: Option<String>,
    },
    /// Store the background-removal provider order, e.g. `clipdrop,removebg`.
    Order { providers: String },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("vitrine error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Analyze(args) => run_analyze(args),
        Command::Cutout(args) => run_cutout(args),
        Command::RemoveBg(args) => run_remove_bg(args),
        Command::Secrets(args) => run_secrets(args),
    }
}

fn parse_angle(raw: &str) -> std::result::Result<CameraAngle, String> {
    raw.parse()
}

fn parse_secret_key(raw: &str) -> std::result::Result<SecretKey, String> {
    SecretKey::ALL
        .into_iter()
        .find(|key| key.as_str().eq_ignore_ascii_case(raw.trim()))
        .ok_or_else(|| format!("unknown provider '{raw}' (expected gemini, removebg or clipdrop)"))
}

fn parse_persona(raw: &str) -> PersonaPreference {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "deterministic" => PersonaPreference::Deterministic,
        "random" => PersonaPreference::Random,
        other => PersonaPreference::Fixed(other.to_string()),
    }
}

fn secrets_path(flag: Option<PathBuf>, env: &EnvVars) -> PathBuf {
    flag.or_else(|| env.get(SECRETS_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SECRETS_PATH))
}

fn secret_resolver(flag: Option<PathBuf>, env: EnvVars) -> ProviderSecretResolver {
    let store = DocumentStore::new(secrets_path(flag, &env));
    ProviderSecretResolver::new(env, Arc::new(store))
}

fn build_request(args: &GenerateArgs) -> Result<GenerationRequest> {
    let mut request = match &args.request {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            serde_json::from_str::<GenerationRequest>(&raw)
                .with_context(|| format!("{} is not a valid request", path.display()))?
        }
        None => GenerationRequest::default(),
    };
    if !args.urls.is_empty() {
        request.source_urls = args.urls.clone();
    }
    if let Some(url) = &args.color_reference {
        request.color_reference_url = Some(url.clone());
    }
    if let Some(url) = &args.anchor {
        request.consistency_anchor_url = Some(url.clone());
    }
    if let Some(angle) = args.angle {
        request.angle = angle;
    }
    if let Some(color) = &args.color {
        request.color_override = Some(color.clone());
    }
    if let Some(customization) = &args.customization {
        request.customization = Some(customization.clone());
    }
    if let Some(persona) = &args.persona {
        request.persona = parse_persona(persona);
    }
    if let Some(name) = &args.product_name {
        request.product.name = Some(name.clone());
    }
    if let Some(category) = &args.category {
        request.product.category = Some(category.clone());
    }
    if !args.product_colors.is_empty() {
        request.product.colors = args.product_colors.clone();
    }
    if let Some(model) = &args.model {
        request.model_override = Some(model.clone());
    }
    if !args.fallbacks.is_empty() {
        request.model_fallbacks = args.fallbacks.clone();
    }
    if request.source_urls.is_empty() {
        bail!("at least one --url (or source_urls in --request) is required");
    }
    Ok(request)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let request = build_request(&args)?;
    let env = EnvVars::from_process();
    let mut config = PipelineConfig::from_vars(&env);
    if args.local_cutout {
        config.local_cutout = true;
    }
    if let Some(min_edge) = args.min_edge {
        config.min_output_edge = min_edge;
    }

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed creating {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventWriter::to_file(&events_path, "vitrine-cli");
    let transports = PipelineTransports::http(&config);
    let secrets = Arc::new(secret_resolver(args.secrets.clone(), env));
    let pipeline = ProductImagePipeline::new(config, transports, secrets, events);

    match pipeline.generate(&request, &CancelToken::new()) {
        Ok(result) => {
            let (image_path, receipt_path) = write_artifacts(&args.out, &request, &result)?;
            let summary = json!({
                "request_id": result.request_id,
                "model": result.model,
                "transparency_stage": result.diagnostics.transparency.stage.as_str(),
                "image_path": image_path,
                "receipt_path": receipt_path,
                "warnings": result.diagnostics.warnings,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(0)
        }
        Err(err) => {
            let report = json!({
                "error": err.to_string(),
                "code": err.code(),
                "status": err.http_status(),
                "model_attempts": err.attempts(),
            });
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
            Ok(2)
        }
    }
}

/// Write the image and its receipt next to each other; returns both paths.
fn write_artifacts(
    out_dir: &Path,
    request: &GenerationRequest,
    result: &GenerationResult,
) -> Result<(PathBuf, PathBuf)> {
    let image_path = out_dir.join(format!(
        "{}.{}",
        result.request_id,
        result.image.extension()
    ));
    let receipt_path = out_dir.join(format!("{}.receipt.json", result.request_id));
    fs::write(&image_path, &result.image.bytes)
        .with_context(|| format!("failed writing {}", image_path.display()))?;

    let (width, height) = image::load_from_memory(&result.image.bytes)
        .map(|decoded| (decoded.width(), decoded.height()))
        .unwrap_or((0, 0));
    let output = ReceiptOutput {
        model: result.model.clone(),
        angle: result.angle.as_str().to_string(),
        persona: result.persona.id.to_string(),
        mime_type: result.image.mime_type.clone(),
        width,
        height,
        sha256: sha256_hex(&result.image.bytes),
    };
    let receipt = build_receipt(
        request,
        &output,
        &result.hashes,
        &result.diagnostics,
        &image_path,
        &receipt_path,
    );
    write_receipt(&receipt_path, &receipt)?;
    Ok((image_path, receipt_path))
}

fn read_image(path: &Path) -> Result<ImageBuffer> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    match ImageBuffer::sniffed(bytes, None) {
        Some(buffer) => Ok(buffer),
        None => bail!("{} is not a PNG, JPEG or WebP image", path.display()),
    }
}

fn analyzer(env: &EnvVars) -> PixelTransparencyAnalyzer {
    PixelTransparencyAnalyzer::new(PipelineConfig::from_vars(env).thresholds)
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let buffer = read_image(&args.image)?;
    let analysis = analyzer(&EnvVars::from_process()).analyze(&buffer)?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(0)
}

fn run_cutout(args: ImageOutArgs) -> Result<i32> {
    let buffer = read_image(&args.image)?;
    let thresholds = PipelineConfig::from_vars(&EnvVars::from_process()).thresholds;
    match FloodFillCutout::new(thresholds).cut(&buffer)? {
        CutoutAttempt::Usable(result) => {
            fs::write(&args.out, &result.image.bytes)
                .with_context(|| format!("failed writing {}", args.out.display()))?;
            let summary = json!({
                "out": args.out,
                "flooded_ratio": result.flooded_ratio,
                "analysis": result.analysis,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(0)
        }
        CutoutAttempt::Rejected { reason } => {
            eprintln!("cutout rejected: {reason}");
            Ok(1)
        }
    }
}

fn run_remove_bg(args: RemoveBgArgs) -> Result<i32> {
    let buffer = read_image(&args.image)?;
    let env = EnvVars::from_process();
    let config = PipelineConfig::from_vars(&env);
    let analyzer = PixelTransparencyAnalyzer::new(config.thresholds.clone());
    let resolver = secret_resolver(args.secrets, env);
    let router = BackgroundRemovalRouter::new(
        Arc::new(HttpRemovalTransport::new()),
        config.removal,
        EventWriter::disabled(),
    );
    let outcome = router.remove(&buffer, &resolver.resolve(), &CancelToken::new())?;
    let mut summary = json!({ "background_removal": outcome.diagnostics });
    let Some(image) = outcome.image else {
        eprintln!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(1);
    };
    fs::write(&args.out, &image.bytes)
        .with_context(|| format!("failed writing {}", args.out.display()))?;
    summary["out"] = json!(args.out);
    summary["usable_transparency"] = Value::Bool(analyzer.is_usable(&image));
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(0)
}

fn run_secrets(args: SecretsArgs) -> Result<i32> {
    let resolver = secret_resolver(args.secrets, EnvVars::from_process());
    match args.action {
        SecretsAction::Status => {}
        SecretsAction::Set { provider, value } => {
            resolver.set_key(provider, value.as_deref())?;
        }
        SecretsAction::Order { providers } => {
            let Some(order) = parse_provider_order(&providers) else {
                bail!("no known providers in '{providers}' (expected removebg, clipdrop)");
            };
            resolver.set_provider_order(&order)?;
        }
    }
    println!("{}", serde_json::to_string_pretty(&resolver.status())?);
    Ok(0)
}
