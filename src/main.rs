use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fancam_print::config::{AppConfig, Overrides, ProviderOverrides};
use fancam_print::core::{PhotoUpload, PrintMode, PrintOptions};
use fancam_print::web::WebServer;
use fancam_print::{cloud, context::AppContext, db, logging};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "fancam-print")]
#[command(about = "Send event photos to a cloud-connected printer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Target printer address (email-like device identifier)
    #[arg(long, global = true)]
    device_id: Option<String>,

    #[arg(long, global = true)]
    simulation: Option<bool>,

    #[arg(long, global = true)]
    verbose: Option<bool>,

    #[arg(long, global = true)]
    json_logs: Option<bool>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one or more image files, in order
    Print(PrintArgs),
    /// Show the provider status of a job
    Status { job_id: String },
    /// Cancel a job
    Cancel { job_id: String },
    /// List jobs recorded in the local ledger
    Jobs {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Run the print API
    Serve(ServeArgs),
    /// Show the effective configuration
    Config,
}

#[derive(Args)]
struct PrintArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,

    #[arg(long)]
    copies: Option<u32>,

    #[arg(long)]
    paper_size: Option<String>,

    #[arg(long)]
    media_type: Option<String>,

    #[arg(long)]
    quality: Option<String>,

    #[arg(long)]
    borderless: Option<bool>,

    #[arg(long)]
    job_name: Option<String>,

    #[arg(long)]
    print_mode: Option<PrintMode>,
}

impl PrintArgs {
    fn options(&self) -> PrintOptions {
        PrintOptions {
            paper_size: self.paper_size.clone(),
            media_type: self.media_type.clone(),
            quality: self.quality.clone(),
            borderless: self.borderless,
            copies: self.copies,
            job_name: self.job_name.clone(),
            print_mode: self.print_mode,
        }
    }
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    http_bind: Option<std::net::SocketAddr>,

    #[arg(long)]
    photo_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut overrides = Overrides {
        provider: ProviderOverrides {
            device_id: cli.device_id.clone(),
        },
        simulation: cli.simulation,
        verbose: cli.verbose,
        json_logs: cli.json_logs,
        ..Default::default()
    };
    if let Commands::Serve(args) = &cli.command {
        overrides.http_bind = args.http_bind;
        overrides.photo_dir = args.photo_dir.clone();
    }

    let config = AppConfig::new(cli.config.as_deref(), &overrides)?;
    logging::init(logging::LogConfig::from(&config));

    if let Commands::Config = cli.command {
        print!("{}", config.to_redacted_toml()?);
        return Ok(());
    }

    let ctx = build_context(config).await?;

    match cli.command {
        Commands::Print(args) => run_print(&ctx, &args).await.context("Print failed")?,
        Commands::Status { job_id } => {
            let job = ctx.printer.check_print_job_status(&job_id).await?;
            print_json(&job)?;
        }
        Commands::Cancel { job_id } => {
            let cancelled = ctx.printer.cancel_print_job(&job_id).await?;
            print_json(&serde_json::json!({ "job_id": job_id, "cancelled": cancelled }))?;
        }
        Commands::Jobs { limit } => {
            let conn = ctx
                .printer
                .ledger()
                .context("No ledger configured (set ledger_path)")?;
            print_json(&db::jobs::list(conn, limit).await?)?;
        }
        Commands::Serve(_) => run_server(ctx).await.context("Failed to run print API")?,
        Commands::Config => {}
    }

    Ok(())
}

async fn build_context(config: AppConfig) -> Result<AppContext> {
    let cloud = cloud::create_cloud(&config).context("Failed to set up printer cloud client")?;
    let ledger = match &config.ledger_path {
        Some(path) => Some(
            db::init(path)
                .await
                .with_context(|| format!("Failed to open ledger at {}", path.display()))?,
        ),
        None => None,
    };
    Ok(AppContext::new(config, cloud, ledger))
}

async fn run_print(ctx: &AppContext, args: &PrintArgs) -> Result<()> {
    let device_id = ctx.printer.resolve_device(None)?;

    let mut photos = Vec::with_capacity(args.files.len());
    for path in &args.files {
        photos.push(read_photo(path).await?);
    }

    let report = ctx
        .printer
        .print_multiple_photos(&device_id, &photos, &args.options())
        .await;
    print_json(&report)?;

    if report.failed() > 0 {
        anyhow::bail!(
            "{} of {} photos failed to print",
            report.failed(),
            report.outcomes.len()
        );
    }
    Ok(())
}

async fn read_photo(path: &Path) -> Result<PhotoUpload> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(PhotoUpload { data, file_name })
}

async fn run_server(ctx: AppContext) -> Result<()> {
    let server = Arc::new(WebServer::new(&ctx));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_server.shutdown();
        }
    });

    server.start().await
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
