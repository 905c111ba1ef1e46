use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use emote_resizer::app::{App, FetchOutcome};
use emote_resizer::catalog::SqliteCatalog;
use emote_resizer::db::Database;
use emote_resizer::models::{Config, EmoteKind, EmoteRequest, ProcessingMode};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
#[command(name = "emote-fetch")]
#[command(about = "Resolve emotes and produce resized renditions")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch a resized emote.
    Fetch {
        name: String,
        /// Namespace path, e.g. `twitch/<channel>` or a catalog path.
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long, default_value_t = 32)]
        width: u32,
        #[arg(long, default_value_t = 32)]
        height: u32,
        #[arg(long)]
        webp: bool,
        /// Poll up to N times while the rendition is being produced.
        #[arg(long, value_name = "N", default_value_t = 0)]
        wait: usize,
        /// Write the rendition here instead of just reporting it.
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Register an uploaded image as an emote in a catalog namespace.
    AddEmote {
        namespace: String,
        slug: String,
        /// Image path, relative to the uploads directory or absolute.
        image: String,
        #[arg(long = "type", value_parser = parse_kind, default_value = "emote")]
        kind: EmoteKind,
    },
}

fn parse_kind(input: &str) -> std::result::Result<EmoteKind, String> {
    EmoteKind::from_tag(input)
        .map_err(|_| format!("Invalid type '{}'. Expected 'emote' or 'aemote'", input))
}

/// A background job would be dropped when the process exits, so without
/// `--wait` the resize has to happen in the request.
fn one_shot_mode(configured: ProcessingMode, wait: usize) -> ProcessingMode {
    if wait == 0 {
        ProcessingMode::Inline
    } else {
        configured
    }
}

async fn fetch(
    config: &Config,
    request: EmoteRequest,
    wait: usize,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = config
        .clone()
        .with_processing_mode(one_shot_mode(config.processing_mode, wait));
    let app = App::new(&config)
        .await
        .context("Failed to initialize application")?;

    let outcome = if wait > 0 {
        app.fetch_until_ready(&request, wait, POLL_INTERVAL).await?
    } else {
        app.fetch(&request).await?
    };

    match outcome {
        FetchOutcome::Ready(image) => {
            info!(
                "{} at {}: {} bytes of {}",
                request.name,
                request.dimensions(),
                image.bytes.len(),
                image.format.content_type()
            );
            if let Some(path) = output {
                tokio::fs::write(&path, &image.bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Wrote {}", path.display());
            }
            Ok(())
        }
        FetchOutcome::Pending => {
            info!("{} is still being processed, try again later", request.name);
            Ok(())
        }
        FetchOutcome::NotFound => bail!("Emote '{}' not found", request.name),
    }
}

fn add_emote(config: &Config, namespace: &str, slug: &str, image: &str, kind: EmoteKind) -> Result<()> {
    let catalog = SqliteCatalog::new(Database::open(&config.database_path)?);
    let namespace = catalog.create_namespace(namespace)?;
    let emote = catalog.add_emote(&namespace, slug, image, kind)?;
    info!(
        "Registered {} ({}) in {} as emote {}",
        emote.slug,
        kind.as_tag(),
        namespace.path,
        emote.id
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emote_resizer=info,emote_fetch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    let config = Config::from_env().context("Invalid configuration")?;

    let result = match args.command {
        Command::Fetch {
            name,
            namespace,
            width,
            height,
            webp,
            wait,
            output,
        } => {
            let mut request = EmoteRequest::new(name, width, height).with_webp(webp);
            if let Some(namespace) = namespace {
                request = request.with_namespace(namespace);
            }
            fetch(&config, request, wait, output).await
        }
        Command::AddEmote {
            namespace,
            slug,
            image,
            kind,
        } => add_emote(&config, &namespace, &slug, &image, kind),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
