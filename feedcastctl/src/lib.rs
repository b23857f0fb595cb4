mod logging;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use feedcast_core::updates::spawn_shutdown_hook;
use feedcast_core::{
    load_feedcast_config, store_from_config, CommandExecutor, ConfigError, CycleStats,
    DeliveryError, DeliverySettings, Feed, FeedError, FeedcastConfig, LoopError, LoopSettings,
    MediaFamily, Orchestrator, SourceError, StateError, StateStore, SystemCommandExecutor,
    TelegramClient, Transcoder, UpdateLoop, YoutubeDataApi, YtDlpSource,
};

pub use logging::init_logging;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Loop(#[from] LoopError),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "feedcast media relay control interface", long_about = None)]
pub struct Cli {
    /// Path to feedcast.toml
    #[arg(long, default_value = "configs/feedcast.toml")]
    pub config: PathBuf,
    /// Overrides system.log_level
    #[arg(long)]
    pub log_level: Option<String>,
    /// Overrides system.work_dir
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Polls the feed until terminated
    Run,
    /// Runs a single poll cycle and exits
    Once,
    /// Resolves a media id and prints the encoding decision without downloading
    Select(SelectArgs),
    /// Prints the persisted watermark and broadcast feeds
    Watermark,
    /// Validates the config and probes yt-dlp and ffmpeg
    Check,
}

#[derive(Args, Debug)]
pub struct SelectArgs {
    /// Media id, as captured from a watch link
    pub id: String,
    /// Select a video encoding instead of audio
    #[arg(long, default_value_t = false)]
    pub video: bool,
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    init_logging(
        &context.config.system.log_level,
        context.config.system.json_logs,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(context.dispatch(&cli.command, cli.format))
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: FeedcastConfig,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_feedcast_config(&cli.config)?;
        if let Some(level) = &cli.log_level {
            config.system.log_level = level.clone();
        }
        if let Some(work_dir) = &cli.work_dir {
            config.system.work_dir = work_dir.display().to_string();
        }
        config.validate()?;
        Ok(Self {
            config,
            config_path: cli.config.clone(),
        })
    }

    async fn dispatch(&self, command: &Commands, format: OutputFormat) -> Result<()> {
        match command {
            Commands::Run => self.run_forever().await,
            Commands::Once => {
                let (_, mut update_loop) = self.build_loop().await?;
                let stats = update_loop.run_cycle().await?;
                render(&stats, format)
            }
            Commands::Select(args) => {
                let report = self.select(args).await?;
                render(&report, format)
            }
            Commands::Watermark => {
                let report = self.watermark().await?;
                render(&report, format)
            }
            Commands::Check => {
                let report = self.health_check().await;
                render(&report, format)?;
                if report
                    .iter()
                    .any(|entry| matches!(entry.status, CheckStatus::Error))
                {
                    return Err(AppError::MissingResource(
                        "one or more checks failed".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    async fn run_forever(&self) -> Result<()> {
        let (feed, mut update_loop) = self.build_loop().await?;
        spawn_shutdown_hook(
            feed,
            self.config.feed.operator_chat_id,
            env!("CARGO_PKG_NAME").to_string(),
        );
        info!(
            config = %self.config_path.display(),
            interval_seconds = self.config.system.interval_seconds,
            "feedcast started"
        );
        update_loop.run().await?;
        Ok(())
    }

    fn store(&self) -> Result<StateStore> {
        let kv = store_from_config(&self.config.state)?;
        Ok(StateStore::new(kv, self.config.state.watermark_cap))
    }

    async fn orchestrator(&self, feed: Arc<dyn Feed>) -> Result<Arc<Orchestrator>> {
        let work_dir = Path::new(&self.config.system.work_dir);
        tokio::fs::create_dir_all(work_dir).await?;
        let source = Arc::new(YtDlpSource::new(&self.config.source)?);
        let transcoder = Arc::new(Transcoder::new(&self.config.transcoder));
        Ok(Arc::new(Orchestrator::new(
            source,
            feed,
            transcoder,
            DeliverySettings::from_config(&self.config),
        )))
    }

    async fn build_loop(&self) -> Result<(Arc<dyn Feed>, UpdateLoop)> {
        let feed: Arc<dyn Feed> = Arc::new(TelegramClient::new(&self.config.feed)?);
        let orchestrator = self.orchestrator(Arc::clone(&feed)).await?;
        let playlists = Arc::new(YoutubeDataApi::new(&self.config.source)?);
        let settings = LoopSettings::from_config(&self.config)?;
        let update_loop = UpdateLoop::bootstrap(
            Arc::clone(&feed),
            orchestrator,
            playlists,
            self.store()?,
            settings,
        )
        .await?;
        Ok((feed, update_loop))
    }

    async fn select(&self, args: &SelectArgs) -> Result<SelectionReport> {
        let feed: Arc<dyn Feed> = Arc::new(TelegramClient::new(&self.config.feed)?);
        let orchestrator = self.orchestrator(feed).await?;
        let (metadata, selection) = orchestrator.plan(&args.id, args.video).await?;
        Ok(SelectionReport {
            media_id: metadata.id.clone(),
            title: metadata.title.clone(),
            duration_seconds: metadata.duration_seconds,
            family: selection.family,
            format_id: selection.encoding.format_id.clone(),
            mime_type: selection.encoding.mime_type.clone(),
            bitrate_kbps: selection.encoding.bitrate_kbps(),
            estimated_size_bytes: selection
                .encoding
                .estimated_size(metadata.duration_seconds),
            max_size_bytes: self.config.delivery.max_file_size_bytes,
            target_bitrate_kbps: selection.target_bitrate_kbps,
        })
    }

    async fn watermark(&self) -> Result<WatermarkReport> {
        let state = self.store()?.load().await?;
        Ok(WatermarkReport {
            cap: state.watermark.cap(),
            newest: state.watermark.newest(),
            ids: state.watermark.ids(),
            channels: state.channels.iter().collect(),
        })
    }

    async fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = vec![HealthEntry::ok(
            "config",
            format!("{}", self.config_path.display()),
        )];
        results.push(check_directory(
            "work_dir",
            Path::new(&self.config.system.work_dir),
        ));
        results.push(match store_from_config(&self.config.state) {
            Ok(_) => HealthEntry::ok("state", format!("{:?} backend", self.config.state.backend)),
            Err(err) => HealthEntry::error("state", err.to_string()),
        });

        let executor = SystemCommandExecutor;
        results.push(
            probe(
                &executor,
                "yt-dlp",
                Path::new(&self.config.source.ytdlp_path),
                "--version",
            )
            .await,
        );
        results.push(
            probe(
                &executor,
                "ffmpeg",
                Path::new(&self.config.transcoder.ffmpeg_path),
                "-version",
            )
            .await,
        );
        if self.config.source.api_key.trim().is_empty() {
            results.push(HealthEntry::warn(
                "playlist api",
                "source.api_key is empty, playlist links will fail",
            ));
        }
        results
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::error(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::warn(
            name,
            format!("{} not found, created on start", path.display()),
        ),
    }
}

async fn probe(
    executor: &dyn CommandExecutor,
    name: &str,
    program: &Path,
    flag: &str,
) -> HealthEntry {
    match executor.output(program, &[flag.to_string()]).await {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let version = stdout.lines().next().unwrap_or("").trim().to_string();
            HealthEntry::ok(name, format!("{} ({version})", program.display()))
        }
        Ok(output) => HealthEntry::error(
            name,
            format!("{} exited with {}", program.display(), output.status),
        ),
        Err(err) => HealthEntry::error(name, format!("{}: {err}", program.display())),
    }
}

#[derive(Debug, Serialize)]
pub struct SelectionReport {
    pub media_id: String,
    pub title: String,
    pub duration_seconds: i64,
    pub family: MediaFamily,
    pub format_id: String,
    pub mime_type: String,
    pub bitrate_kbps: i64,
    pub estimated_size_bytes: i64,
    pub max_size_bytes: i64,
    /// Zero when the encoding fits as is.
    pub target_bitrate_kbps: i64,
}

#[derive(Debug, Serialize)]
pub struct WatermarkReport {
    pub cap: usize,
    pub newest: Option<i64>,
    pub ids: Vec<i64>,
    pub channels: Vec<i64>,
}

impl DisplayFallback for SelectionReport {
    fn display(&self) -> String {
        let decision = if self.target_bitrate_kbps > 0 {
            format!("transcode to {}kbps", self.target_bitrate_kbps)
        } else {
            "publish as downloaded".to_string()
        };
        format!(
            "{id} | {title} | {duration}s\n{family} format={format} ({mime}) {kbps}kbps ~{size} of {max} bytes\n{decision}",
            id = self.media_id,
            title = self.title,
            duration = self.duration_seconds,
            family = self.family,
            format = self.format_id,
            mime = self.mime_type,
            kbps = self.bitrate_kbps,
            size = self.estimated_size_bytes,
            max = self.max_size_bytes,
        )
    }
}

impl DisplayFallback for WatermarkReport {
    fn display(&self) -> String {
        let newest = self
            .newest
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "watermark: {len}/{cap} ids, newest={newest}\nbroadcast feeds: {channels}",
            len = self.ids.len(),
            cap = self.cap,
            channels = if self.channels.is_empty() {
                "none".to_string()
            } else {
                self.channels
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            },
        )
    }
}

impl DisplayFallback for CycleStats {
    fn display(&self) -> String {
        format!(
            "fetched={} skipped={} references={} delivered={} failed={} in {}ms",
            self.fetched,
            self.skipped,
            self.references,
            self.delivered,
            self.failed,
            self.duration_ms
        )
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
