use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use channel_orion::config::{ConfigManager, EnvConfigManager, GROUP_IDS, IGNORE_SELF, VERBOSITY};
use channel_orion::logger::init_tracing;
use channel_orion::schema::write_schema;
use channel_orion::secret::{EnvSecretsManager, SecretsManager};
use channel_orion::node::{GroupIds, set_user_status, user_status};
use channel_orion::{ChannelSink, OrionConfig, RxNode, TxMessage, TxNode};
use clap::{Args, Parser, Subcommand};
use orion_client::media::{Outgoing, SendOptions};
use orion_client::HttpOrionApi;
use serde_json::json;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "channel_orion",
    about = "Orion push-to-talk channel",
    version = "0.2.0"
)]
struct Cli {
    /// `.env` file with ORION_* configuration and credentials
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Log level (e.g. error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write rolling log files into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Engage the configured groups and print received events
    Rx(RxArgs),

    /// Transmit a message to groups
    Tx(TxArgs),

    /// Upload content to the media base and announce it to groups
    Send(SendArgs),

    /// Store a file on the media base and print its url
    Upload {
        file: PathBuf,
    },

    /// Show a user's status, or publish our own with --set
    Status {
        /// User id to look up
        #[arg(required_unless_present = "set")]
        user: Option<String>,

        /// Status object to publish, as JSON
        #[arg(long)]
        set: Option<String>,
    },

    /// Emit JSON-Schema for events and outputs
    Schema {
        /// Output directory
        #[arg(default_value = "schemas")]
        out: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RxArgs {
    /// Override ORION_GROUP_IDS (comma separated ids or ALL)
    #[arg(long)]
    groups: Option<String>,

    /// Override ORION_VERBOSITY
    #[arg(long)]
    verbosity: Option<String>,

    /// Suppress events from our own user
    #[arg(long)]
    ignore_self: bool,
}

#[derive(Args, Debug)]
struct TxArgs {
    /// Text to speak
    #[arg(long)]
    message: Option<String>,

    /// Media reference to transmit
    #[arg(long)]
    media: Option<String>,

    /// Group id, repeatable. Defaults to ORION_GROUP_IDS.
    #[arg(long = "group")]
    groups: Vec<String>,

    /// User id for a direct transmission
    #[arg(long)]
    target: Option<String>,
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Plain text message
    #[arg(long, conflicts_with_all = ["audio", "image"])]
    text: Option<String>,

    /// Opus encoded voice file
    #[arg(long, conflicts_with = "image")]
    audio: Option<PathBuf>,

    /// Image file
    #[arg(long)]
    image: Option<PathBuf>,

    /// Image mime type
    #[arg(long, default_value = "image/jpeg")]
    mime: String,

    /// Thumbnail file sent along with --image
    #[arg(long, requires = "image")]
    thumbnail: Option<PathBuf>,

    /// Group id, repeatable. Defaults to ORION_GROUP_IDS.
    #[arg(long = "group")]
    groups: Vec<String>,

    /// User id for a direct transmission
    #[arg(long)]
    target: Option<String>,

    /// Stream key the content was encrypted with
    #[arg(long)]
    stream_key: Option<String>,
}

impl SendArgs {
    async fn outgoing(&self) -> anyhow::Result<Outgoing> {
        if let Some(text) = &self.text {
            return Ok(Outgoing::Text(text.clone()));
        }
        if let Some(audio) = &self.audio {
            let data = tokio::fs::read(audio).await.with_context(|| format!("reading {}", audio.display()))?;
            return Ok(Outgoing::Ptt(data));
        }
        if let Some(image) = &self.image {
            let data = tokio::fs::read(image).await.with_context(|| format!("reading {}", image.display()))?;
            let thumbnail = match &self.thumbnail {
                Some(path) => Some(tokio::fs::read(path).await.with_context(|| format!("reading {}", path.display()))?),
                None => None,
            };
            return Ok(Outgoing::Image { data, mime_type: self.mime.clone(), thumbnail });
        }
        anyhow::bail!("one of --text, --audio or --image is required")
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _guards = match init_tracing(cli.log_dir.clone(), &cli.log_level) {
        Ok(guards) => Some(guards),
        Err(e) => {
            eprintln!("could not initialise logging: {e}");
            None
        }
    };

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConfigManager(EnvConfigManager::new(cli.env_file.clone()));
    let secrets = SecretsManager(EnvSecretsManager::new(Some(cli.env_file.clone())));

    match cli.command {
        Commands::Schema { out } => {
            let written = write_schema(&out)?;
            info!("wrote {} schemas to {}", written.len(), out.display());
        }
        Commands::Rx(args) => {
            if let Some(groups) = &args.groups {
                config.0.set(GROUP_IDS, groups).await;
            }
            if let Some(verbosity) = &args.verbosity {
                config.0.set(VERBOSITY, verbosity).await;
            }
            if args.ignore_self {
                config.0.set(IGNORE_SELF, "true").await;
            }
            let orion = OrionConfig::load(&config).await?;
            let credentials = secrets.credentials().await?;
            run_rx(orion, credentials).await?;
        }
        Commands::Tx(args) => {
            if !args.groups.is_empty() {
                config.0.set(GROUP_IDS, &args.groups.join(",")).await;
            }
            let orion = OrionConfig::load(&config).await?;
            let credentials = secrets.credentials().await?;
            let node = TxNode::new(&orion, credentials);
            let msg = TxMessage {
                group_ids: None,
                message: args.message,
                media: args.media,
                target: args.target,
            };
            let response = node.transmit(&msg).await.context("transmit failed")?;
            println!("{}", serde_json::to_string(&response)?);
        }
        Commands::Send(args) => {
            let outgoing = args.outgoing().await?;
            let orion = OrionConfig::load(&config).await?;
            let credentials = secrets.credentials().await?;
            let node = TxNode::new(&orion, credentials);
            let options = SendOptions { target: args.target.clone(), stream_key: args.stream_key.clone() };
            let groups = (!args.groups.is_empty()).then(|| GroupIds::Many(args.groups.clone()));
            let urls = node.send(&outgoing, &options, groups.as_ref()).await.context("send failed")?;
            println!("{}", json!({"media": urls}));
        }
        Commands::Upload { file } => {
            let data = tokio::fs::read(&file).await.with_context(|| format!("reading {}", file.display()))?;
            let orion = OrionConfig::load(&config).await?;
            let credentials = secrets.credentials().await?;
            let url = TxNode::new(&orion, credentials).upload(data).await.context("upload failed")?;
            println!("{url}");
        }
        Commands::Status { user, set } => {
            let orion = OrionConfig::load(&config).await?;
            let credentials = secrets.credentials().await?;
            let api = HttpOrionApi::new(orion.endpoints.clone());
            match set {
                Some(raw) => {
                    let status: serde_json::Value = serde_json::from_str(&raw).context("--set expects JSON")?;
                    set_user_status(&api, &credentials, &status).await.context("status update failed")?;
                    info!("status published");
                }
                None => {
                    let user = user.context("a user id is required")?;
                    let status = user_status(&api, &credentials, &user).await.context("status lookup failed")?;
                    println!("{}", serde_json::to_string(&status)?);
                }
            }
        }
    }
    Ok(())
}

async fn run_rx(config: OrionConfig, credentials: orion_client::Credentials) -> anyhow::Result<()> {
    let (sink, mut rx) = ChannelSink::new();
    let node = RxNode::start(config, credentials, Arc::new(sink));
    info!(node = node.id(), "rx node running, Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            maybe = rx.outputs.recv() => match maybe {
                Some(outputs) => {
                    for (port, event) in outputs.ports().into_iter().enumerate() {
                        if let Some(event) = event {
                            println!("{}", json!({"port": port, "event": event}));
                        }
                    }
                }
                None => {
                    info!("rx node stopped");
                    break;
                }
            },
            Ok(()) = rx.status.changed() => {
                let status = rx.status.borrow_and_update().clone();
                info!(health = %status.health, fill = status.health.fill(), "{}", status.text);
            }
        }
    }

    node.close().await;
    Ok(())
}
