use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use tunecord_channels::{ConsoleChannel, ConsoleReporter};
use tunecord_core::config::{
    BotConfig, Config, ConsoleConfig, PlaybackConfig, SourceProvider, TranscoderConfig, VoiceConfig,
};
use tunecord_core::types::{Author, ChannelId, GuildId, PlaybackRequest, UserId};
use tunecord_player::{Dispatcher, Player, source_provider};
use tunecord_voice::{StaticVoiceDirectory, UdpVoiceTransport};

mod logging;

#[derive(Parser)]
#[command(
    name = "tunecord",
    about = "Chat-commanded music bot that streams transcoded audio into voice channels",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot on the console channel
    Run,

    /// Play one query and exit
    Play {
        /// Search terms or URL
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Requesting user id (default: the console user)
        #[arg(long)]
        user: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose common issues
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);

    let config = Config::load(&config_path)?;

    logging::init(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Run => run(&config).await?,
        Commands::Play { query, user } => play_once(&config, query.join(" "), user).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Init => init_config(&config_path)?,
        },
        Commands::Doctor => doctor(&config, &config_path),
    }

    Ok(())
}

fn build_player(config: &Config) -> anyhow::Result<Arc<Player>> {
    let voice = config.voice();
    let playback = config.playback();
    let transport = UdpVoiceTransport::from_config(&voice, &playback)?;
    let directory = StaticVoiceDirectory::from_map(&voice.channels);

    Ok(Arc::new(Player::new(
        Arc::new(transport),
        Arc::new(directory),
        source_provider(config),
        config.transcoder(),
        &playback,
    )))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            token.cancel();
        }
    });
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for w in &warnings {
        tracing::warn!("{w}");
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid configuration: {}", errors.join("; "));
    }

    let player = build_player(config)?;
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let channel = ConsoleChannel::new(config.console());
    let (rx, handle) = channel.start()?;

    tracing::info!(
        prefix = config.prefix(),
        "Tunecord ready, type {}help for commands",
        config.prefix()
    );

    let dispatcher = Dispatcher::new(
        player,
        Arc::new(ConsoleReporter::stdout()),
        config,
        shutdown,
    );
    dispatcher.run(rx).await;
    handle.shutdown();

    Ok(())
}

async fn play_once(config: &Config, query: String, user: Option<String>) -> anyhow::Result<()> {
    let player = build_player(config)?;
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let console = config.console();
    let requester = Author {
        id: UserId::new(user.unwrap_or(console.user_id)),
        username: console.username,
        bot: false,
    };
    let request = PlaybackRequest::new(
        query,
        requester,
        ChannelId::new(console.channel_id),
        GuildId::new(console.guild_id),
    );

    match player.play(&request, &shutdown).await {
        Ok(stats) => {
            println!("Played {} frames ({} bytes)", stats.frames, stats.bytes);
            Ok(())
        }
        Err(e) => {
            if let Some(text) = e.user_message() {
                eprintln!("{text}");
            }
            Err(e.into())
        }
    }
}

fn init_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        println!("Config already exists: {}", path.display());
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let config = Config {
        bot: Some(BotConfig::default()),
        transcoder: Some(TranscoderConfig::default()),
        playback: Some(PlaybackConfig::default()),
        voice: Some(VoiceConfig::default()),
        console: Some(ConsoleConfig::default()),
        ..Config::default()
    };
    config.save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn doctor(config: &Config, config_path: &Path) {
    println!("Tunecord v{}", env!("CARGO_PKG_VERSION"));
    if config_path.exists() {
        println!("Config: {}", config_path.display());
    } else {
        println!("Config: {} (not found, using defaults)", config_path.display());
    }

    let (warnings, errors) = config.validate();
    for w in &warnings {
        println!("  warning: {w}");
    }
    for e in &errors {
        println!("  error: {e}");
    }

    println!("Bot token: {}", token_status(config));

    let transcoder = config.transcoder();
    report_program("Transcoder", &transcoder.program);
    if config.source_provider() == SourceProvider::Ytdlp {
        report_program("yt-dlp", &config.ytdlp_program());
    } else {
        println!("Music dir: {}", config.music_dir().display());
    }

    if errors.is_empty() {
        println!("Config OK");
    }
}

/// Whether a chat token resolves from `bot.token` or `bot.token_env`. Never
/// the token itself.
fn token_status(config: &Config) -> String {
    let Some(bot) = config.bot.as_ref() else {
        return "not set".into();
    };
    match (bot.resolve_token(), bot.token_env.as_deref()) {
        (Some(_), _) => "configured".into(),
        (None, Some(var)) => format!("not set (${var} unset or empty)"),
        (None, None) => "not set".into(),
    }
}

fn report_program(label: &str, program: &str) {
    match find_program(program) {
        Some(path) => println!("{label}: {}", path.display()),
        None => println!("{label}: `{program}` not found"),
    }
}

/// Resolve `program` the way a spawn would: paths as-is, bare names on PATH.
fn find_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        let exe = candidate.with_extension(std::env::consts::EXE_EXTENSION);
        exe.is_file().then_some(exe)
    })
}
