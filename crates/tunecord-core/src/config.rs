//! Configuration loading and validation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Tunecord configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot: Option<BotConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcoder: Option<TranscoderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback: Option<PlaybackConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub console: Option<ConsoleConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Bot identity and command surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Command prefix (default: "!").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Only this user may run `shutdown`. Unset = anyone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// The bot's own user id; its messages are ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            owner_id: None,
            user_id: None,
            token: None,
            token_env: None,
        }
    }
}

fn default_prefix() -> String {
    "!".into()
}

impl BotConfig {
    pub fn resolve_token(&self) -> Option<String> {
        resolve_secret_field(&self.token, &self.token_env)
    }
}

/// External transcoder invocation.
///
/// The process reads arbitrary encoded audio on stdin and writes its output
/// on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    #[serde(default = "default_transcoder_program")]
    pub program: String,

    #[serde(default = "default_transcoder_args")]
    pub args: Vec<String>,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: default_transcoder_program(),
            args: default_transcoder_args(),
        }
    }
}

fn default_transcoder_program() -> String {
    "ffmpeg".into()
}

fn default_transcoder_args() -> Vec<String> {
    [
        "-i", "pipe:0", "-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceProvider {
    #[default]
    Ytdlp,
    Local,
}

/// Where audio for a search term comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub provider: SourceProvider,

    /// yt-dlp binary (default: "yt-dlp").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ytdlp_program: Option<String>,

    /// Directory searched by the local provider (supports `~`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Pause after joining before streaming starts (default: 250).
    #[serde(default = "default_settle_ms")]
    pub join_settle_ms: u64,

    /// Pause after streaming ends before disconnecting (default: 250).
    #[serde(default = "default_settle_ms")]
    pub leave_settle_ms: u64,

    /// Capacity of the outbound packet channel (default: 64).
    #[serde(default = "default_packet_buffer")]
    pub packet_buffer: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            join_settle_ms: default_settle_ms(),
            leave_settle_ms: default_settle_ms(),
            packet_buffer: default_packet_buffer(),
        }
    }
}

fn default_settle_ms() -> u64 {
    250
}

fn default_packet_buffer() -> usize {
    64
}

/// UDP voice transport and the static voice directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Destination for voice datagrams (default: "127.0.0.1:5004").
    #[serde(default = "default_voice_endpoint")]
    pub endpoint: String,

    /// Cadence of outbound packets in ms (default: 20).
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// User id -> voice channel id.
    #[serde(default)]
    pub channels: HashMap<String, String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_voice_endpoint(),
            frame_interval_ms: default_frame_interval_ms(),
            channels: HashMap::new(),
        }
    }
}

fn default_voice_endpoint() -> String {
    "127.0.0.1:5004".into()
}

fn default_frame_interval_ms() -> u64 {
    20
}

/// Identity used for messages typed on the console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_console_guild")]
    pub guild_id: String,
    #[serde(default = "default_console_channel")]
    pub channel_id: String,
    #[serde(default = "default_console_user")]
    pub user_id: String,
    #[serde(default = "default_console_username")]
    pub username: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            guild_id: default_console_guild(),
            channel_id: default_console_channel(),
            user_id: default_console_user(),
            username: default_console_username(),
        }
    }
}

fn default_console_guild() -> String {
    "local".into()
}

fn default_console_channel() -> String {
    "console".into()
}

fn default_console_user() -> String {
    "local-user".into()
}

fn default_console_username() -> String {
    "you".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "tunecord_media=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::TunecordError::Io)?;
        Self::parse(&raw)
    }

    /// Parse config text (JSON5 with `${ENV_VAR}` references).
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw);

        json5::from_str(&substituted)
            .map_err(|e| crate::error::TunecordError::Config(e.to_string()))
    }

    /// Default config file path: `~/.tunecord/config.json`.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn prefix(&self) -> &str {
        self.bot.as_ref().map(|b| b.prefix.as_str()).unwrap_or("!")
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.bot.as_ref().and_then(|b| b.owner_id.as_deref())
    }

    pub fn bot_user_id(&self) -> Option<&str> {
        self.bot.as_ref().and_then(|b| b.user_id.as_deref())
    }

    pub fn transcoder(&self) -> TranscoderConfig {
        self.transcoder.clone().unwrap_or_default()
    }

    pub fn playback(&self) -> PlaybackConfig {
        self.playback.clone().unwrap_or_default()
    }

    pub fn voice(&self) -> VoiceConfig {
        self.voice.clone().unwrap_or_default()
    }

    pub fn console(&self) -> ConsoleConfig {
        self.console.clone().unwrap_or_default()
    }

    pub fn source_provider(&self) -> SourceProvider {
        self.source.as_ref().map(|s| s.provider).unwrap_or_default()
    }

    pub fn ytdlp_program(&self) -> String {
        self.source
            .as_ref()
            .and_then(|s| s.ytdlp_program.clone())
            .unwrap_or_else(|| "yt-dlp".to_string())
    }

    /// Directory searched by the local provider (default: `~/.tunecord/music`).
    pub fn music_dir(&self) -> PathBuf {
        self.source
            .as_ref()
            .and_then(|s| s.music_dir.as_ref())
            .map(|dir| {
                let expanded = shellexpand::tilde(dir);
                PathBuf::from(expanded.as_ref())
            })
            .unwrap_or_else(|| data_dir().join("music"))
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.prefix().is_empty() {
            errors.push("Command prefix cannot be empty".to_string());
        }

        if self.transcoder().program.trim().is_empty() {
            errors.push("Transcoder program cannot be empty".to_string());
        }

        let voice = self.voice();
        if voice.endpoint.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Voice endpoint is not a socket address: {}",
                voice.endpoint
            ));
        }
        if voice.frame_interval_ms == 0 {
            errors.push("Voice frame interval cannot be 0".to_string());
        }
        if voice.channels.is_empty() {
            warnings.push("No voice channels mapped; every play request will be rejected".to_string());
        }

        if self.playback().packet_buffer == 0 {
            errors.push("Packet buffer cannot be 0".to_string());
        }

        if self.source_provider() == SourceProvider::Local && !self.music_dir().is_dir() {
            warnings.push(format!(
                "Music directory not found: {}",
                self.music_dir().display()
            ));
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Tunecord data: `~/.tunecord/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tunecord")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_TC_KEY", "tok-123") };
        let input = r#"{"key": "${TEST_TC_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("tok-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_TC_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_TC_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.prefix(), "!");
        assert_eq!(config.transcoder().program, "ffmpeg");
        assert_eq!(
            config.transcoder().args,
            vec!["-i", "pipe:0", "-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"]
        );
        assert_eq!(config.playback().join_settle_ms, 250);
        assert_eq!(config.playback().leave_settle_ms, 250);
        assert_eq!(config.voice().frame_interval_ms, 20);
        assert_eq!(config.source_provider(), SourceProvider::Ytdlp);
        assert_eq!(config.ytdlp_program(), "yt-dlp");
    }

    #[test]
    fn test_parse_json5_sections() {
        let config = Config::parse(
            r#"{
                // comments are fine
                bot: { prefix: "?", owner_id: "42" },
                playback: { join_settle_ms: 10 },
                source: { provider: "local", music_dir: "/tmp/music" },
                voice: { channels: { "u1": "vc-1" } },
            }"#,
        )
        .unwrap();
        assert_eq!(config.prefix(), "?");
        assert_eq!(config.owner_id(), Some("42"));
        assert_eq!(config.playback().join_settle_ms, 10);
        assert_eq!(config.playback().leave_settle_ms, 250);
        assert_eq!(config.source_provider(), SourceProvider::Local);
        assert_eq!(config.music_dir(), PathBuf::from("/tmp/music"));
        assert_eq!(config.voice().channels.get("u1").map(String::as_str), Some("vc-1"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = Config::load(Path::new("/nonexistent/tunecord/config.json")).unwrap();
        assert!(config.bot.is_none());
        assert_eq!(config.prefix(), "!");
    }

    #[test]
    fn test_load_and_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            bot: Some(BotConfig {
                prefix: "$".into(),
                ..BotConfig::default()
            }),
            ..Config::default()
        };
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.prefix(), "$");
    }

    #[test]
    fn test_bot_resolve_token() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_TC_BOT_TOKEN", "bot-token-123") };
        let bot = BotConfig {
            token_env: Some("TEST_TC_BOT_TOKEN".into()),
            ..BotConfig::default()
        };
        assert_eq!(bot.resolve_token(), Some("bot-token-123".into()));

        let direct = BotConfig {
            token: Some("direct".into()),
            token_env: Some("TEST_TC_BOT_TOKEN".into()),
            ..BotConfig::default()
        };
        assert_eq!(direct.resolve_token(), Some("direct".into()));
        unsafe { std::env::remove_var("TEST_TC_BOT_TOKEN") };
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = Config::parse(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_logging_config_default_matches_empty_section() {
        let built = LoggingConfig::default();
        let parsed = Config::parse(r#"{ "logging": {} }"#)
            .unwrap()
            .logging
            .unwrap();
        assert_eq!(built.format, parsed.format);
        assert_eq!(built.output, parsed.output);
        assert_eq!(built.format, "plain");
        assert_eq!(built.output, "stderr");
    }

    #[test]
    fn test_validate_bad_endpoint_errors() {
        let config = Config {
            voice: Some(VoiceConfig {
                endpoint: "not-an-address".into(),
                ..VoiceConfig::default()
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(
            errors.iter().any(|e| e.contains("endpoint")),
            "Expected an error about the voice endpoint, got: {errors:?}"
        );
    }

    #[test]
    fn test_validate_warns_without_voice_channels() {
        let (warnings, errors) = Config::default().validate();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert!(warnings.iter().any(|w| w.contains("voice channels")));
    }
}
