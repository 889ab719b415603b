use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::DEFAULT_MAX_MESSAGE_BYTES;
use crate::merge::{self, DEFAULT_OUTPUT_FILENAME, MergeSettings};
use crate::muxer::{DEFAULT_MUXER_PROGRAM, FfmpegMuxer};

const CONFIG_ENV: &str = "NATIVE_MUXER_CONFIG";

/// Host configuration, loaded from CLI args and optionally a TOML file.
///
/// Browsers launch the host without user-controlled arguments, so in practice
/// settings come from the file at `$NATIVE_MUXER_CONFIG` or
/// `<config dir>/native-muxer/config.toml`.
///
/// Example configuration file content
/// # Native muxer configuration
///
/// ffmpeg = "/usr/local/bin/ffmpeg"
/// timeout_secs = 300
/// default_output_filename = "merged_video.mp4"
/// output_dir = "/home/me/Videos"          # Optional, defaults to ~/Downloads
/// temp_dir = "/var/tmp"                   # Optional, defaults to the system temp dir
/// max_message_bytes = 67108864
/// remove_merged_sources = true
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Muxer executable, looked up on PATH unless absolute
    #[arg(long, default_value = DEFAULT_MUXER_PROGRAM)]
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    /// Seconds before a running merge is killed
    #[arg(short, long, default_value_t = 300)]
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// File name used when a merge request names none
    #[arg(short, long, default_value = DEFAULT_OUTPUT_FILENAME)]
    #[serde(default = "default_output_filename")]
    pub default_output_filename: String,

    /// Directory merged files are written to (default: ~/Downloads)
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,

    /// Directory for staged input streams (default: system temp dir)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<String>,

    /// Largest inbound message accepted, in bytes
    #[arg(short, long, default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Delete the inputs of a successful `merge_files` request. Inputs named
    /// `*_VIDEO_TEMP.*`/`*_AUDIO_TEMP.*` are the extension's own staging files
    /// and are removed either way; anything else is a user file and is kept
    /// unless this is set.
    #[arg(short, long)]
    pub remove_merged_sources: bool,

    /// Configuration file path
    #[arg(short, long, env = CONFIG_ENV)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Set by Chrome on Windows
    #[arg(long, hide = true)]
    #[serde(skip)]
    pub parent_window: Option<String>,

    /// Caller origin passed by the browser (extension origin, or manifest
    /// path and extension id for Firefox)
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    #[serde(skip)]
    pub caller: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            timeout_secs: default_timeout_secs(),
            default_output_filename: default_output_filename(),
            output_dir: None,
            temp_dir: None,
            max_message_bytes: default_max_message_bytes(),
            remove_merged_sources: false,
            config: None,
            parent_window: None,
            caller: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args, merging the config file when one is
    /// named or present at the default location.
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        let file = config
            .config
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| default_config_file().filter(|path| path.is_file()));
        if let Some(path) = file {
            let file_config = Self::from_file(&path)?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|error| anyhow::anyhow!("Failed to read {}: {error}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.ffmpeg == default_ffmpeg() {
            self.ffmpeg = file_config.ffmpeg;
        }
        if self.timeout_secs == default_timeout_secs() {
            self.timeout_secs = file_config.timeout_secs;
        }
        if self.default_output_filename == default_output_filename() {
            self.default_output_filename = file_config.default_output_filename;
        }
        if self.max_message_bytes == default_max_message_bytes() {
            self.max_message_bytes = file_config.max_message_bytes;
        }
        if !self.remove_merged_sources {
            self.remove_merged_sources = file_config.remove_merged_sources;
        }

        // For Option fields, CLI takes precedence if Some
        if self.output_dir.is_none() {
            self.output_dir = file_config.output_dir;
        }
        if self.temp_dir.is_none() {
            self.temp_dir = file_config.temp_dir;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ffmpeg.trim().is_empty() {
            return Err(anyhow::anyhow!("Muxer executable cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Timeout must be at least one second"));
        }
        if self.max_message_bytes == 0 {
            return Err(anyhow::anyhow!("Maximum message size must be positive"));
        }
        merge::validate_output_filename(&self.default_output_filename)
            .map_err(|error| anyhow::anyhow!("Default output filename: {error}"))?;
        if let Some(dir) = &self.output_dir
            && dir.is_empty()
        {
            return Err(anyhow::anyhow!("Output directory cannot be empty"));
        }
        if let Some(dir) = &self.temp_dir
            && dir.is_empty()
        {
            return Err(anyhow::anyhow!("Temp directory cannot be empty"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn muxer(&self) -> FfmpegMuxer {
        FfmpegMuxer::new(&self.ffmpeg, self.timeout())
    }

    pub fn merge_settings(&self) -> MergeSettings {
        MergeSettings {
            output_dir: self
                .output_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(merge::default_output_dir),
            temp_dir: self.temp_dir.as_ref().map(PathBuf::from),
            default_output_filename: self.default_output_filename.clone(),
            remove_merged_sources: self.remove_merged_sources,
        }
    }
}

fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("native-muxer").join("config.toml"))
}

// Default value functions
fn default_ffmpeg() -> String {
    DEFAULT_MUXER_PROGRAM.to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_output_filename() -> String {
    DEFAULT_OUTPUT_FILENAME.to_string()
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}
