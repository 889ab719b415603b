use std::io::Write as _;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::muxer::{MuxError, Muxer};

pub const DEFAULT_OUTPUT_FILENAME: &str = "merged_video.mp4";
const VIDEO_SUFFIX: &str = "_VIDEO.mp4";
const AUDIO_SUFFIX: &str = "_AUDIO.m4a";
/// File stems the extension gives the streams it saves for `merge_files`.
const EXTENSION_TEMP_STEMS: [&str; 2] = ["_VIDEO_TEMP", "_AUDIO_TEMP"];

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("Invalid output filename: {0}")]
    InvalidOutputFilename(String),

    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Input and output are the same file: {}", .0.display())]
    SameFile(PathBuf),

    #[error("Failed to write temporary {role} file: {source}")]
    TempFile {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to prepare output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Muxer reported success but {} is unreadable: {source}", .path.display())]
    OutputMetadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Mux(#[from] MuxError),
}

/// Where merged files go and how inputs are staged.
#[derive(Clone, Debug)]
pub struct MergeSettings {
    pub output_dir: PathBuf,
    /// `None` uses the system temp directory.
    pub temp_dir: Option<PathBuf>,
    pub default_output_filename: String,
    pub remove_merged_sources: bool,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            temp_dir: None,
            default_output_filename: DEFAULT_OUTPUT_FILENAME.to_string(),
            remove_merged_sources: false,
        }
    }
}

/// `$HOME/Downloads`, or `./Downloads` when no home directory is known.
pub fn default_output_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Downloads")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutput {
    pub path: PathBuf,
    pub size: u64,
}

/// Accepts only a single plain file name, so the result always lands inside
/// the output directory.
pub fn validate_output_filename(name: &str) -> Result<&str, MergeError> {
    let invalid = || MergeError::InvalidOutputFilename(name.to_string());
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(invalid()),
    }
}

pub struct Merger<M> {
    muxer: M,
    settings: MergeSettings,
}

impl<M: Muxer> Merger<M> {
    pub fn new(muxer: M, settings: MergeSettings) -> Self {
        Self { muxer, settings }
    }

    pub fn muxer(&self) -> &M {
        &self.muxer
    }

    /// Stage both streams in temp files, mux them, and report the output.
    /// The temp files are removed when this returns, whatever the outcome.
    pub async fn merge_bytes(
        &self,
        video: &[u8],
        audio: &[u8],
        output_filename: Option<&str>,
    ) -> Result<MergeOutput, MergeError> {
        let output_path = self.output_path(output_filename)?;

        let video_file = self.stage("video", VIDEO_SUFFIX, video)?;
        let audio_file = self.stage("audio", AUDIO_SUFFIX, audio)?;
        debug!(
            video = %video_file.path().display(),
            video_bytes = video.len(),
            audio = %audio_file.path().display(),
            audio_bytes = audio.len(),
            "staged inputs"
        );

        let result = self
            .mux_into(video_file.path(), audio_file.path(), &output_path)
            .await;

        for file in [video_file, audio_file] {
            let path = file.path().to_path_buf();
            if let Err(error) = file.close() {
                warn!(path = %path.display(), %error, "Failed to remove temporary file");
            }
        }

        result
    }

    /// Mux two files that already exist on disk.
    ///
    /// Inputs named by the extension's `_VIDEO_TEMP`/`_AUDIO_TEMP` convention
    /// are removed after a successful merge; other inputs only when
    /// `remove_merged_sources` is set.
    pub async fn merge_files(
        &self,
        video: &Path,
        audio: &Path,
        output_filename: Option<&str>,
    ) -> Result<MergeOutput, MergeError> {
        let output_path = self.output_path(output_filename)?;
        for input in [video, audio] {
            if !tokio::fs::try_exists(input).await.unwrap_or(false) {
                return Err(MergeError::MissingInput(input.to_path_buf()));
            }
            if same_file(input, &output_path).await {
                return Err(MergeError::SameFile(output_path));
            }
        }

        let output = self.mux_into(video, audio, &output_path).await?;

        for input in [video, audio] {
            if self.settings.remove_merged_sources || is_extension_temp(input) {
                match tokio::fs::remove_file(input).await {
                    Ok(()) => debug!(path = %input.display(), "removed merged source"),
                    Err(error) => {
                        warn!(path = %input.display(), %error, "Failed to remove merged source")
                    }
                }
            }
        }

        Ok(output)
    }

    fn output_path(&self, output_filename: Option<&str>) -> Result<PathBuf, MergeError> {
        let name = output_filename.unwrap_or(self.settings.default_output_filename.as_str());
        let name = validate_output_filename(name)?;
        let dir = std::path::absolute(&self.settings.output_dir).map_err(|source| {
            MergeError::OutputDir {
                path: self.settings.output_dir.clone(),
                source,
            }
        })?;
        Ok(dir.join(name))
    }

    fn stage(
        &self,
        role: &'static str,
        suffix: &str,
        contents: &[u8],
    ) -> Result<NamedTempFile, MergeError> {
        let mut builder = tempfile::Builder::new();
        builder.suffix(suffix);
        let file = match &self.settings.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut file = file.map_err(|source| MergeError::TempFile { role, source })?;
        file.write_all(contents)
            .and_then(|()| file.flush())
            .map_err(|source| MergeError::TempFile { role, source })?;
        Ok(file)
    }

    async fn mux_into(
        &self,
        video: &Path,
        audio: &Path,
        output_path: &Path,
    ) -> Result<MergeOutput, MergeError> {
        if let Some(dir) = output_path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| MergeError::OutputDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        self.muxer.run_muxer(video, audio, output_path).await?;

        let metadata =
            tokio::fs::metadata(output_path)
                .await
                .map_err(|source| MergeError::OutputMetadata {
                    path: output_path.to_path_buf(),
                    source,
                })?;
        info!(output = %output_path.display(), size = metadata.len(), "merge complete");
        Ok(MergeOutput {
            path: output_path.to_path_buf(),
            size: metadata.len(),
        })
    }
}

/// Compares resolved paths, falling back to the absolute form while the
/// output does not exist yet.
async fn same_file(input: &Path, output: &Path) -> bool {
    if let (Ok(input), Ok(output)) = (
        tokio::fs::canonicalize(input).await,
        tokio::fs::canonicalize(output).await,
    ) {
        return input == output;
    }
    match (std::path::absolute(input), std::path::absolute(output)) {
        (Ok(input), Ok(output)) => input == output,
        _ => false,
    }
}

fn is_extension_temp(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| EXTENSION_TEMP_STEMS.iter().any(|tag| stem.ends_with(tag)))
}
