//! External muxing tool.
//!
//! [`FfmpegMuxer`] shells out to `ffmpeg -i <video> -i <audio> -c copy -y
//! <output>` and kills it once the timeout elapses. Anything implementing
//! [`Muxer`] can stand in for it, which is how the dispatcher is tested
//! without a real binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

pub const DEFAULT_MUXER_PROGRAM: &str = "ffmpeg";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Replies to the browser are capped at 1 MiB, so only the end of a noisy
/// stderr is kept.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("Muxer executable '{0}' not found, is FFmpeg installed and on PATH?")]
    NotFound(String),

    #[error("Failed to start muxer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("FFmpeg timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("FFmpeg error: {stderr}")]
    NonZeroExit { status: Option<i32>, stderr: String },
}

/// Combines one video and one audio input into `output` without re-encoding.
pub trait Muxer {
    fn run_muxer(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
    ) -> impl Future<Output = Result<(), MuxError>> + Send;
}

#[derive(Clone, Debug)]
pub struct FfmpegMuxer {
    program: PathBuf,
    timeout: Duration,
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new(DEFAULT_MUXER_PROGRAM, DEFAULT_TIMEOUT)
    }
}

impl FfmpegMuxer {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self, video: &Path, audio: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-c", "copy", "-y"])
            .arg(output)
            // stdout belongs to the browser channel, never let the child inherit it
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Muxer for FfmpegMuxer {
    async fn run_muxer(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MuxError> {
        let program = self.program.display().to_string();
        debug!(
            %program,
            video = %video.display(),
            audio = %audio.display(),
            output = %output.display(),
            "spawning muxer"
        );

        let child = self
            .command(video, audio, output)
            .spawn()
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::NotFound => MuxError::NotFound(program.clone()),
                _ => MuxError::Spawn {
                    program: program.clone(),
                    source,
                },
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output_result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(%program, timeout_secs = self.timeout.as_secs(), "muxer timed out, killed");
                return Err(MuxError::Timeout(self.timeout));
            }
        };
        let finished = output_result.map_err(|source| MuxError::Spawn {
            program: program.clone(),
            source,
        })?;

        if finished.status.success() {
            info!(%program, output = %output.display(), "muxer finished");
            return Ok(());
        }

        let stderr = stderr_tail(&finished.stderr);
        warn!(%program, status = ?finished.status, "muxer exited with failure");
        Err(MuxError::NonZeroExit {
            status: finished.status.code(),
            stderr,
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim_end();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
