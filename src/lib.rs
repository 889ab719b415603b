pub mod channel;
pub mod config;
pub mod dispatch;
pub mod merge;
pub mod message;
pub mod muxer;

use tracing::info;

//
// Re-export
//
pub use channel::{DEFAULT_MAX_MESSAGE_BYTES, FramedChannel, Message, ProtocolError};
pub use config::Config;
pub use dispatch::Dispatcher;
pub use merge::{DEFAULT_OUTPUT_FILENAME, MergeError, MergeOutput, MergeSettings, Merger};
pub use message::{PING_REPLY, Request, Response};
pub use muxer::{FfmpegMuxer, MuxError, Muxer};

/// Serve the browser over this process's stdin/stdout until it disconnects.
pub async fn run(config: Config) -> Result<(), ProtocolError> {
    let settings = config.merge_settings();
    info!(
        caller = ?config.caller,
        ffmpeg = %config.ffmpeg,
        timeout_secs = config.timeout_secs,
        output_dir = %settings.output_dir.display(),
        "native host started"
    );

    let dispatcher = Dispatcher::new(Merger::new(config.muxer(), settings));
    let mut channel = FramedChannel::with_limit(
        tokio::io::stdin(),
        tokio::io::stdout(),
        config.max_message_bytes,
    );
    dispatcher.serve(&mut channel).await
}
