use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use crate::channel::{FramedChannel, Message, ProtocolError};
use crate::merge::{MergeOutput, Merger};
use crate::message::{Request, Response};
use crate::muxer::Muxer;

/// Answers requests one at a time; owns nothing but the merger.
pub struct Dispatcher<M> {
    merger: Merger<M>,
}

impl<M: Muxer> Dispatcher<M> {
    pub fn new(merger: Merger<M>) -> Self {
        Self { merger }
    }

    pub fn merger(&self) -> &Merger<M> {
        &self.merger
    }

    /// Read, handle and answer messages until the browser closes the input.
    ///
    /// Only channel failures end the loop early; every request failure is
    /// answered with `success: false`.
    pub async fn serve<R, W>(&self, channel: &mut FramedChannel<R, W>) -> Result<(), ProtocolError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut handled = 0u64;
        while let Some(message) = channel.read_message().await? {
            let response = self.handle(&message).await;
            channel.write_message(&response).await?;
            handled += 1;
        }
        info!(handled, "browser closed the channel");
        Ok(())
    }

    pub async fn handle(&self, message: &Message) -> Response {
        let request = Request::parse(message);
        match request {
            Request::Ping => {
                debug!("ping");
                Response::pong()
            }
            Request::Merge {
                video_data,
                audio_data,
                output_filename,
            } => {
                let (Some(video_data), Some(audio_data)) = (video_data, audio_data) else {
                    warn!("merge request without stream data");
                    return Response::failure("Missing video_data or audio_data");
                };
                self.merge_data(video_data, audio_data, output_filename)
                    .await
            }
            Request::MergeFiles {
                video_path,
                audio_path,
                output_filename,
            } => {
                let (Some(video_path), Some(audio_path)) = (video_path, audio_path) else {
                    warn!("merge_files request without paths");
                    return Response::failure("Missing video_path or audio_path");
                };
                info!(video_path, audio_path, output_filename, "merging files");
                let result = self
                    .merger
                    .merge_files(Path::new(video_path), Path::new(audio_path), output_filename)
                    .await;
                merge_response(result)
            }
            Request::Unknown(action) => {
                warn!(%action, "unknown action");
                Response::failure(format!("Unknown action: {action}"))
            }
        }
    }

    async fn merge_data(
        &self,
        video_data: &str,
        audio_data: &str,
        output_filename: Option<&str>,
    ) -> Response {
        let video = match STANDARD.decode(video_data) {
            Ok(bytes) => bytes,
            Err(error) => {
                return Response::failure(format!("Invalid base64 in video_data: {error}"));
            }
        };
        let audio = match STANDARD.decode(audio_data) {
            Ok(bytes) => bytes,
            Err(error) => {
                return Response::failure(format!("Invalid base64 in audio_data: {error}"));
            }
        };
        info!(
            video_bytes = video.len(),
            audio_bytes = audio.len(),
            output_filename,
            "merging streams"
        );

        let result = self
            .merger
            .merge_bytes(&video, &audio, output_filename)
            .await;
        merge_response(result)
    }
}

fn merge_response(result: Result<MergeOutput, crate::merge::MergeError>) -> Response {
    match result {
        Ok(output) => Response::merged(output.path.display().to_string(), output.size),
        Err(error) => {
            error!(%error, "merge failed");
            Response::failure(error.to_string())
        }
    }
}
