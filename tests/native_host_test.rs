use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use native_muxer::{
    Dispatcher, FramedChannel, MergeSettings, Merger, MuxError, Muxer, ProtocolError, Response,
};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt as _;

/// Stand-in for ffmpeg that always succeeds and writes `output_bytes` bytes.
struct StubMuxer {
    output_bytes: usize,
}

impl Muxer for StubMuxer {
    async fn run_muxer(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MuxError> {
        assert!(video.exists(), "video input must be staged before muxing");
        assert!(audio.exists(), "audio input must be staged before muxing");
        tokio::fs::write(output, vec![7u8; self.output_bytes])
            .await
            .unwrap();
        Ok(())
    }
}

/// Test harness holding isolated download and temp directories
struct TestHost {
    root: tempfile::TempDir,
    dispatcher: Dispatcher<StubMuxer>,
}

impl TestHost {
    fn new(output_bytes: usize) -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("tmp")).unwrap();
        let settings = MergeSettings {
            output_dir: root.path().join("Downloads"),
            temp_dir: Some(root.path().join("tmp")),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(Merger::new(StubMuxer { output_bytes }, settings));
        Self { root, dispatcher }
    }

    fn downloads(&self) -> PathBuf {
        self.root.path().join("Downloads")
    }

    fn temp_entries(&self) -> usize {
        std::fs::read_dir(self.root.path().join("tmp"))
            .unwrap()
            .count()
    }

    /// Feed `requests` through the framed channel and collect every reply.
    async fn exchange(&self, requests: &[Value]) -> (Result<(), ProtocolError>, Vec<Value>) {
        let mut input = Vec::new();
        let mut encoder = FramedChannel::new(tokio::io::empty(), &mut input);
        for request in requests {
            encoder.write_message(request).await.unwrap();
        }

        let mut output = Vec::new();
        let mut channel = FramedChannel::new(input.as_slice(), &mut output);
        let result = self.dispatcher.serve(&mut channel).await;
        drop(channel);

        (result, decode_all(&output).await)
    }
}

async fn decode_all(bytes: &[u8]) -> Vec<Value> {
    let mut decoder = FramedChannel::new(bytes, tokio::io::sink());
    let mut replies = Vec::new();
    while let Some(reply) = decoder.read_message().await.unwrap() {
        replies.push(Value::Object(reply));
    }
    replies
}

#[tokio::test]
async fn test_ping_then_merge_end_to_end() {
    let host = TestHost::new(4096);

    let (result, replies) = host
        .exchange(&[
            json!({"action": "ping"}),
            json!({
                "action": "merge",
                "video_data": STANDARD.encode(vec![1u8; 1000]),
                "audio_data": STANDARD.encode(vec![2u8; 300]),
                "output_filename": "out.mp4",
            }),
        ])
        .await;

    assert!(result.is_ok());
    assert_eq!(replies.len(), 2);
    assert_eq!(
        replies[0],
        json!({"success": true, "message": "Native Host is running"})
    );

    let expected_path = host.downloads().join("out.mp4");
    assert_eq!(
        replies[1],
        json!({
            "success": true,
            "output_path": expected_path.display().to_string(),
            "size": 4096,
        })
    );
    assert_eq!(std::fs::metadata(&expected_path).unwrap().len(), 4096);
    assert_eq!(host.temp_entries(), 0);
}

#[tokio::test]
async fn test_bad_requests_do_not_stop_the_loop() {
    let host = TestHost::new(1);

    let (result, replies) = host
        .exchange(&[
            json!({"action": "merge", "video_data": "AAAA"}),
            json!({"action": "foo"}),
            json!({"action": "merge", "video_data": "%%%", "audio_data": "AAAA"}),
            json!({"action": "ping"}),
        ])
        .await;

    assert!(result.is_ok());
    let replies: Vec<Response> = replies
        .into_iter()
        .map(|reply| serde_json::from_value(reply).unwrap())
        .collect();
    assert_eq!(
        replies[0],
        Response::failure("Missing video_data or audio_data")
    );
    assert_eq!(replies[1], Response::failure("Unknown action: foo"));
    assert!(!replies[2].success);
    assert_eq!(replies[3], Response::pong());
    assert_eq!(host.temp_entries(), 0);
}

#[tokio::test]
async fn test_merge_files_end_to_end() {
    let host = TestHost::new(64);
    let video = host.root.path().join("clip_VIDEO_TEMP.mp4");
    let audio = host.root.path().join("clip_AUDIO_TEMP.m4a");
    std::fs::write(&video, b"video").unwrap();
    std::fs::write(&audio, b"audio").unwrap();

    let (result, replies) = host
        .exchange(&[json!({
            "action": "merge_files",
            "video_path": video.display().to_string(),
            "audio_path": audio.display().to_string(),
            "output_filename": "clip.mp4",
        })])
        .await;

    assert!(result.is_ok());
    assert_eq!(replies[0]["success"], true);
    assert_eq!(replies[0]["size"], 64);
    assert!(host.downloads().join("clip.mp4").exists());
    assert!(!video.exists());
    assert!(!audio.exists());
}

#[tokio::test]
async fn test_corrupt_frame_ends_the_loop_after_earlier_replies() {
    let host = TestHost::new(1);

    let garbage = b"{oops";
    let mut input = Vec::new();
    let mut encoder = FramedChannel::new(tokio::io::empty(), &mut input);
    encoder.write_message(&json!({"action": "ping"})).await.unwrap();
    let (_, input) = encoder.into_inner();
    input.extend_from_slice(&(garbage.len() as u32).to_ne_bytes());
    input.extend_from_slice(garbage);
    // never answered, the channel is abandoned at the corrupt frame
    let mut encoder = FramedChannel::new(tokio::io::empty(), &mut *input);
    encoder.write_message(&json!({"action": "ping"})).await.unwrap();

    let mut output = Vec::new();
    let mut channel = FramedChannel::new(input.as_slice(), &mut output);
    let result = host.dispatcher.serve(&mut channel).await;
    drop(channel);

    assert!(matches!(result, Err(ProtocolError::InvalidJson(_))));
    let replies = decode_all(&output).await;
    assert_eq!(
        replies,
        [json!({"success": true, "message": "Native Host is running"})]
    );
}

#[tokio::test]
async fn test_interactive_exchange_over_duplex() {
    let host = TestHost::new(1);
    let (client_io, host_io) = tokio::io::duplex(64 * 1024);
    let (host_read, host_write) = tokio::io::split(host_io);
    let (client_read, client_write) = tokio::io::split(client_io);

    let server = async {
        let mut channel = FramedChannel::new(host_read, host_write);
        host.dispatcher.serve(&mut channel).await
    };

    let client = async {
        let mut channel = FramedChannel::new(client_read, client_write);
        channel.write_message(&json!({"action": "ping"})).await.unwrap();
        let first = channel.read_message().await.unwrap().unwrap();

        channel
            .write_message(&json!({"action": "merge"}))
            .await
            .unwrap();
        let second = channel.read_message().await.unwrap().unwrap();

        // closing our write side is how the browser disconnects
        let (reader, mut writer) = channel.into_inner();
        writer.shutdown().await.unwrap();
        drop(reader);
        (first, second)
    };

    let (served, (first, second)) = tokio::join!(server, client);
    assert!(served.is_ok());
    assert_eq!(first["success"], true);
    assert_eq!(first["message"], "Native Host is running");
    assert_eq!(second["error"], "Missing video_data or audio_data");
}
