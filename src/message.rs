use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::Message;

pub const PING_REPLY: &str = "Native Host is running";

/// Reply record sent back for every request.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn pong() -> Self {
        Self {
            success: true,
            message: Some(PING_REPLY.to_string()),
            ..Default::default()
        }
    }

    pub fn merged(output_path: String, size: u64) -> Self {
        Self {
            success: true,
            output_path: Some(output_path),
            size: Some(size),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Decoded request, borrowing its fields from the raw message.
#[derive(Debug, PartialEq, Eq)]
pub enum Request<'a> {
    Ping,
    Merge {
        video_data: Option<&'a str>,
        audio_data: Option<&'a str>,
        output_filename: Option<&'a str>,
    },
    MergeFiles {
        video_path: Option<&'a str>,
        audio_path: Option<&'a str>,
        output_filename: Option<&'a str>,
    },
    /// Carries the printable form of the unrecognised `action` value.
    Unknown(String),
}

impl<'a> Request<'a> {
    pub fn parse(message: &'a Message) -> Self {
        match message.get("action") {
            Some(Value::String(action)) => match action.as_str() {
                "ping" => Request::Ping,
                "merge" => Request::Merge {
                    video_data: non_empty_str(message, "video_data"),
                    audio_data: non_empty_str(message, "audio_data"),
                    output_filename: non_empty_str(message, "output_filename"),
                },
                "merge_files" => Request::MergeFiles {
                    video_path: non_empty_str(message, "video_path"),
                    audio_path: non_empty_str(message, "audio_path"),
                    output_filename: non_empty_str(message, "output_filename"),
                },
                other => Request::Unknown(other.to_string()),
            },
            Some(other) => Request::Unknown(other.to_string()),
            None => Request::Unknown(Value::Null.to_string()),
        }
    }
}

/// Empty strings and non-string values count as absent.
fn non_empty_str<'a>(message: &'a Message, key: &str) -> Option<&'a str> {
    message
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}
