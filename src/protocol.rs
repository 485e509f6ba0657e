//! Request/response shapes crossing the agent boundary.
//!
//! Requests are addressed by an `action` field; every request gets exactly one
//! `Response`, failures included, so errors never cross the boundary as panics.

use serde::{Deserialize, Serialize};

use crate::error::CaptionError;
use crate::transcript::{LanguageOption, Transcript};
use crate::youtube::VideoMetadata;

pub const UNKNOWN_ACTION: &str = "Unknown action";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
  GetVideoInfo,
  SeekTo {
    time: f64,
  },
  GetAvailableLanguages,
  GetTranscript {
    #[serde(default, rename = "languageCode", skip_serializing_if = "Option::is_none")]
    language_code: Option<String>,
  },
  /// The page URL changed.
  Navigate {
    url: String,
  },
}

impl Request {
  /// Parse one request line. `None` means it names no known action.
  pub fn parse(line: &str) -> Option<Self> {
    serde_json::from_str(line).ok()
  }

  pub fn action(&self) -> &'static str {
    match self {
      Request::GetVideoInfo => "getVideoInfo",
      Request::SeekTo { .. } => "seekTo",
      Request::GetAvailableLanguages => "getAvailableLanguages",
      Request::GetTranscript { .. } => "getTranscript",
      Request::Navigate { .. } => "navigate",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub languages: Option<Vec<LanguageOption>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub transcript: Option<Transcript>,
  #[serde(flatten)]
  pub video: Option<VideoMetadata>,
}

impl Response {
  pub fn ok() -> Self {
    Self { success: true, ..Self::default() }
  }

  pub fn failure(message: impl Into<String>) -> Self {
    Self { success: false, error: Some(message.into()), ..Self::default() }
  }

  pub fn unknown_action() -> Self {
    Self::failure(UNKNOWN_ACTION)
  }

  pub fn video(metadata: VideoMetadata) -> Self {
    Self { video: Some(metadata), ..Self::ok() }
  }

  pub fn languages(languages: Vec<LanguageOption>) -> Self {
    Self { languages: Some(languages), ..Self::ok() }
  }

  pub fn transcript(transcript: Transcript) -> Self {
    Self { transcript: Some(transcript), ..Self::ok() }
  }

  /// Back to a typed error on the calling side.
  pub fn into_result(self) -> Result<Self, String> {
    if self.success { Ok(self) } else { Err(self.error.unwrap_or_else(|| "Unknown error".to_string())) }
  }
}

impl From<CaptionError> for Response {
  fn from(err: CaptionError) -> Self {
    Self::failure(err.to_string())
  }
}
