use serde::{Deserialize, Serialize};

/// Sentinel store key used when no language code was supplied.
pub const DEFAULT_LANGUAGE_KEY: &str = "default";

/// One timestamped line of spoken-word text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
  /// Offset from the start of the video, in seconds.
  pub time: f64,
  pub text: String,
}

impl TranscriptEntry {
  pub fn new(time: f64, text: impl Into<String>) -> Self {
    Self { time, text: text.into() }
  }
}

/// Entries in source order (non-decreasing time as delivered by the page).
pub type Transcript = Vec<TranscriptEntry>;

/// A single language's caption data source for a video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTrack {
  /// Language identifier, compared by exact equality.
  pub code: String,
  /// Human-readable name shown in the language picker.
  pub label: String,
  /// Opaque locator used by the owning strategy to fetch the track
  /// (a track URL, a timedtext language, or a panel option value).
  pub source_locator: String,
}

/// The `{code, label}` pair sent across the agent boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageOption {
  pub code: String,
  pub label: String,
}

impl From<&CaptionTrack> for LanguageOption {
  fn from(track: &CaptionTrack) -> Self {
    Self { code: track.code.clone(), label: track.label.clone() }
  }
}

/// Map a requested language code onto a store key (`""`/`None` → default).
pub fn language_key(code: Option<&str>) -> String {
  match code.map(str::trim) {
    Some(c) if !c.is_empty() => c.to_string(),
    _ => DEFAULT_LANGUAGE_KEY.to_string(),
  }
}

/// Whether a language code belongs to a right-to-left script.
pub fn is_rtl(code: &str, rtl_prefixes: &[String]) -> bool {
  let code = code.to_lowercase();
  !code.is_empty() && rtl_prefixes.iter().any(|p| code.starts_with(p.as_str()))
}
