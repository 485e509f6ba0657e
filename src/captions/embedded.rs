//! Caption tracks from the player state the page serializes into its inline scripts.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{CaptionSource, Strategy, select_track, timedtext};
use crate::error::{CaptionError, CaptionResult};
use crate::transcript::{CaptionTrack, Transcript};
use crate::youtube::{Page, extract_json_object};

const PLAYER_RESPONSE_MARKER: &str = "ytInitialPlayerResponse";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
  captions: Option<Captions>,
  video_details: Option<VideoDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Captions {
  player_captions_tracklist_renderer: Option<TracklistRenderer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TracklistRenderer {
  #[serde(default)]
  caption_tracks: Vec<RawTrack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrack {
  base_url: String,
  language_code: String,
  name: Option<Text>,
  kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Text {
  simple_text: Option<String>,
  #[serde(default)]
  runs: Vec<Run>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Run {
  #[serde(default)]
  text: String,
}

impl Text {
  pub(crate) fn flatten(&self) -> String {
    match &self.simple_text {
      Some(s) => s.clone(),
      None => self.runs.iter().map(|r| r.text.as_str()).collect(),
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
  title: Option<String>,
  length_seconds: Option<String>,
}

/// Title and duration as declared by the embedded player state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddedDetails {
  pub title: Option<String>,
  pub length_seconds: Option<f64>,
}

fn player_response(html: &str) -> CaptionResult<PlayerResponse> {
  let object = extract_json_object(html, PLAYER_RESPONSE_MARKER)
    .ok_or_else(|| CaptionError::FetchFailed("Player state not found in page".to_string()))?;
  serde_json::from_str(object).map_err(|e| CaptionError::fetch("invalid player state", e))
}

/// Caption tracks in page order. A page without a `captions` field has none.
pub fn parse_caption_tracks(html: &str) -> CaptionResult<Vec<CaptionTrack>> {
  let response = player_response(html)?;
  let raw = response.captions.and_then(|c| c.player_captions_tracklist_renderer).map(|r| r.caption_tracks);

  let tracks = raw
    .unwrap_or_default()
    .into_iter()
    .filter(|t| !t.language_code.is_empty() && !t.base_url.is_empty())
    .map(|t| {
      let mut label =
        t.name.as_ref().map(Text::flatten).filter(|l| !l.is_empty()).unwrap_or_else(|| t.language_code.clone());
      if t.kind.as_deref() == Some("asr") && !label.to_lowercase().contains("auto-generated") {
        label.push_str(" (auto-generated)");
      }
      CaptionTrack { code: t.language_code, label, source_locator: t.base_url }
    })
    .collect();
  Ok(tracks)
}

/// Title and length from `videoDetails`, if the player state is present.
pub fn parse_details(html: &str) -> Option<EmbeddedDetails> {
  let details = player_response(html).ok()?.video_details?;
  Some(EmbeddedDetails {
    title: details.title.filter(|t| !t.is_empty()),
    length_seconds: details.length_seconds.and_then(|s| s.parse().ok()),
  })
}

/// Reads tracks from the embedded player state, then fetches the chosen track directly.
pub struct EmbeddedState;

#[async_trait]
impl CaptionSource for EmbeddedState {
  fn strategy(&self) -> Strategy {
    Strategy::Embedded
  }

  async fn list_languages(&self, page: &Page) -> CaptionResult<Vec<CaptionTrack>> {
    let html = page.html().await?;
    let tracks = parse_caption_tracks(html)?;
    debug!(video_id = %page.video_id, count = tracks.len(), "embedded: caption tracks parsed");
    Ok(tracks)
  }

  async fn fetch_transcript(&self, page: &Page, code: Option<&str>) -> CaptionResult<Transcript> {
    let tracks = self.list_languages(page).await?;
    let track = select_track(&tracks, code)?;
    timedtext::fetch_track(page, &track.source_locator).await
  }
}
