//! Caption acquisition: one contract, several strategies for reading the host page.
//!
//! Each strategy depends on a different piece of undocumented page structure,
//! so all page-shape knowledge stays inside its own module and everything
//! above this layer only sees `CaptionTrack` and `Transcript`.

pub mod embedded;
pub mod innertube;
pub mod panel;
pub mod timedtext;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CaptionError, CaptionResult};
use crate::transcript::{CaptionTrack, Transcript};
use crate::youtube::Page;

/// Ways of reading captions off the watch page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
  /// Drive the page's interactive transcript panel.
  Panel,
  /// Read caption tracks from the player state embedded in the page.
  Embedded,
  /// Query the timed-text track endpoint directly.
  #[value(name = "timedtext")]
  TimedText,
}

impl Strategy {
  pub const DEFAULT_ORDER: [Strategy; 1] = [Strategy::Embedded];

  pub fn label(self) -> &'static str {
    match self {
      Strategy::Panel => "panel",
      Strategy::Embedded => "embedded",
      Strategy::TimedText => "timedtext",
    }
  }
}

#[async_trait]
pub trait CaptionSource: Send + Sync {
  fn strategy(&self) -> Strategy;

  /// Tracks in the order the page exposes them. May be empty.
  async fn list_languages(&self, page: &Page) -> CaptionResult<Vec<CaptionTrack>>;

  /// Transcript for `code`, or for the first listed track when `code` is `None`.
  async fn fetch_transcript(&self, page: &Page, code: Option<&str>) -> CaptionResult<Transcript>;
}

/// Pick the track for `code` by exact equality; `None` picks the first track.
pub fn select_track<'a>(tracks: &'a [CaptionTrack], code: Option<&str>) -> CaptionResult<&'a CaptionTrack> {
  match code.filter(|c| !c.is_empty()) {
    Some(code) => tracks
      .iter()
      .find(|t| t.code == code)
      .ok_or_else(|| CaptionError::NotAvailable(format!("No transcript available for language '{}'", code))),
    None => tracks
      .first()
      .ok_or_else(|| CaptionError::NotAvailable("This video has no captions".to_string())),
  }
}

/// The configured strategies, tried in order.
pub struct CaptionAdapter {
  sources: Vec<Box<dyn CaptionSource>>,
}

impl CaptionAdapter {
  pub fn new(order: &[Strategy]) -> Self {
    let mut seen = Vec::new();
    let mut sources: Vec<Box<dyn CaptionSource>> = Vec::new();
    for &strategy in order {
      if seen.contains(&strategy) {
        continue;
      }
      seen.push(strategy);
      sources.push(match strategy {
        Strategy::Panel => Box::new(panel::PanelScrape::new(innertube::InnertubeFactory)),
        Strategy::Embedded => Box::new(embedded::EmbeddedState),
        Strategy::TimedText => Box::new(timedtext::TimedTextApi),
      });
    }
    if sources.is_empty() {
      sources.push(Box::new(embedded::EmbeddedState));
    }
    Self { sources }
  }

  #[cfg(test)]
  pub fn from_sources(sources: Vec<Box<dyn CaptionSource>>) -> Self {
    Self { sources }
  }

  pub fn strategies(&self) -> Vec<Strategy> {
    self.sources.iter().map(|s| s.strategy()).collect()
  }

  /// First non-empty listing wins; a strategy error hands over to the next one.
  pub async fn list_languages(&self, page: &Page) -> CaptionResult<Vec<CaptionTrack>> {
    let mut last_err = None;
    let mut listed_empty = false;
    for source in &self.sources {
      match source.list_languages(page).await {
        Ok(tracks) if !tracks.is_empty() => {
          info!(strategy = source.strategy().label(), count = tracks.len(), "captions: languages listed");
          return Ok(tracks);
        }
        Ok(_) => {
          info!(strategy = source.strategy().label(), "captions: no languages");
          listed_empty = true;
        }
        Err(e) => {
          warn!(strategy = source.strategy().label(), kind = e.kind(), err = %e, "captions: listing failed");
          last_err = Some(e);
        }
      }
    }
    match last_err {
      Some(e) if !listed_empty => Err(e),
      _ => Ok(Vec::new()),
    }
  }

  /// Later strategies are only tried for a code their own listing contains,
  /// since each strategy has its own code space.
  pub async fn fetch_transcript(&self, page: &Page, code: Option<&str>) -> CaptionResult<Transcript> {
    let mut last_err = CaptionError::NotAvailable("No caption strategy configured".to_string());
    for (i, source) in self.sources.iter().enumerate() {
      if i > 0
        && let Some(code) = code.filter(|c| !c.is_empty())
        && !lists_code(source.as_ref(), page, code).await
      {
        debug!(strategy = source.strategy().label(), code = %code, "captions: code not listed, skipped");
        continue;
      }
      match source.fetch_transcript(page, code).await {
        Ok(transcript) if !transcript.is_empty() => {
          info!(
            strategy = source.strategy().label(),
            code = code.unwrap_or(""),
            entries = transcript.len(),
            "captions: transcript fetched"
          );
          return Ok(transcript);
        }
        Ok(_) => {
          last_err = CaptionError::NotAvailable("Transcript is empty".to_string());
        }
        Err(e) => {
          warn!(strategy = source.strategy().label(), kind = e.kind(), err = %e, "captions: fetch failed");
          last_err = e;
        }
      }
    }
    Err(last_err)
  }
}

async fn lists_code(source: &dyn CaptionSource, page: &Page, code: &str) -> bool {
  source.list_languages(page).await.is_ok_and(|tracks| tracks.iter().any(|t| t.code == code))
}
