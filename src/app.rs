use anyhow::Result;
use ratatui::widgets::ListState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::AgentHandle;
use crate::config::Config;
use crate::constants::constants;
use crate::error::CaptionResult;
use crate::player::MpvPlayer;
use crate::protocol::{Request, Response};
use crate::search;
use crate::theme::THEMES;
use crate::transcript::{LanguageOption, Transcript, TranscriptEntry, is_rtl};
use crate::youtube::{VideoMetadata, parse_video_id};

type Reply = oneshot::Receiver<CaptionResult<Response>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
  /// Typing a video URL.
  Url,
  /// Typing a transcript query.
  Query,
  Results,
  Languages,
}

/// In-flight agent requests, polled each tick.
#[derive(Default)]
pub(crate) struct Pending {
  video: Option<Reply>,
  refresh: Option<Reply>,
  languages: Option<Reply>,
  transcript: Option<Reply>,
  /// Language the pending transcript was requested for.
  transcript_code: String,
  seek: Option<Reply>,
}

pub struct App {
  pub agent: AgentHandle,
  pub player: MpvPlayer,
  autoplay: bool,
  prefs_path: Option<PathBuf>,
  pub mode: AppMode,
  pub theme_index: usize,
  pub url_input: String,
  pub url_cursor: usize,
  pub query: String,
  pub query_cursor: usize,
  pub input_scroll: usize,
  pub video: Option<VideoMetadata>,
  pub languages: Vec<LanguageOption>,
  pub language_state: ListState,
  /// Empty means the video's default track.
  pub selected_language: String,
  pub transcript: Option<(String, Arc<Transcript>)>,
  pub results: Vec<TranscriptEntry>,
  pub list_state: ListState,
  pub last_error: Option<String>,
  pub status_message: Option<String>,
  pub should_quit: bool,
  preferred_language: Option<String>,
  config: Config,
  search_deadline: Option<Instant>,
  search_on_transcript: bool,
  next_refresh: Option<Instant>,
  error_time: Option<Instant>,
  pub(crate) pending: Pending,
}

fn spawn_request(agent: &AgentHandle, request: Request) -> Reply {
  let agent = agent.clone();
  let (tx, rx) = oneshot::channel();
  tokio::spawn(async move {
    let _ = tx.send(agent.request(request).await);
  });
  rx
}

/// Poll a reply slot. `Some` once the reply (or its loss) is in.
fn poll_reply(slot: &mut Option<Reply>) -> Option<Result<Response, String>> {
  let mut rx = slot.take()?;
  match rx.try_recv() {
    Ok(Ok(response)) => Some(response.into_result()),
    Ok(Err(e)) => Some(Err(e.to_string())),
    Err(oneshot::error::TryRecvError::Empty) => {
      *slot = Some(rx);
      None
    }
    Err(oneshot::error::TryRecvError::Closed) => Some(Err("Request task failed.".to_string())),
  }
}

impl App {
  pub fn new(agent: AgentHandle, player: MpvPlayer, config: Config) -> Self {
    let theme_index =
      if let Some(ref name) = config.theme_name { THEMES.iter().position(|t| t.name == name).unwrap_or(0) } else { 0 };

    Self {
      agent,
      player,
      autoplay: false,
      prefs_path: None,
      mode: AppMode::Url,
      theme_index,
      url_input: String::new(),
      url_cursor: 0,
      query: String::new(),
      query_cursor: 0,
      input_scroll: 0,
      video: None,
      languages: Vec::new(),
      language_state: ListState::default(),
      selected_language: String::new(),
      transcript: None,
      results: Vec::new(),
      list_state: ListState::default(),
      last_error: None,
      status_message: None,
      should_quit: false,
      preferred_language: config.preferred_language.clone().filter(|l| !l.is_empty()),
      config,
      search_deadline: None,
      search_on_transcript: false,
      next_refresh: None,
      error_time: None,
      pending: Pending::default(),
    }
  }

  /// Start mpv on every opened video.
  pub fn with_autoplay(mut self, autoplay: bool) -> Self {
    self.autoplay = autoplay;
    self
  }

  /// Persist theme and language choices to `path`.
  pub fn with_prefs(mut self, path: Option<PathBuf>) -> Self {
    self.prefs_path = path;
    self
  }

  pub fn theme(&self) -> &'static crate::theme::Theme {
    // theme_index is kept in range by next_theme() and new().
    &THEMES[self.theme_index]
  }

  /// Set an error message. Its dismissal clock starts once it is on screen.
  pub fn set_error(&mut self, msg: String) {
    self.last_error = Some(msg);
    self.error_time = None;
  }

  /// The current error was drawn; start counting down to its dismissal.
  pub fn mark_error_shown(&mut self) {
    if self.last_error.is_some() && self.error_time.is_none() {
      self.error_time = Some(Instant::now());
    }
  }

  pub fn clear_error(&mut self) {
    self.last_error = None;
    self.error_time = None;
  }

  /// Clear errors that have been on screen for a few seconds.
  pub fn expire_error(&mut self) {
    if let Some(t) = self.error_time
      && t.elapsed() >= Duration::from_secs(constants().error_dismiss_secs)
    {
      self.last_error = None;
      self.error_time = None;
    }
  }

  fn save_config(&self) {
    let Some(path) = &self.prefs_path else { return };
    let config = Config {
      theme_name: Some(self.theme().name.to_string()),
      preferred_language: self.preferred_language.clone(),
      ..self.config.clone()
    };
    config.save_to(path);
  }

  pub fn next_theme(&mut self) {
    self.theme_index = (self.theme_index + 1) % THEMES.len();
    self.save_config();
  }

  /// Whether results should be laid out right-to-left.
  pub fn is_rtl(&self) -> bool {
    let code = match &self.transcript {
      Some((code, _)) if !code.is_empty() => code.as_str(),
      _ if !self.selected_language.is_empty() => self.selected_language.as_str(),
      _ => self.languages.first().map(|l| l.code.as_str()).unwrap_or(""),
    };
    is_rtl(code, &constants().rtl_language_prefixes)
  }

  /// Code behind a language picker row. Row 0 is the video's default track.
  pub fn picker_code(&self, row: usize) -> Option<&str> {
    match row {
      0 => Some(""),
      i => self.languages.get(i - 1).map(|l| l.code.as_str()),
    }
  }

  /// Picker row of the selected language.
  fn picker_row(&self) -> usize {
    self.languages.iter().position(|l| l.code == self.selected_language).map_or(0, |i| i + 1)
  }

  pub fn preferred_language(&self) -> Option<&str> {
    self.preferred_language.as_deref()
  }

  /// Label of the picker's first row, which asks for the page's own default track.
  pub fn default_language_label(&self) -> String {
    match self.languages.first() {
      Some(first) => format!("Default ({})", first.label),
      None => "Default".to_string(),
    }
  }

  pub fn selected_language_label(&self) -> String {
    if self.selected_language.is_empty() {
      return self.default_language_label();
    }
    self
      .languages
      .iter()
      .find(|l| l.code == self.selected_language)
      .map(|l| l.label.clone())
      .unwrap_or_else(|| self.selected_language.clone())
  }

  // --- Video ---

  /// Point the agent at a new video page and start over.
  pub async fn open_video(&mut self, url: &str) {
    let url = url.trim().to_string();
    if parse_video_id(&url).is_none() {
      self.set_error("Please open a YouTube video".to_string());
      return;
    }
    info!(url = %url, "app: opening video");
    self.clear_error();
    self.pending = Pending::default();
    self.video = None;
    self.languages.clear();
    self.language_state.select(None);
    self.selected_language.clear();
    self.transcript = None;
    self.results.clear();
    self.list_state.select(None);
    self.search_on_transcript = false;
    self.next_refresh = None;

    self.agent.navigate(&url);
    if self.autoplay
      && let Err(e) = self.player.play(&url).await
    {
      self.set_error(format!("Playback error: {:#}", e));
      if let Err(e) = self.player.stop().await {
        warn!(err = %e, "app: could not stop mpv after playback error");
      }
    }

    self.status_message = Some("Loading video…".to_string());
    self.pending.video = Some(spawn_request(&self.agent, Request::GetVideoInfo));
    self.mode = AppMode::Query;
  }

  // --- Language ---

  /// Switch transcript language. The old transcript and any reply still on
  /// its way are discarded before anything is searched again.
  pub fn select_language(&mut self, code: &str) {
    let preferred = (!code.is_empty()).then(|| code.to_string());
    if preferred != self.preferred_language {
      self.preferred_language = preferred;
      self.save_config();
    }
    if code == self.selected_language && (self.transcript.is_some() || self.pending.transcript.is_some()) {
      return;
    }
    info!(code = %code, "app: language selected");
    self.selected_language = code.to_string();
    self.language_state.select(Some(self.picker_row()));
    self.transcript = None;
    self.pending.transcript = None;
    self.results.clear();
    self.list_state.select(None);
    self.search_on_transcript = !self.query.trim().is_empty();
    self.request_transcript();
  }

  fn request_transcript(&mut self) {
    if self.pending.transcript.is_some() && self.pending.transcript_code == self.selected_language {
      return;
    }
    let code = self.selected_language.clone();
    let language_code = (!code.is_empty()).then(|| code.clone());
    self.status_message = Some("Loading transcript…".to_string());
    self.pending.transcript = Some(spawn_request(&self.agent, Request::GetTranscript { language_code }));
    self.pending.transcript_code = code;
  }

  // --- Search ---

  /// The query changed; search once typing pauses.
  pub fn query_changed(&mut self) {
    self.search_deadline = Some(Instant::now() + constants().search_debounce());
  }

  pub fn run_search(&mut self) {
    self.search_deadline = None;
    let query = self.query.trim();
    if query.is_empty() {
      self.results.clear();
      self.list_state.select(None);
      return;
    }
    let Some((_, transcript)) = &self.transcript else {
      self.search_on_transcript = true;
      self.request_transcript();
      return;
    };
    self.results = search::search(transcript, query).into_iter().cloned().collect();
    debug!(query = %query, matches = self.results.len(), "app: searched");
    self.list_state.select(if self.results.is_empty() { None } else { Some(0) });
  }

  /// Seek the player to the selected result.
  pub fn seek_selected(&mut self) {
    let Some(entry) = self.list_state.selected().and_then(|i| self.results.get(i)) else { return };
    let time = entry.time;
    self.clear_error();
    self.pending.seek = Some(spawn_request(&self.agent, Request::SeekTo { time }));
  }

  // --- Polling ---

  /// Time-driven work: debounced search, metadata refresh, error expiry.
  pub fn tick(&mut self) {
    self.expire_error();
    if self.search_deadline.is_some_and(|d| Instant::now() >= d) {
      self.run_search();
    }
    if self.video.is_some()
      && self.pending.refresh.is_none()
      && self.next_refresh.is_none_or(|t| Instant::now() >= t)
    {
      self.next_refresh = Some(Instant::now() + Duration::from_millis(constants().metadata_refresh_ms));
      self.pending.refresh = Some(spawn_request(&self.agent, Request::GetVideoInfo));
    }
  }

  pub async fn check_pending(&mut self) -> Result<()> {
    if let Some(result) = poll_reply(&mut self.pending.video) {
      self.status_message = None;
      match result {
        Ok(response) => {
          self.video = response.video;
          self.next_refresh = Some(Instant::now() + Duration::from_millis(constants().metadata_refresh_ms));
          self.pending.languages = Some(spawn_request(&self.agent, Request::GetAvailableLanguages));
          self.request_transcript();
        }
        Err(e) => {
          warn!(err = %e, "app: video info failed");
          self.set_error(e);
        }
      }
    }

    if let Some(result) = poll_reply(&mut self.pending.refresh) {
      match result {
        Ok(response) if response.video.is_some() => self.video = response.video,
        Ok(_) => {}
        Err(e) => debug!(err = %e, "app: metadata refresh failed"),
      }
    }

    if let Some(result) = poll_reply(&mut self.pending.languages) {
      match result {
        Ok(response) => {
          self.languages = response.languages.unwrap_or_default();
          self.language_state.select(Some(self.picker_row()));
          if self.selected_language.is_empty()
            && let Some(preferred) = self.preferred_language.clone()
            && self.languages.iter().any(|l| l.code == preferred)
          {
            self.select_language(&preferred);
          }
        }
        Err(e) => self.set_error(format!("Could not load languages: {}", e)),
      }
    }

    if let Some(result) = poll_reply(&mut self.pending.transcript) {
      let code = std::mem::take(&mut self.pending.transcript_code);
      self.status_message = None;
      if code != self.selected_language {
        debug!(code = %code, selected = %self.selected_language, "app: stale transcript dropped");
      } else {
        match result {
          Ok(response) => {
            let transcript = response.transcript.unwrap_or_default();
            info!(code = %code, entries = transcript.len(), "app: transcript loaded");
            self.transcript = Some((code, Arc::new(transcript)));
            if std::mem::take(&mut self.search_on_transcript) || !self.query.trim().is_empty() {
              self.run_search();
            }
          }
          Err(e) => {
            self.search_on_transcript = false;
            self.set_error(e);
          }
        }
      }
    }

    if let Some(result) = poll_reply(&mut self.pending.seek)
      && let Err(e) = result
    {
      self.set_error(format!("Could not jump: {}", e));
    }

    Ok(())
  }

  pub fn is_loading(&self) -> bool {
    self.pending.video.is_some() || self.pending.transcript.is_some()
  }
}
