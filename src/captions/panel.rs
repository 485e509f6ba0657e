//! Transcript extraction by driving the page's own transcript panel.
//!
//! The panel mutates asynchronously after every interaction and gives no
//! completion signal of its own. Instead of sleeping a fixed time, each step
//! waits on the driver's change notifications until the expected state is
//! observed, bounded by a timeout, and fails explicitly when it is not.
//!
//! Panel interactions are serialized: concurrent manipulation of the same
//! panel leaves it in an undefined state. Menu and panel are closed again on
//! every exit path once they have been attached.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use super::{CaptionSource, Strategy};
use crate::constants::constants;
use crate::error::{CaptionError, CaptionResult};
use crate::timestamp;
use crate::transcript::{CaptionTrack, Transcript, TranscriptEntry};
use crate::youtube::Page;

/// One entry of the panel's language chooser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelOption {
  /// The option's data value; used as the language code.
  pub value: String,
  pub label: String,
}

/// One rendered transcript segment, as displayed (`"1:23"`, `"text"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSegment {
  pub timestamp: String,
  pub text: String,
}

/// Interactive transcript panel on the host page.
///
/// Actions (`open_*`, `close_*`, `choose_option`) only *request* a change;
/// the state accessors reflect the page once it has caught up, and every
/// state change bumps the `changes()` counter.
#[async_trait]
pub trait PanelDriver: Send + Sync {
  async fn open_panel(&mut self) -> CaptionResult<()>;
  async fn close_panel(&mut self);
  async fn open_language_menu(&mut self) -> CaptionResult<()>;
  async fn close_language_menu(&mut self);
  async fn choose_option(&mut self, value: &str) -> CaptionResult<()>;

  fn panel_open(&self) -> bool;
  fn menu_open(&self) -> bool;
  fn language_options(&self) -> Vec<PanelOption>;
  fn selected_option(&self) -> Option<String>;
  fn segments(&self) -> Vec<PanelSegment>;

  fn changes(&self) -> watch::Receiver<u64>;
}

/// Attaches a `PanelDriver` to a loaded page.
#[async_trait]
pub trait PanelFactory: Send + Sync {
  async fn attach(&self, page: &Page) -> CaptionResult<Box<dyn PanelDriver>>;
}

/// Wait until `ready` holds, re-checking after every change notification.
pub async fn settle<F>(driver: &dyn PanelDriver, what: &str, timeout: Duration, ready: F) -> CaptionResult<()>
where
  F: Fn(&dyn PanelDriver) -> bool,
{
  let mut changes = driver.changes();
  let wait = async {
    loop {
      if ready(driver) {
        return Ok(());
      }
      if changes.changed().await.is_err() {
        return Err(CaptionError::ElementNotFound(format!("{} disappeared", what)));
      }
    }
  };
  match tokio::time::timeout(timeout, wait).await {
    Ok(result) => result,
    Err(_) => {
      warn!(what, timeout_ms = timeout.as_millis() as u64, "panel: settle timed out");
      Err(CaptionError::ElementNotFound(format!("Timed out waiting for {}", what)))
    }
  }
}

/// Close whatever is still open, leaving the page as it was found.
async fn restore(driver: &mut dyn PanelDriver) {
  if driver.menu_open() {
    driver.close_language_menu().await;
  }
  if driver.panel_open() {
    driver.close_panel().await;
  }
}

fn segments_to_transcript(segments: Vec<PanelSegment>) -> Transcript {
  let total = segments.len();
  let entries: Transcript = segments
    .into_iter()
    .filter_map(|s| {
      let time = timestamp::parse(&s.timestamp)?;
      let text = s.text.trim();
      (!text.is_empty()).then(|| TranscriptEntry::new(time, text))
    })
    .collect();
  if entries.len() < total {
    debug!(skipped = total - entries.len(), "panel: skipped unreadable segments");
  }
  entries
}

async fn open_panel(driver: &mut dyn PanelDriver) -> CaptionResult<()> {
  driver.open_panel().await?;
  settle(driver, "transcript panel", constants().panel_open_timeout(), |d| d.panel_open()).await
}

async fn open_menu(driver: &mut dyn PanelDriver) -> CaptionResult<()> {
  driver.open_language_menu().await?;
  settle(driver, "language menu", constants().menu_open_timeout(), |d| d.menu_open()).await
}

async fn read_languages(driver: &mut dyn PanelDriver) -> CaptionResult<Vec<CaptionTrack>> {
  open_panel(driver).await?;
  if let Err(e) = open_menu(driver).await {
    info!(err = %e, "panel: no language menu");
    return Ok(Vec::new());
  }
  let tracks = driver
    .language_options()
    .into_iter()
    .filter(|o| !o.label.is_empty() && !o.label.contains("Off"))
    .map(|o| CaptionTrack { code: o.value.clone(), label: o.label, source_locator: o.value })
    .collect();
  Ok(tracks)
}

async fn read_transcript(driver: &mut dyn PanelDriver, code: Option<&str>) -> CaptionResult<Transcript> {
  open_panel(driver).await?;

  if let Some(code) = code.filter(|c| !c.is_empty()) {
    open_menu(driver).await?;
    let option = driver
      .language_options()
      .into_iter()
      .find(|o| o.value == code)
      .ok_or_else(|| CaptionError::NotAvailable(format!("No transcript available for language '{}'", code)))?;
    driver.choose_option(&option.value).await?;
    let wanted = option.value.clone();
    settle(driver, "language switch", constants().language_switch_timeout(), move |d| {
      d.selected_option().as_deref() == Some(wanted.as_str()) && !d.segments().is_empty()
    })
    .await?;
  } else {
    settle(driver, "transcript segments", constants().panel_open_timeout(), |d| !d.segments().is_empty()).await?;
  }

  let transcript = segments_to_transcript(driver.segments());
  if transcript.is_empty() {
    return Err(CaptionError::NotAvailable("No transcript segments found".to_string()));
  }
  Ok(transcript)
}

/// Panel-scrape strategy over any `PanelFactory`.
pub struct PanelScrape<F> {
  factory: F,
  gate: Mutex<()>,
}

impl<F: PanelFactory> PanelScrape<F> {
  pub fn new(factory: F) -> Self {
    Self { factory, gate: Mutex::new(()) }
  }
}

#[async_trait]
impl<F: PanelFactory> CaptionSource for PanelScrape<F> {
  fn strategy(&self) -> Strategy {
    Strategy::Panel
  }

  async fn list_languages(&self, page: &Page) -> CaptionResult<Vec<CaptionTrack>> {
    let _gate = self.gate.lock().await;
    let mut driver = self.factory.attach(page).await?;
    let result = read_languages(driver.as_mut()).await;
    restore(driver.as_mut()).await;
    result
  }

  async fn fetch_transcript(&self, page: &Page, code: Option<&str>) -> CaptionResult<Transcript> {
    let _gate = self.gate.lock().await;
    let mut driver = self.factory.attach(page).await?;
    let result = read_transcript(driver.as_mut(), code).await;
    restore(driver.as_mut()).await;
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::Fetcher;
  use crate::fetch::fake::FakeFetcher;
  use std::sync::{Arc, Mutex as StdMutex};

  /// Simulated page panel that applies each action after `delay`, like a DOM
  /// updating on its own schedule.
  #[derive(Default)]
  struct PanelState {
    panel_open: bool,
    menu_open: bool,
    selected: Option<String>,
    segments: Vec<PanelSegment>,
    opens: usize,
  }

  #[derive(Clone)]
  struct Behaviour {
    has_button: bool,
    has_menu: bool,
    panel_reacts: bool,
    delay: Duration,
    options: Vec<(PanelOption, Vec<PanelSegment>)>,
  }

  struct FakePanel {
    state: Arc<StdMutex<PanelState>>,
    tx: Arc<watch::Sender<u64>>,
    behaviour: Behaviour,
  }

  impl FakePanel {
    fn later(&self, apply: impl FnOnce(&mut PanelState) + Send + 'static) {
      let state = Arc::clone(&self.state);
      let tx = Arc::clone(&self.tx);
      let delay = self.behaviour.delay;
      tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        apply(&mut state.lock().unwrap());
        tx.send_modify(|v| *v += 1);
      });
    }

    fn now(&self, apply: impl FnOnce(&mut PanelState)) {
      apply(&mut self.state.lock().unwrap());
      self.tx.send_modify(|v| *v += 1);
    }
  }

  #[async_trait]
  impl PanelDriver for FakePanel {
    async fn open_panel(&mut self) -> CaptionResult<()> {
      if !self.behaviour.has_button {
        return Err(CaptionError::ElementNotFound("No 'Show transcript' button".to_string()));
      }
      self.state.lock().unwrap().opens += 1;
      if self.behaviour.panel_reacts {
        let first = self.behaviour.options.first().cloned();
        self.later(move |s| {
          s.panel_open = true;
          if let Some((option, segments)) = first {
            s.selected = Some(option.value);
            s.segments = segments;
          }
        });
      }
      Ok(())
    }

    async fn close_panel(&mut self) {
      self.now(|s| {
        s.panel_open = false;
        s.menu_open = false;
      });
    }

    async fn open_language_menu(&mut self) -> CaptionResult<()> {
      if !self.behaviour.has_menu {
        return Err(CaptionError::ElementNotFound("No language selector".to_string()));
      }
      self.later(|s| s.menu_open = true);
      Ok(())
    }

    async fn close_language_menu(&mut self) {
      self.now(|s| s.menu_open = false);
    }

    async fn choose_option(&mut self, value: &str) -> CaptionResult<()> {
      let (option, segments) = self
        .behaviour
        .options
        .iter()
        .find(|(o, _)| o.value == value)
        .cloned()
        .ok_or_else(|| CaptionError::NotAvailable(value.to_string()))?;
      self.later(move |s| {
        s.menu_open = false;
        s.selected = Some(option.value);
        s.segments = segments;
      });
      Ok(())
    }

    fn panel_open(&self) -> bool {
      self.state.lock().unwrap().panel_open
    }

    fn menu_open(&self) -> bool {
      self.state.lock().unwrap().menu_open
    }

    fn language_options(&self) -> Vec<PanelOption> {
      self.behaviour.options.iter().map(|(o, _)| o.clone()).collect()
    }

    fn selected_option(&self) -> Option<String> {
      self.state.lock().unwrap().selected.clone()
    }

    fn segments(&self) -> Vec<PanelSegment> {
      let s = self.state.lock().unwrap();
      if s.panel_open { s.segments.clone() } else { Vec::new() }
    }

    fn changes(&self) -> watch::Receiver<u64> {
      self.tx.subscribe()
    }
  }

  struct FakeFactory {
    state: Arc<StdMutex<PanelState>>,
    behaviour: Behaviour,
  }

  #[async_trait]
  impl PanelFactory for FakeFactory {
    async fn attach(&self, _page: &Page) -> CaptionResult<Box<dyn PanelDriver>> {
      let (tx, _rx) = watch::channel(0);
      Ok(Box::new(FakePanel { state: Arc::clone(&self.state), tx: Arc::new(tx), behaviour: self.behaviour.clone() }))
    }
  }

  fn option(value: &str, label: &str) -> PanelOption {
    PanelOption { value: value.to_string(), label: label.to_string() }
  }

  fn seg(ts: &str, text: &str) -> PanelSegment {
    PanelSegment { timestamp: ts.to_string(), text: text.to_string() }
  }

  fn behaviour() -> Behaviour {
    Behaviour {
      has_button: true,
      has_menu: true,
      panel_reacts: true,
      delay: Duration::from_millis(300),
      options: vec![
        (option("en", "English"), vec![seg("0:01", "hello"), seg("1:02:03", " world "), seg("bad", "dropped")]),
        (option("es", "Spanish"), vec![seg("0:02", "hola")]),
        (option("off", "Off"), vec![]),
      ],
    }
  }

  fn scrape(behaviour: Behaviour) -> (PanelScrape<FakeFactory>, Arc<StdMutex<PanelState>>) {
    let state = Arc::new(StdMutex::new(PanelState::default()));
    (PanelScrape::new(FakeFactory { state: Arc::clone(&state), behaviour }), state)
  }

  fn page() -> Page {
    let fetcher: Arc<dyn Fetcher> = Arc::new(FakeFetcher::new());
    Page::new("dQw4w9WgXcQ", fetcher).unwrap()
  }

  fn assert_restored(state: &Arc<StdMutex<PanelState>>) {
    let s = state.lock().unwrap();
    assert!(!s.panel_open, "panel left open");
    assert!(!s.menu_open, "menu left open");
  }

  #[tokio::test(start_paused = true)]
  async fn lists_languages_without_off_and_restores() {
    let (source, state) = scrape(behaviour());
    let tracks = source.list_languages(&page()).await.unwrap();
    let labels: Vec<&str> = tracks.iter().map(|t| t.label.as_str()).collect();
    assert_eq!(labels, vec!["English", "Spanish"]);
    assert_eq!(tracks[1].code, "es");
    assert_restored(&state);
  }

  #[tokio::test(start_paused = true)]
  async fn default_transcript_uses_displayed_segments() {
    let (source, state) = scrape(behaviour());
    let transcript = source.fetch_transcript(&page(), None).await.unwrap();
    assert_eq!(transcript, vec![TranscriptEntry::new(1.0, "hello"), TranscriptEntry::new(3723.0, "world")]);
    assert_restored(&state);
  }

  #[tokio::test(start_paused = true)]
  async fn switches_language_by_exact_value() {
    let (source, state) = scrape(behaviour());
    let transcript = source.fetch_transcript(&page(), Some("es")).await.unwrap();
    assert_eq!(transcript, vec![TranscriptEntry::new(2.0, "hola")]);
    assert_restored(&state);

    let err = source.fetch_transcript(&page(), Some("Spanish")).await.unwrap_err();
    assert!(matches!(err, CaptionError::NotAvailable(_)));
    assert_restored(&state);
  }

  #[tokio::test(start_paused = true)]
  async fn missing_menu_lists_nothing_and_closes_panel() {
    let (source, state) = scrape(Behaviour { has_menu: false, ..behaviour() });
    assert!(source.list_languages(&page()).await.unwrap().is_empty());
    assert_restored(&state);
  }

  #[tokio::test(start_paused = true)]
  async fn missing_button_is_element_not_found() {
    let (source, state) = scrape(Behaviour { has_button: false, ..behaviour() });
    let err = source.fetch_transcript(&page(), None).await.unwrap_err();
    assert!(matches!(err, CaptionError::ElementNotFound(_)));
    assert_restored(&state);
  }

  #[tokio::test(start_paused = true)]
  async fn unresponsive_panel_times_out_explicitly() {
    let (source, state) = scrape(Behaviour { panel_reacts: false, ..behaviour() });
    let err = source.fetch_transcript(&page(), None).await.unwrap_err();
    assert_eq!(err, CaptionError::ElementNotFound("Timed out waiting for transcript panel".to_string()));
    assert_restored(&state);
  }

  #[tokio::test(start_paused = true)]
  async fn slow_panel_beyond_bound_fails() {
    let (source, _state) = scrape(Behaviour { delay: Duration::from_millis(5000), ..behaviour() });
    let err = source.list_languages(&page()).await.unwrap_err();
    assert!(matches!(err, CaptionError::ElementNotFound(_)));
  }

  #[tokio::test(start_paused = true)]
  async fn concurrent_scrapes_are_serialized() {
    let (source, state) = scrape(behaviour());
    let page = page();
    let (a, b) = tokio::join!(source.fetch_transcript(&page, Some("en")), source.fetch_transcript(&page, Some("es")));
    assert_eq!(a.unwrap()[0].text, "hello");
    assert_eq!(b.unwrap()[0].text, "hola");
    assert_eq!(state.lock().unwrap().opens, 2);
    assert_restored(&state);
  }
}
