//! The page agent: owns the current page and answers action-addressed requests.
//!
//! One loop receives requests and URL changes. Each request is handled on its
//! own task against the page context that was current when it arrived, and
//! every request gets exactly one reply. A URL change cancels the old
//! context, so acquisitions still running for it resolve as `NotAvailable`
//! and never reach the new page's store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::captions::CaptionAdapter;
use crate::captions::embedded;
use crate::constants::constants;
use crate::error::{CaptionError, CaptionResult};
use crate::fetch::Fetcher;
use crate::player::MediaElement;
use crate::protocol::{Request, Response};
use crate::store::TranscriptStore;
use crate::transcript::{CaptionTrack, LanguageOption};
use crate::youtube::{Page, VideoMetadata, page_title};

fn navigated_away() -> CaptionError {
  CaptionError::NotAvailable("Page navigated away".to_string())
}

/// Everything tied to one navigation.
struct PageContext {
  page: Page,
  languages: OnceCell<Vec<CaptionTrack>>,
  cancel: watch::Sender<bool>,
}

impl PageContext {
  fn new(page: Page) -> Self {
    let (cancel, _) = watch::channel(false);
    Self { page, languages: OnceCell::new(), cancel }
  }

  /// Run `fut` unless and until this context is cancelled.
  async fn guarded<T>(&self, fut: impl Future<Output = CaptionResult<T>>) -> CaptionResult<T> {
    let mut cancelled = self.cancel.subscribe();
    if *cancelled.borrow_and_update() {
      return Err(navigated_away());
    }
    tokio::select! {
      result = fut => result,
      _ = cancelled.changed() => Err(navigated_away()),
    }
  }
}

struct Envelope {
  request: Request,
  reply: oneshot::Sender<Response>,
}

/// Shared services every handler task needs.
#[derive(Clone)]
struct Services {
  adapter: Arc<CaptionAdapter>,
  store: Arc<TranscriptStore>,
  media: Arc<dyn MediaElement>,
}

pub struct PageAgent {
  fetcher: Arc<dyn Fetcher>,
  services: Services,
  current_url: String,
  current: Result<Arc<PageContext>, CaptionError>,
}

impl PageAgent {
  pub fn new(fetcher: Arc<dyn Fetcher>, adapter: CaptionAdapter, media: Arc<dyn MediaElement>) -> Self {
    Self {
      fetcher,
      services: Services { adapter: Arc::new(adapter), store: Arc::new(TranscriptStore::new()), media },
      current_url: String::new(),
      current: Err(CaptionError::Unreachable("Please open a YouTube video".to_string())),
    }
  }

  /// Start the agent loop. `url` is the page it starts on, if any.
  pub fn spawn(self, url: Option<&str>) -> AgentHandle {
    let (tx, rx) = mpsc::channel(32);
    let (nav_tx, nav_rx) = watch::channel(url.unwrap_or_default().to_string());
    tokio::spawn(self.run(rx, nav_rx));
    AgentHandle { tx, nav: Arc::new(nav_tx), timeout: constants().request_timeout() }
  }

  async fn run(mut self, mut rx: mpsc::Receiver<Envelope>, mut nav_rx: watch::Receiver<String>) {
    let initial = nav_rx.borrow_and_update().clone();
    self.navigate(&initial);

    loop {
      // URL changes first, so requests sent after a navigation see the new page.
      tokio::select! {
        biased;
        changed = nav_rx.changed() => {
          if changed.is_err() {
            break;
          }
          let url = nav_rx.borrow_and_update().clone();
          self.navigate(&url);
        }
        msg = rx.recv() => {
          let Some(Envelope { request, reply }) = msg else { break };
          self.dispatch(request, reply);
        }
      }
    }
    if let Ok(ctx) = &self.current {
      ctx.cancel.send_replace(true);
    }
    debug!("agent: stopped");
  }

  fn navigate(&mut self, url: &str) {
    let url = url.trim();
    if url == self.current_url {
      return;
    }
    if let Ok(old) = &self.current {
      old.cancel.send_replace(true);
    }
    self.services.store.invalidate();
    self.current_url = url.to_string();

    self.current = if url.is_empty() {
      Err(CaptionError::Unreachable("Please open a YouTube video".to_string()))
    } else {
      Page::new(url, Arc::clone(&self.fetcher)).map(|page| Arc::new(PageContext::new(page)))
    };
    match &self.current {
      Ok(ctx) => info!(video_id = %ctx.page.video_id, "agent: navigated"),
      Err(e) => info!(url = %url, err = %e, "agent: not a video page"),
    }
  }

  fn dispatch(&mut self, request: Request, reply: oneshot::Sender<Response>) {
    debug!(action = request.action(), "agent: request");
    if let Request::Navigate { url } = &request {
      self.navigate(url);
      let _ = reply.send(Response::ok());
      return;
    }

    let services = self.services.clone();
    let ctx = self.current.clone();
    tokio::spawn(async move {
      let action = request.action();
      let response = match handle(&services, ctx, request).await {
        Ok(response) => response,
        Err(e) => {
          warn!(action, kind = e.kind(), err = %e, "agent: request failed");
          Response::from(e)
        }
      };
      if reply.send(response).is_err() {
        debug!(action, "agent: requester went away");
      }
    });
  }
}

async fn handle(
  services: &Services,
  ctx: Result<Arc<PageContext>, CaptionError>,
  request: Request,
) -> CaptionResult<Response> {
  match request {
    Request::SeekTo { time } => {
      services.media.seek(time).await?;
      Ok(Response::ok())
    }
    Request::GetVideoInfo => {
      let ctx = ctx?;
      Ok(Response::video(video_info(&ctx, services.media.as_ref()).await?))
    }
    Request::GetAvailableLanguages => {
      let ctx = ctx?;
      let tracks = ctx.guarded(languages(&ctx, &services.adapter)).await?;
      Ok(Response::languages(tracks.iter().map(LanguageOption::from).collect()))
    }
    Request::GetTranscript { language_code } => {
      let ctx = ctx?;
      let code = language_code.filter(|c| !c.trim().is_empty());
      let fetch = {
        let ctx = Arc::clone(&ctx);
        let adapter = Arc::clone(&services.adapter);
        let code = code.clone();
        async move { ctx.guarded(adapter.fetch_transcript(&ctx.page, code.as_deref())).await }
      };
      let transcript = services.store.get_or_fetch(&ctx.page.video_id, code.as_deref(), fetch).await?;
      Ok(Response::transcript(transcript.as_ref().clone()))
    }
    Request::Navigate { .. } => Ok(Response::ok()),
  }
}

async fn languages<'a>(ctx: &'a PageContext, adapter: &CaptionAdapter) -> CaptionResult<&'a Vec<CaptionTrack>> {
  ctx.languages.get_or_try_init(|| adapter.list_languages(&ctx.page)).await
}

/// Metadata from the media element where it is playing, else from the page.
async fn video_info(ctx: &PageContext, media: &dyn MediaElement) -> CaptionResult<VideoMetadata> {
  let html = ctx.page.html().await;
  let state = media.state().await.ok();
  if let (Err(e), None) = (&html, &state) {
    return Err(e.clone());
  }

  let html = html.ok();
  let details = html.and_then(embedded::parse_details).unwrap_or_default();
  let state = state.unwrap_or_default();
  let duration = if state.duration > 0.0 { state.duration } else { details.length_seconds.unwrap_or(0.0).max(0.0) };
  let title = state.title.or(details.title).or_else(|| html.and_then(page_title)).unwrap_or_default();

  Ok(VideoMetadata {
    video_id: ctx.page.video_id.clone(),
    duration,
    current_time: if duration > 0.0 { state.current_time.min(duration) } else { state.current_time },
    title,
  })
}

/// Sending side of the agent boundary. Cheap to clone.
#[derive(Clone)]
pub struct AgentHandle {
  tx: mpsc::Sender<Envelope>,
  nav: Arc<watch::Sender<String>>,
  timeout: Duration,
}

impl AgentHandle {
  /// Send one request and wait for its reply. Only delivery failures are
  /// errors here; handler failures arrive as an unsuccessful `Response`.
  pub async fn request(&self, request: Request) -> CaptionResult<Response> {
    let action = request.action();
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Envelope { request, reply })
      .await
      .map_err(|_| CaptionError::Unreachable("Could not reach the page agent".to_string()))?;

    match tokio::time::timeout(self.timeout, rx).await {
      Ok(Ok(response)) => Ok(response),
      Ok(Err(_)) => Err(CaptionError::Unreachable("The page agent dropped the request".to_string())),
      Err(_) => {
        warn!(action, timeout_ms = self.timeout.as_millis() as u64, "agent: request timed out");
        Err(CaptionError::Unreachable("The page did not respond".to_string()))
      }
    }
  }

  /// Like `request`, with delivery failures folded into the response.
  pub async fn call(&self, request: Request) -> Response {
    self.request(request).await.unwrap_or_else(Response::from)
  }

  /// Report a URL change to the agent's navigation watcher.
  pub fn navigate(&self, url: &str) {
    self.nav.send_replace(url.to_string());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::captions::{CaptionSource, Strategy, select_track};
  use crate::fetch::fake::FakeFetcher;
  use crate::player::MpvSocket;
  use crate::player::fake::FakeMedia;
  use crate::transcript::{Transcript, TranscriptEntry};
  use crate::youtube::watch_url;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};

  const VIDEO: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
  const OTHER: &str = "https://www.youtube.com/watch?v=9bZkp7q19f0";

  const EN_URL: &str = "https://www.youtube.com/api/timedtext?v=dQw4w9WgXcQ&lang=en";
  const ES_URL: &str = "https://www.youtube.com/api/timedtext?v=dQw4w9WgXcQ&lang=es";

  fn watch_html() -> String {
    format!(
      r#"<title>Demo - YouTube</title><script>var ytInitialPlayerResponse = {{
"videoDetails":{{"title":"Demo","lengthSeconds":"212"}},
"captions":{{"playerCaptionsTracklistRenderer":{{"captionTracks":[
{{"baseUrl":"{}","name":{{"simpleText":"English"}},"languageCode":"en"}},
{{"baseUrl":"{}","name":{{"simpleText":"Spanish"}},"languageCode":"es"}}]}}}}}};</script>"#,
      EN_URL, ES_URL
    )
  }

  fn fetcher() -> Arc<dyn Fetcher> {
    Arc::new(
      FakeFetcher::new()
        .with_page(&watch_url("dQw4w9WgXcQ"), &watch_html())
        .with_page(EN_URL, r#"<transcript><text start="5">Hello World</text></transcript>"#)
        .with_page(ES_URL, r#"<transcript><text start="1">Hola</text><text start="3">Mundo</text></transcript>"#),
    )
  }

  fn agent(media: Arc<dyn MediaElement>) -> AgentHandle {
    PageAgent::new(fetcher(), CaptionAdapter::new(&[Strategy::Embedded]), media).spawn(Some(VIDEO))
  }

  #[tokio::test]
  async fn languages_and_transcripts_over_the_boundary() {
    let handle = agent(Arc::new(MpvSocket::default()));

    let languages = handle.call(Request::GetAvailableLanguages).await;
    assert!(languages.success);
    let codes: Vec<_> = languages.languages.unwrap().into_iter().map(|l| l.code).collect();
    assert_eq!(codes, vec!["en", "es"]);

    let es = handle.call(Request::GetTranscript { language_code: Some("es".to_string()) }).await;
    assert_eq!(es.transcript, Some(vec![TranscriptEntry::new(1.0, "Hola"), TranscriptEntry::new(3.0, "Mundo")]));

    let default = handle.call(Request::GetTranscript { language_code: None }).await;
    assert_eq!(default.transcript, Some(vec![TranscriptEntry::new(5.0, "Hello World")]));

    let fr = handle.call(Request::GetTranscript { language_code: Some("fr".to_string()) }).await;
    assert!(!fr.success);
    assert_eq!(fr.error.as_deref(), Some("No transcript available for language 'fr'"));
  }

  #[tokio::test]
  async fn seek_without_player_is_element_not_found() {
    let handle = agent(Arc::new(MpvSocket::default()));
    let response = handle.call(Request::SeekTo { time: 125.0 }).await;
    assert_eq!(response, Response::failure("No video player found"));
  }

  #[tokio::test]
  async fn seek_and_video_info_with_player() {
    let media = Arc::new(FakeMedia::new(300.0, "Playing Title"));
    let handle = agent(media.clone());
    assert!(handle.call(Request::SeekTo { time: 125.0 }).await.success);
    assert_eq!(*media.seeks.lock().unwrap(), vec![125.0]);

    let info = handle.call(Request::GetVideoInfo).await.video.unwrap();
    assert_eq!(
      info,
      VideoMetadata {
        video_id: "dQw4w9WgXcQ".to_string(),
        duration: 300.0,
        current_time: 125.0,
        title: "Playing Title".to_string()
      }
    );
  }

  #[tokio::test]
  async fn video_info_falls_back_to_page() {
    let handle = agent(Arc::new(MpvSocket::default()));
    let info = handle.call(Request::GetVideoInfo).await.video.unwrap();
    assert_eq!(info.title, "Demo");
    assert_eq!(info.duration, 212.0);
    assert_eq!(info.current_time, 0.0);
  }

  #[tokio::test]
  async fn not_a_video_page() {
    let media: Arc<dyn MediaElement> = Arc::new(MpvSocket::default());
    let handle = PageAgent::new(fetcher(), CaptionAdapter::new(&[]), media).spawn(None);
    let response = handle.call(Request::GetVideoInfo).await;
    assert_eq!(response.error.as_deref(), Some("Please open a YouTube video"));

    handle.call(Request::Navigate { url: "https://www.youtube.com/feed/trending".to_string() }).await;
    assert!(!handle.call(Request::GetAvailableLanguages).await.success);

    handle.call(Request::Navigate { url: VIDEO.to_string() }).await;
    assert!(handle.call(Request::GetVideoInfo).await.success);
  }

  #[tokio::test]
  async fn gone_agent_is_unreachable() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let (nav, _) = watch::channel(String::new());
    let handle = AgentHandle { tx, nav: Arc::new(nav), timeout: Duration::from_secs(1) };
    assert!(matches!(handle.request(Request::GetVideoInfo).await, Err(CaptionError::Unreachable(_))));
  }

  #[tokio::test(start_paused = true)]
  async fn silent_agent_is_unreachable() {
    let (tx, mut rx) = mpsc::channel::<Envelope>(1);
    let held = tokio::spawn(async move {
      let envelope = rx.recv().await;
      tokio::time::sleep(Duration::from_secs(3600)).await;
      drop(envelope);
    });
    let (nav, _) = watch::channel(String::new());
    let handle = AgentHandle { tx, nav: Arc::new(nav), timeout: Duration::from_secs(15) };
    let response = handle.call(Request::GetVideoInfo).await;
    assert_eq!(response.error.as_deref(), Some("The page did not respond"));
    held.abort();
  }

  /// Lists one track and takes a long time to produce its transcript.
  struct Slow {
    fetches: Arc<AtomicUsize>,
  }

  #[async_trait]
  impl CaptionSource for Slow {
    fn strategy(&self) -> Strategy {
      Strategy::TimedText
    }

    async fn list_languages(&self, page: &Page) -> CaptionResult<Vec<CaptionTrack>> {
      Ok(vec![CaptionTrack { code: "en".to_string(), label: page.video_id.clone(), source_locator: String::new() }])
    }

    async fn fetch_transcript(&self, page: &Page, code: Option<&str>) -> CaptionResult<Transcript> {
      let tracks = self.list_languages(page).await?;
      select_track(&tracks, code)?;
      self.fetches.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_secs(5)).await;
      Ok(vec![TranscriptEntry::new(0.0, format!("from {}", page.video_id))])
    }
  }

  #[tokio::test(start_paused = true)]
  async fn navigation_cancels_in_flight_work() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let adapter = CaptionAdapter::from_sources(vec![Box::new(Slow { fetches: fetches.clone() })]);
    let handle = PageAgent::new(fetcher(), adapter, Arc::new(MpvSocket::default())).spawn(Some(VIDEO));

    let labels = handle.call(Request::GetAvailableLanguages).await.languages.unwrap();
    assert_eq!(labels[0].label, "dQw4w9WgXcQ");

    let pending = {
      let handle = handle.clone();
      tokio::spawn(async move { handle.call(Request::GetTranscript { language_code: None }).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.navigate(OTHER);

    let stale = pending.await.unwrap();
    assert_eq!(stale.error.as_deref(), Some("Page navigated away"));

    let labels = handle.call(Request::GetAvailableLanguages).await.languages.unwrap();
    assert_eq!(labels[0].label, "9bZkp7q19f0");
    let fresh = handle.call(Request::GetTranscript { language_code: None }).await;
    assert_eq!(fresh.transcript, Some(vec![TranscriptEntry::new(0.0, "from 9bZkp7q19f0")]));
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
  }
}
