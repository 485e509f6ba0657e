//! `PanelDriver` backed by the watch page's transcript panel endpoint.
//!
//! Opening the panel on the page issues a `get_transcript` call with the
//! parameters embedded in the page's initial data; the response carries both
//! the rendered segments and the language menu, whose items each hold the
//! continuation that re-renders the panel in that language. This driver
//! keeps the same panel/menu state machine the page does.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use super::embedded::Text;
use super::panel::{PanelDriver, PanelFactory, PanelOption, PanelSegment};
use crate::constants::constants;
use crate::error::{CaptionError, CaptionResult};
use crate::fetch::Fetcher;
use crate::timestamp;
use crate::youtube::{Page, extract_config_string, extract_json_object};

const FALLBACK_CLIENT_VERSION: &str = "2.20240101.00.00";

/// Depth-first search for the first value stored under `key`.
fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
  match value {
    Value::Object(map) => map.get(key).or_else(|| map.values().find_map(|v| find_key(v, key))),
    Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
    _ => None,
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentRenderer {
  start_ms: Option<String>,
  start_time_text: Option<Text>,
  snippet: Option<Text>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MenuItem {
  title: Option<String>,
  #[serde(default)]
  selected: bool,
  continuation: Option<MenuContinuation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MenuContinuation {
  reload_continuation_data: Option<ReloadData>,
}

#[derive(Debug, Deserialize)]
struct ReloadData {
  continuation: String,
}

/// What one rendering of the panel shows.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RenderedPanel {
  pub segments: Vec<PanelSegment>,
  pub options: Vec<PanelOption>,
  pub selected: Option<String>,
}

/// Read segments and the language menu out of a `get_transcript` response.
pub fn parse_panel_response(response: &Value) -> CaptionResult<RenderedPanel> {
  let list = find_key(response, "transcriptSegmentListRenderer")
    .ok_or_else(|| CaptionError::NotAvailable("Transcript panel is empty".to_string()))?;

  let segments = list
    .get("initialSegments")
    .and_then(Value::as_array)
    .map(|items| {
      items
        .iter()
        .filter_map(|item| item.get("transcriptSegmentRenderer"))
        .filter_map(|raw| serde_json::from_value::<SegmentRenderer>(raw.clone()).ok())
        .filter_map(|seg| {
          let text = seg.snippet.as_ref().map(Text::flatten)?;
          let stamp = seg.start_time_text.as_ref().map(Text::flatten).filter(|s| timestamp::parse(s).is_some());
          let stamp = stamp.or_else(|| {
            let ms: f64 = seg.start_ms.as_deref()?.parse().ok()?;
            Some(timestamp::format(ms / 1000.0))
          })?;
          Some(PanelSegment { timestamp: stamp, text })
        })
        .collect()
    })
    .unwrap_or_default();

  let mut options = Vec::new();
  let mut selected = None;
  if let Some(items) = find_key(response, "transcriptFooterRenderer")
    .and_then(|footer| find_key(footer, "subMenuItems"))
    .and_then(Value::as_array)
  {
    for raw in items {
      let Ok(item) = serde_json::from_value::<MenuItem>(raw.clone()) else { continue };
      let Some(value) = item.continuation.and_then(|c| c.reload_continuation_data).map(|r| r.continuation) else {
        continue;
      };
      if item.selected {
        selected = Some(value.clone());
      }
      options.push(PanelOption { value, label: item.title.unwrap_or_default() });
    }
  }

  Ok(RenderedPanel { segments, options, selected })
}

/// Where to call and with what, as read from the page.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelEndpoint {
  pub url: String,
  pub client_version: String,
  pub params: Option<String>,
}

/// Discover the transcript endpoint parameters in the watch page.
pub fn discover_endpoint(html: &str) -> PanelEndpoint {
  let base = &constants().innertube_transcript_url;
  let url = match extract_config_string(html, "INNERTUBE_API_KEY") {
    Some(key) => format!("{}?key={}&prettyPrint=false", base, key),
    None => format!("{}?prettyPrint=false", base),
  };
  let client_version =
    extract_config_string(html, "INNERTUBE_CLIENT_VERSION").unwrap_or_else(|| FALLBACK_CLIENT_VERSION.to_string());
  let params = extract_json_object(html, "ytInitialData")
    .and_then(|object| serde_json::from_str::<Value>(object).ok())
    .and_then(|data| {
      find_key(&data, "getTranscriptEndpoint")
        .and_then(|endpoint| endpoint.get("params"))
        .and_then(Value::as_str)
        .map(str::to_string)
    });
  PanelEndpoint { url, client_version, params }
}

pub struct InnertubePanel {
  fetcher: Arc<dyn Fetcher>,
  endpoint: PanelEndpoint,
  panel_open: bool,
  menu_open: bool,
  rendered: RenderedPanel,
  tx: watch::Sender<u64>,
}

impl InnertubePanel {
  pub fn new(fetcher: Arc<dyn Fetcher>, endpoint: PanelEndpoint) -> Self {
    let (tx, _rx) = watch::channel(0);
    Self { fetcher, endpoint, panel_open: false, menu_open: false, rendered: RenderedPanel::default(), tx }
  }

  fn bump(&self) {
    self.tx.send_modify(|v| *v = v.wrapping_add(1));
  }

  async fn render(&self, params: &str) -> CaptionResult<RenderedPanel> {
    let body = json!({
      "context": { "client": { "clientName": "WEB", "clientVersion": self.endpoint.client_version } },
      "params": params,
    });
    let response = self.fetcher.post_json(&self.endpoint.url, &body).await?;
    parse_panel_response(&response)
  }
}

#[async_trait]
impl PanelDriver for InnertubePanel {
  async fn open_panel(&mut self) -> CaptionResult<()> {
    let params = self
      .endpoint
      .params
      .clone()
      .ok_or_else(|| CaptionError::ElementNotFound("This video has no transcript panel".to_string()))?;
    let rendered = self.render(&params).await?;
    debug!(segments = rendered.segments.len(), options = rendered.options.len(), "innertube: panel rendered");
    self.rendered = rendered;
    self.panel_open = true;
    self.bump();
    Ok(())
  }

  async fn close_panel(&mut self) {
    self.panel_open = false;
    self.menu_open = false;
    self.bump();
  }

  async fn open_language_menu(&mut self) -> CaptionResult<()> {
    if !self.panel_open || self.rendered.options.is_empty() {
      return Err(CaptionError::ElementNotFound("Transcript language selector not found".to_string()));
    }
    self.menu_open = true;
    self.bump();
    Ok(())
  }

  async fn close_language_menu(&mut self) {
    self.menu_open = false;
    self.bump();
  }

  async fn choose_option(&mut self, value: &str) -> CaptionResult<()> {
    if !self.menu_open {
      return Err(CaptionError::ElementNotFound("Transcript language menu is not open".to_string()));
    }
    let mut rendered = self.render(value).await?;
    if rendered.selected.is_none() {
      rendered.selected = Some(value.to_string());
    }
    info!(options = rendered.options.len(), "innertube: transcript language switched");
    self.rendered = rendered;
    self.menu_open = false;
    self.bump();
    Ok(())
  }

  fn panel_open(&self) -> bool {
    self.panel_open
  }

  fn menu_open(&self) -> bool {
    self.menu_open
  }

  fn language_options(&self) -> Vec<PanelOption> {
    if self.menu_open { self.rendered.options.clone() } else { Vec::new() }
  }

  fn selected_option(&self) -> Option<String> {
    self.rendered.selected.clone()
  }

  fn segments(&self) -> Vec<PanelSegment> {
    if self.panel_open { self.rendered.segments.clone() } else { Vec::new() }
  }

  fn changes(&self) -> watch::Receiver<u64> {
    self.tx.subscribe()
  }
}

/// Attaches an `InnertubePanel` to the page's endpoint parameters.
pub struct InnertubeFactory;

#[async_trait]
impl PanelFactory for InnertubeFactory {
  async fn attach(&self, page: &Page) -> CaptionResult<Box<dyn PanelDriver>> {
    let endpoint = discover_endpoint(page.html().await?);
    Ok(Box::new(InnertubePanel::new(Arc::clone(page.fetcher()), endpoint)))
  }
}
