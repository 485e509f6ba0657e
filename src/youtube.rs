//! The watch page: video id, page title, and the inline script payloads
//! that caption strategies read from.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use url::Url;

use crate::constants::constants;
use crate::error::{CaptionError, CaptionResult};
use crate::fetch::Fetcher;

/// Video state reported to the UI. Recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
  pub video_id: String,
  pub duration: f64,
  pub current_time: f64,
  pub title: String,
}

/// Canonical watch URL for a video id.
pub fn watch_url(video_id: &str) -> String {
  format!("{}{}", constants().watch_url_base, video_id)
}

fn is_video_id(s: &str) -> bool {
  s.len() == 11 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract the video id from a watch URL, a short link, a shorts/embed/live
/// path, or a bare 11-character id.
pub fn parse_video_id(input: &str) -> Option<String> {
  let trimmed = input.trim();
  if is_video_id(trimmed) {
    return Some(trimmed.to_string());
  }

  let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
    trimmed.to_string()
  } else {
    format!("https://{}", trimmed)
  };
  let url = Url::parse(&with_scheme).ok()?;
  let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

  let candidate = match host {
    "youtu.be" => url.path_segments()?.next().map(str::to_string),
    "youtube.com" | "music.youtube.com" | "youtube-nocookie.com" => {
      if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        Some(v.into_owned())
      } else {
        let mut segments = url.path_segments()?;
        match segments.next() {
          Some("shorts" | "embed" | "live" | "v") => segments.next().map(str::to_string),
          _ => None,
        }
      }
    }
    _ => None,
  }?;

  is_video_id(&candidate).then_some(candidate)
}

/// Locate `marker = { … }` in script text and return the balanced JSON object.
///
/// Every occurrence of `marker` is tried, so references such as
/// `window["marker"]` that are not assignments are skipped.
pub fn extract_json_object<'a>(html: &'a str, marker: &str) -> Option<&'a str> {
  let mut from = 0;
  while let Some(pos) = html[from..].find(marker) {
    let after = from + pos + marker.len();
    from = after;

    let rest = html[after..].trim_start_matches(['"', '\'', ']']).trim_start();
    let Some(rest) = rest.strip_prefix('=') else { continue };
    let rest = rest.trim_start();
    if !rest.starts_with('{') {
      continue;
    }
    if let Some(object) = balanced_object(rest) {
      return Some(object);
    }
  }
  None
}

/// Slice from the leading `{` to its matching `}`, ignoring braces inside strings.
fn balanced_object(s: &str) -> Option<&str> {
  let mut depth = 0usize;
  let mut in_string: Option<char> = None;
  let mut escaped = false;

  for (i, c) in s.char_indices() {
    if let Some(quote) = in_string {
      if escaped {
        escaped = false;
      } else if c == '\\' {
        escaped = true;
      } else if c == quote {
        in_string = None;
      }
      continue;
    }
    match c {
      '"' | '\'' => in_string = Some(c),
      '{' => depth += 1,
      '}' => {
        depth = depth.checked_sub(1)?;
        if depth == 0 {
          return Some(&s[..=i]);
        }
      }
      _ => {}
    }
  }
  None
}

/// Read a `"KEY":"value"` string literal out of inline page config.
pub fn extract_config_string(html: &str, key: &str) -> Option<String> {
  let needle = format!("\"{}\":\"", key);
  let start = html.find(&needle)? + needle.len();
  let end = html[start..].find('"')? + start;
  Some(html[start..end].to_string())
}

/// Page `<title>` with the site suffix removed.
pub fn page_title(html: &str) -> Option<String> {
  let open = html.find("<title")?;
  let start = html[open..].find('>')? + open + 1;
  let end = html[start..].find("</title>")? + start;
  let raw = html[start..end].trim();
  let title = quick_xml::escape::unescape(raw).map(|t| t.into_owned()).unwrap_or_else(|_| raw.to_string());
  let title = title.strip_suffix("- YouTube").unwrap_or(&title).trim().to_string();
  (!title.is_empty()).then_some(title)
}

/// One navigation's view of the watch page. The HTML is fetched once, on first
/// use, and lives until the next navigation replaces the `Page`.
pub struct Page {
  pub url: String,
  pub video_id: String,
  fetcher: Arc<dyn Fetcher>,
  html: OnceCell<String>,
}

impl Page {
  pub fn new(url: &str, fetcher: Arc<dyn Fetcher>) -> CaptionResult<Self> {
    let video_id = parse_video_id(url)
      .ok_or_else(|| CaptionError::NotAvailable(format!("Not a YouTube video page: {}", url.trim())))?;
    Ok(Self { url: url.trim().to_string(), video_id, fetcher, html: OnceCell::new() })
  }

  pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
    &self.fetcher
  }

  pub async fn html(&self) -> CaptionResult<&str> {
    let html = self
      .html
      .get_or_try_init(|| async {
        let url = watch_url(&self.video_id);
        let body = self.fetcher.get_text(&url).await?;
        info!(video_id = %self.video_id, bytes = body.len(), "page: watch page loaded");
        Ok::<_, CaptionError>(body)
      })
      .await?;
    Ok(html.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::fake::FakeFetcher;

  #[test]
  fn video_id_from_common_url_shapes() {
    let id = Some("dQw4w9WgXcQ".to_string());
    assert_eq!(parse_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), id);
    assert_eq!(parse_video_id("https://www.youtube.com/watch?list=PL1&v=dQw4w9WgXcQ&t=42s"), id);
    assert_eq!(parse_video_id("youtube.com/watch?v=dQw4w9WgXcQ"), id);
    assert_eq!(parse_video_id("https://youtu.be/dQw4w9WgXcQ?si=abc"), id);
    assert_eq!(parse_video_id("https://m.youtube.com/shorts/dQw4w9WgXcQ"), id);
    assert_eq!(parse_video_id("https://www.youtube.com/embed/dQw4w9WgXcQ"), id);
    assert_eq!(parse_video_id("dQw4w9WgXcQ"), id);
  }

  #[test]
  fn video_id_rejects_non_video_pages() {
    assert_eq!(parse_video_id("https://www.youtube.com/@channel/videos"), None);
    assert_eq!(parse_video_id("https://example.com/watch?v=dQw4w9WgXcQ"), None);
    assert_eq!(parse_video_id("https://www.youtube.com/watch?v=short"), None);
    assert_eq!(parse_video_id(""), None);
  }

  #[test]
  fn json_object_with_braces_inside_strings() {
    let html = r#"<script>var ytInitialPlayerResponse = {"a":"}{","b":{"c":"\"}"}};var next = 1;</script>"#;
    let object = extract_json_object(html, "ytInitialPlayerResponse").unwrap();
    assert_eq!(object, r#"{"a":"}{","b":{"c":"\"}"}}"#);
    let value: serde_json::Value = serde_json::from_str(object).unwrap();
    assert_eq!(value["b"]["c"], "\"}");
  }

  #[test]
  fn json_object_skips_non_assignments() {
    let html = r#"if (window["ytInitialData"]) {} window["ytInitialData"] = {"x":1};"#;
    assert_eq!(extract_json_object(html, "ytInitialData"), Some(r#"{"x":1}"#));
  }

  #[test]
  fn json_object_missing_or_truncated() {
    assert_eq!(extract_json_object("<html></html>", "ytInitialPlayerResponse"), None);
    assert_eq!(extract_json_object("ytInitialPlayerResponse = {\"a\":1", "ytInitialPlayerResponse"), None);
  }

  #[test]
  fn config_string_lookup() {
    let html = r#"ytcfg.set({"INNERTUBE_API_KEY":"AIzaKey","INNERTUBE_CLIENT_VERSION":"2.20240101.00.00"});"#;
    assert_eq!(extract_config_string(html, "INNERTUBE_API_KEY").as_deref(), Some("AIzaKey"));
    assert_eq!(extract_config_string(html, "MISSING"), None);
  }

  #[test]
  fn title_strips_site_suffix_and_entities() {
    let html = "<html><head><title>Rock &amp; Roll - YouTube</title></head></html>";
    assert_eq!(page_title(html).as_deref(), Some("Rock & Roll"));
    assert_eq!(page_title("<title> - YouTube</title>"), None);
    assert_eq!(page_title("<html></html>"), None);
  }

  #[tokio::test]
  async fn page_fetches_html_once() {
    let fetcher = Arc::new(
      FakeFetcher::new().with_page(&watch_url("dQw4w9WgXcQ"), "<title>Never Gonna - YouTube</title>"),
    );
    let page = Page::new("https://youtu.be/dQw4w9WgXcQ", fetcher.clone()).unwrap();
    assert_eq!(page_title(page.html().await.unwrap()).as_deref(), Some("Never Gonna"));
    assert!(page.html().await.is_ok());
    assert_eq!(fetcher.get_count(), 1);
  }

  #[test]
  fn page_requires_a_video_url() {
    let fetcher: Arc<dyn Fetcher> = Arc::new(FakeFetcher::new());
    assert!(matches!(Page::new("https://www.youtube.com/feed/trending", fetcher), Err(CaptionError::NotAvailable(_))));
  }
}
