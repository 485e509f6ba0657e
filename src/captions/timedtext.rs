//! Timed-text track documents: listing, direct fetch, and XML parsing.
//!
//! Track text arrives in inconsistent shapes. Entities may be escaped once or
//! twice, and some payloads are additionally percent-encoded. The decoding
//! rule used here:
//!
//! 1. XML entities are unescaped by the reader.
//! 2. If the result still contains an entity reference (`&#39;`, `&amp;`),
//!    it is unescaped once more; unknown entities leave the text untouched.
//! 3. Percent-decoding applies only when the text contains at least one `%XX`
//!    escape, every `%` in it starts a valid `%XX` escape, and the decoded bytes
//!    are valid UTF-8. So `Hello%20World` decodes while `100% sure` stays.

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;
use tracing::debug;
use url::Url;

use super::{CaptionSource, Strategy, select_track};
use crate::constants::constants;
use crate::error::{CaptionError, CaptionResult};
use crate::transcript::{CaptionTrack, Transcript, TranscriptEntry};
use crate::youtube::Page;

/// True when every `%` in `text` begins a `%XX` hex escape and there is at least one.
fn needs_percent_decoding(text: &str) -> bool {
  let bytes = text.as_bytes();
  let mut found = false;
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'%' {
      let valid = bytes.len() > i + 2 && bytes[i + 1].is_ascii_hexdigit() && bytes[i + 2].is_ascii_hexdigit();
      if !valid {
        return false;
      }
      found = true;
      i += 3;
    } else {
      i += 1;
    }
  }
  found
}

/// Apply the percent-decoding rule from the module docs.
pub fn decode_text(text: &str) -> Cow<'_, str> {
  if !needs_percent_decoding(text) {
    return Cow::Borrowed(text);
  }
  match percent_decode_str(text).decode_utf8() {
    Ok(decoded) => decoded,
    Err(_) => Cow::Borrowed(text),
  }
}

/// Second entity pass for double-escaped payloads (`&amp;#39;` → `&#39;` → `'`).
fn unescape_leftover_entities(text: String) -> String {
  if !(text.contains('&') && text.contains(';')) {
    return text;
  }
  match quick_xml::escape::unescape(&text) {
    Ok(unescaped) => unescaped.into_owned(),
    Err(_) => text,
  }
}

fn normalize_text(raw: &str) -> String {
  let text = unescape_leftover_entities(raw.to_string());
  let text = decode_text(&text).into_owned();
  text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attr_f64(e: &BytesStart, name: &str) -> Option<f64> {
  let attr = e.try_get_attribute(name).ok()??;
  let value = attr.unescape_value().ok()?;
  value.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

fn attr_string(e: &BytesStart, name: &str) -> Option<String> {
  let attr = e.try_get_attribute(name).ok()??;
  attr.unescape_value().ok().map(|v| v.trim().to_string())
}

/// Start time of a cue element: `<text start="s">` (seconds) or `<p t="ms">` (srv3).
fn cue_start(e: &BytesStart) -> Option<f64> {
  match e.name().as_ref() {
    b"text" => attr_f64(e, "start"),
    b"p" => attr_f64(e, "t").map(|ms| ms / 1000.0),
    _ => None,
  }
}

/// Parse a timed-text document into entries, in document order.
pub fn parse_track_xml(xml: &str) -> CaptionResult<Transcript> {
  let mut reader = Reader::from_str(xml);
  let mut entries = Vec::new();
  let mut current: Option<(f64, String)> = None;

  loop {
    match reader.read_event() {
      Ok(Event::Start(e)) => {
        if let Some(start) = cue_start(&e) {
          current = Some((start, String::new()));
        }
      }
      Ok(Event::Empty(e)) => {
        if e.name().as_ref() == b"br"
          && let Some((_, ref mut text)) = current
        {
          text.push(' ');
        }
      }
      Ok(Event::Text(e)) => {
        if let Some((_, ref mut text)) = current {
          match e.unescape() {
            Ok(t) => text.push_str(&t),
            Err(_) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
          }
        }
      }
      Ok(Event::CData(e)) => {
        if let Some((_, ref mut text)) = current {
          text.push_str(&String::from_utf8_lossy(&e.into_inner()));
        }
      }
      Ok(Event::End(e)) => {
        if matches!(e.name().as_ref(), b"text" | b"p")
          && let Some((time, raw)) = current.take()
        {
          let text = normalize_text(&raw);
          if !text.is_empty() {
            entries.push(TranscriptEntry { time, text });
          }
        }
      }
      Ok(Event::Eof) => break,
      Ok(_) => {}
      Err(e) => return Err(CaptionError::fetch("invalid track XML", e)),
    }
  }

  if entries.is_empty() {
    return Err(CaptionError::NotAvailable("Caption track has no transcript entries".to_string()));
  }
  Ok(entries)
}

/// Fetch a track document by URL and parse it.
pub async fn fetch_track(page: &Page, locator: &str) -> CaptionResult<Transcript> {
  let url = if locator.starts_with('/') { format!("https://www.youtube.com{}", locator) } else { locator.to_string() };
  let xml = page.fetcher().get_text(&url).await?;
  debug!(bytes = xml.len(), "timedtext: track document fetched");
  parse_track_xml(&xml)
}

/// Parse a `type=list` document into tracks for `video_id`.
pub fn parse_track_list(xml: &str, video_id: &str) -> CaptionResult<Vec<CaptionTrack>> {
  let mut reader = Reader::from_str(xml);
  let mut tracks = Vec::new();
  let base = &constants().timedtext_base;

  loop {
    match reader.read_event() {
      Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"track" => {
        let Some(code) = attr_string(&e, "lang_code").filter(|c| !c.is_empty()) else { continue };
        let name = attr_string(&e, "name").unwrap_or_default();
        let language = attr_string(&e, "lang_translated")
          .or_else(|| attr_string(&e, "lang_original"))
          .filter(|l| !l.is_empty())
          .unwrap_or_else(|| code.clone());
        let label = if name.is_empty() { language } else { format!("{} ({})", language, name) };

        let mut params = vec![("v", video_id), ("lang", code.as_str())];
        if !name.is_empty() {
          params.push(("name", name.as_str()));
        }
        let url = Url::parse_with_params(base, &params).map_err(|e| CaptionError::fetch("timedtext URL", e))?;
        tracks.push(CaptionTrack { code, label, source_locator: url.to_string() });
      }
      Ok(Event::Eof) => break,
      Ok(_) => {}
      Err(e) => return Err(CaptionError::fetch("invalid track list XML", e)),
    }
  }
  Ok(tracks)
}

/// Lists and fetches tracks straight from the timed-text endpoint.
pub struct TimedTextApi;

impl TimedTextApi {
  fn list_url(video_id: &str) -> CaptionResult<String> {
    Url::parse_with_params(&constants().timedtext_base, &[("type", "list"), ("v", video_id)])
      .map(|u| u.to_string())
      .map_err(|e| CaptionError::fetch("timedtext URL", e))
  }
}

#[async_trait]
impl CaptionSource for TimedTextApi {
  fn strategy(&self) -> Strategy {
    Strategy::TimedText
  }

  async fn list_languages(&self, page: &Page) -> CaptionResult<Vec<CaptionTrack>> {
    let url = Self::list_url(&page.video_id)?;
    let xml = page.fetcher().get_text(&url).await?;
    parse_track_list(&xml, &page.video_id)
  }

  async fn fetch_transcript(&self, page: &Page, code: Option<&str>) -> CaptionResult<Transcript> {
    let tracks = self.list_languages(page).await?;
    let track = select_track(&tracks, code)?;
    fetch_track(page, &track.source_locator).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::Fetcher;
  use crate::fetch::fake::FakeFetcher;
  use std::sync::Arc;

  #[test]
  fn percent_decoding_only_when_every_percent_is_an_escape() {
    assert_eq!(decode_text("Hello%20World"), "Hello World");
    assert_eq!(decode_text("caf%C3%A9"), "café");
    assert_eq!(decode_text("100% sure"), "100% sure");
    assert_eq!(decode_text("50%25 off and 10% more"), "50%25 off and 10% more");
    assert_eq!(decode_text("plain text"), "plain text");
    assert_eq!(decode_text("trailing %2"), "trailing %2");
    // Valid escapes that decode to invalid UTF-8 are kept verbatim.
    assert_eq!(decode_text("%FF%FE"), "%FF%FE");
  }

  #[test]
  fn parses_classic_text_cues() {
    let xml = r#"<?xml version="1.0" encoding="utf-8" ?><transcript>
      <text start="0.5" dur="2.1">Hello &amp;amp; welcome</text>
      <text start="2.6" dur="1.9">it&amp;#39;s a
test</text>
      <text start="4.5" dur="1.0">   </text>
      <text start="5.0" dur="1.0">Hello%20World</text>
    </transcript>"#;
    let entries = parse_track_xml(xml).unwrap();
    assert_eq!(
      entries,
      vec![
        TranscriptEntry::new(0.5, "Hello & welcome"),
        TranscriptEntry::new(2.6, "it's a test"),
        TranscriptEntry::new(5.0, "Hello World"),
      ]
    );
  }

  #[test]
  fn parses_srv3_paragraphs() {
    let xml = r#"<timedtext format="3"><body>
      <p t="1200" d="900"><s>one</s><s> two</s></p>
      <p t="2500" d="500">line<br/>break</p>
      <p t="3000" d="10"/>
    </body></timedtext>"#;
    let entries = parse_track_xml(xml).unwrap();
    assert_eq!(entries, vec![TranscriptEntry::new(1.2, "one two"), TranscriptEntry::new(2.5, "line break")]);
  }

  #[test]
  fn empty_track_is_not_available() {
    let err = parse_track_xml("<transcript></transcript>").unwrap_err();
    assert!(matches!(err, CaptionError::NotAvailable(_)));
  }

  #[test]
  fn malformed_track_is_fetch_failed() {
    let err = parse_track_xml(r#"<transcript><text start="1">a</p></transcript>"#).unwrap_err();
    assert!(matches!(err, CaptionError::FetchFailed(_)));
  }

  #[test]
  fn track_list_builds_labels_and_urls() {
    let xml = r#"<transcript_list docid="1">
      <track id="0" name="" lang_code="en" lang_original="English" lang_translated="English" lang_default="true"/>
      <track id="1" name="CC" lang_code="es" lang_original="Español" lang_translated="Spanish"/>
      <track id="2" name="" lang_code="" lang_original="Broken"/>
    </transcript_list>"#;
    let tracks = parse_track_list(xml, "dQw4w9WgXcQ").unwrap();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].code, "en");
    assert_eq!(tracks[0].label, "English");
    assert_eq!(tracks[1].label, "Spanish (CC)");
    assert!(tracks[1].source_locator.contains("lang=es"));
    assert!(tracks[1].source_locator.contains("name=CC"));
    assert!(tracks[1].source_locator.contains("v=dQw4w9WgXcQ"));
  }

  #[tokio::test]
  async fn fetches_requested_language_only() {
    let list_url = TimedTextApi::list_url("dQw4w9WgXcQ").unwrap();
    let list = r#"<transcript_list>
      <track name="" lang_code="en" lang_translated="English"/>
      <track name="" lang_code="es" lang_translated="Spanish"/>
    </transcript_list>"#;
    let tracks = parse_track_list(list, "dQw4w9WgXcQ").unwrap();
    let fetcher: Arc<dyn Fetcher> = Arc::new(
      FakeFetcher::new()
        .with_page(&list_url, list)
        .with_page(&tracks[0].source_locator, r#"<transcript><text start="1">hello</text></transcript>"#)
        .with_page(&tracks[1].source_locator, r#"<transcript><text start="1">hola</text></transcript>"#),
    );
    let page = Page::new("dQw4w9WgXcQ", fetcher).unwrap();

    let es = TimedTextApi.fetch_transcript(&page, Some("es")).await.unwrap();
    assert_eq!(es, vec![TranscriptEntry::new(1.0, "hola")]);
    let default = TimedTextApi.fetch_transcript(&page, None).await.unwrap();
    assert_eq!(default, vec![TranscriptEntry::new(1.0, "hello")]);
    let fr = TimedTextApi.fetch_transcript(&page, Some("fr")).await;
    assert!(matches!(fr, Err(CaptionError::NotAvailable(_))));
  }
}
