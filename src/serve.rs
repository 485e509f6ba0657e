//! The agent's message contract as JSON lines on a byte stream.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::agent::AgentHandle;
use crate::protocol::{Request, Response};

/// Answer one request line.
pub async fn handle_line(handle: &AgentHandle, line: &str) -> Response {
  let Some(request) = Request::parse(line) else {
    debug!(line = %line, "serve: unknown action");
    return Response::unknown_action();
  };
  handle.call(request).await
}

/// Read requests until EOF, writing one response line per non-empty request line.
pub async fn serve<R, W>(handle: &AgentHandle, reader: R, mut writer: W) -> Result<()>
where
  R: AsyncBufRead + Unpin,
  W: AsyncWrite + Unpin,
{
  let mut lines = reader.lines();
  let mut served = 0u64;
  while let Some(line) = lines.next_line().await.context("Failed to read request")? {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    let response = handle_line(handle, line).await;
    let mut out = serde_json::to_string(&response).context("Failed to encode response")?;
    out.push('\n');
    writer.write_all(out.as_bytes()).await.context("Failed to write response")?;
    writer.flush().await.context("Failed to flush response")?;
    served += 1;
  }
  info!(served, "serve: input closed");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::PageAgent;
  use crate::captions::{CaptionAdapter, Strategy};
  use crate::fetch::fake::FakeFetcher;
  use crate::player::MpvSocket;
  use crate::youtube::watch_url;
  use std::sync::Arc;

  const VIDEO: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
  const EN_URL: &str = "https://www.youtube.com/api/timedtext?v=dQw4w9WgXcQ&lang=en";

  fn handle() -> AgentHandle {
    let html = format!(
      r#"<script>var ytInitialPlayerResponse = {{"videoDetails":{{"title":"Demo","lengthSeconds":"60"}},
"captions":{{"playerCaptionsTracklistRenderer":{{"captionTracks":[
{{"baseUrl":"{}","name":{{"simpleText":"English"}},"languageCode":"en"}}]}}}}}};</script>"#,
      EN_URL
    );
    let fetcher = Arc::new(
      FakeFetcher::new()
        .with_page(&watch_url("dQw4w9WgXcQ"), &html)
        .with_page(EN_URL, r#"<transcript><text start="3.5">Hello World</text></transcript>"#),
    );
    PageAgent::new(fetcher, CaptionAdapter::new(&[Strategy::Embedded]), Arc::new(MpvSocket::default()))
      .spawn(Some(VIDEO))
  }

  #[tokio::test]
  async fn unknown_or_broken_lines_are_unknown_action() {
    let handle = handle();
    assert_eq!(handle_line(&handle, r#"{"action":"dance"}"#).await, Response::unknown_action());
    assert_eq!(handle_line(&handle, "not json").await, Response::unknown_action());
  }

  #[tokio::test]
  async fn seek_without_player_fails() {
    let handle = handle();
    let response = handle_line(&handle, r#"{"action":"seekTo","time":12}"#).await;
    assert_eq!(response, Response::failure("No video player found"));
  }

  #[tokio::test]
  async fn serves_one_response_per_line() {
    let handle = handle();
    let input = b"{\"action\":\"getTranscript\"}\n\n{\"action\":\"getAvailableLanguages\"}\n".to_vec();
    let mut output = Vec::new();
    serve(&handle, &input[..], &mut output).await.unwrap();

    let lines: Vec<serde_json::Value> =
      String::from_utf8(output).unwrap().lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["success"], true);
    assert_eq!(lines[0]["transcript"][0]["text"], "Hello World");
    assert_eq!(lines[0]["transcript"][0]["time"], 3.5);
    assert_eq!(lines[1]["languages"][0]["code"], "en");
  }
}
