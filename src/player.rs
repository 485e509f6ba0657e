use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::{
  io::BufReader as TokioBufReader,
  io::{AsyncBufReadExt, AsyncWriteExt},
  process::{Child as TokioChild, Command},
  sync::mpsc,
  task::JoinHandle,
};
use tracing::{debug, info};

use crate::error::{CaptionError, CaptionResult};

const NO_PLAYER: &str = "No video player found";

/// Position, length and title as the media element reports them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaState {
  pub current_time: f64,
  pub duration: f64,
  pub title: Option<String>,
}

/// The page's media element, as far as the agent is concerned.
#[async_trait]
pub trait MediaElement: Send + Sync {
  /// Move playback to `seconds` and resume.
  async fn seek(&self, seconds: f64) -> CaptionResult<()>;
  async fn state(&self) -> CaptionResult<MediaState>;
}

/// Handle on an mpv JSON IPC socket. Cloned handles follow the same player,
/// so the path is swapped in place when playback restarts.
#[derive(Clone, Default)]
pub struct MpvSocket {
  path: Arc<RwLock<Option<PathBuf>>>,
  next_id: Arc<AtomicU64>,
}

impl MpvSocket {
  /// Attach to an mpv started elsewhere with `--input-ipc-server`.
  pub fn attach(path: impl Into<PathBuf>) -> Self {
    let socket = Self::default();
    socket.set(Some(path.into()));
    socket
  }

  fn set(&self, path: Option<PathBuf>) {
    *self.path.write().unwrap_or_else(|p| p.into_inner()) = path;
  }

  fn current(&self) -> Option<PathBuf> {
    self.path.read().unwrap_or_else(|p| p.into_inner()).clone()
  }

  /// Send one IPC command and wait for the reply carrying its request id.
  async fn command(&self, args: Value) -> CaptionResult<Value> {
    let path = self.current().ok_or_else(|| CaptionError::ElementNotFound(NO_PLAYER.to_string()))?;
    let mut stream = tokio::net::UnixStream::connect(&path).await.map_err(|e| {
      debug!(path = %path.display(), err = %e, "player: IPC connect failed");
      CaptionError::ElementNotFound(NO_PLAYER.to_string())
    })?;

    let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    let mut line = json!({ "command": args, "request_id": id }).to_string();
    line.push('\n');
    stream.write_all(line.as_bytes()).await.map_err(|e| CaptionError::fetch("mpv IPC write", e))?;

    // mpv may emit event lines before the reply.
    let mut lines = TokioBufReader::new(stream).lines();
    for _ in 0..50 {
      let next = tokio::time::timeout(Duration::from_secs(3), lines.next_line())
        .await
        .map_err(|_| CaptionError::Unreachable("Timed out waiting for mpv".to_string()))?
        .map_err(|e| CaptionError::fetch("mpv IPC read", e))?;
      let Some(next) = next else { break };

      if let Ok(val) = serde_json::from_str::<Value>(&next)
        && val.get("request_id").and_then(Value::as_u64) == Some(id)
      {
        return match val.get("error").and_then(Value::as_str) {
          Some("success") => Ok(val.get("data").cloned().unwrap_or(Value::Null)),
          Some(err) => Err(CaptionError::FetchFailed(format!("mpv: {}", err))),
          None => Ok(Value::Null),
        };
      }
    }
    Err(CaptionError::Unreachable("mpv closed the IPC connection".to_string()))
  }

  async fn property(&self, name: &str) -> CaptionResult<Value> {
    self.command(json!(["get_property", name])).await
  }
}

#[async_trait]
impl MediaElement for MpvSocket {
  async fn seek(&self, seconds: f64) -> CaptionResult<()> {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    self.command(json!(["seek", seconds, "absolute"])).await?;
    self.command(json!(["set_property", "pause", false])).await?;
    info!(seconds, "player: seeked");
    Ok(())
  }

  async fn state(&self) -> CaptionResult<MediaState> {
    // Before the file is loaded mpv answers "property unavailable".
    let current_time = self.property("time-pos").await.ok().and_then(|v| v.as_f64()).unwrap_or(0.0).max(0.0);
    let duration = self.property("duration").await.ok().and_then(|v| v.as_f64()).unwrap_or(0.0).max(0.0);
    let title = self.property("media-title").await?.as_str().map(str::to_string).filter(|t| !t.is_empty());
    let current_time = if duration > 0.0 { current_time.min(duration) } else { current_time };
    Ok(MediaState { current_time, duration, title })
  }
}

/// Owns the mpv process playing the current video.
pub struct MpvPlayer {
  current_process: Option<TokioChild>,
  socket: MpvSocket,
  mpv_monitor_handle: Option<JoinHandle<()>>,
  mpv_status_rx: Option<mpsc::Receiver<String>>,
  last_mpv_status: Option<String>,
  audio_only: bool,
  pub paused: bool,
}

impl MpvPlayer {
  pub fn new(audio_only: bool) -> Self {
    Self {
      current_process: None,
      socket: MpvSocket::default(),
      mpv_monitor_handle: None,
      mpv_status_rx: None,
      last_mpv_status: None,
      audio_only,
      paused: false,
    }
  }

  /// A media element handle that follows this player across restarts.
  pub fn element(&self) -> MpvSocket {
    self.socket.clone()
  }

  pub fn is_playing(&self) -> bool {
    self.current_process.is_some()
  }

  pub fn check_mpv_status(&mut self) {
    if let Some(rx) = &mut self.mpv_status_rx {
      while let Ok(status) = rx.try_recv() {
        self.last_mpv_status = Some(status);
      }
    }
  }

  pub fn last_mpv_status(&self) -> Option<&str> {
    self.last_mpv_status.as_deref()
  }

  pub async fn play(&mut self, url: &str) -> Result<()> {
    self.stop().await.context("Failed to stop previous playback")?;
    self.paused = false;

    let socket_path = std::env::temp_dir().join(format!("ytx-mpv-{}.sock", std::process::id()));
    let socket_path_str = socket_path.to_str().context("Temp dir path is not valid UTF-8")?.to_string();
    // Remove stale socket if it exists from a previous crash.
    let _ = std::fs::remove_file(&socket_path);

    let mut cmd = Command::new("mpv");
    if self.audio_only {
      cmd.arg("--no-video");
    }
    cmd.args([
      "--term-status-msg=${time-pos/full} / ${duration/full} | ${media-title} | ${pause}",
      &format!("--input-ipc-server={}", socket_path_str),
      url,
    ]);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    // Send stderr to null; a piped but undrained stderr blocks mpv.
    cmd.stderr(Stdio::null());

    let mut child = cmd.spawn().map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        anyhow!("mpv not found. Install it with: brew install mpv (macOS) or apt install mpv (Linux)")
      } else {
        anyhow!(e).context("Failed to spawn mpv process")
      }
    })?;

    let stdout = child.stdout.take().context("Failed to get mpv stdout")?;
    let (tx, rx) = mpsc::channel::<String>(10);
    self.mpv_status_rx = Some(rx);

    let monitor_handle = tokio::spawn(async move {
      let reader = TokioBufReader::new(stdout);
      let mut lines = reader.lines();
      while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
          break;
        }
      }
    });

    info!(url = %url, audio_only = self.audio_only, "player: mpv started");
    self.current_process = Some(child);
    self.mpv_monitor_handle = Some(monitor_handle);
    self.socket.set(Some(socket_path));
    Ok(())
  }

  pub async fn toggle_pause(&mut self) -> Result<()> {
    if !self.is_playing() {
      return Ok(());
    }
    self.socket.command(json!(["cycle", "pause"])).await.context("Failed to send pause command to mpv")?;
    self.paused = !self.paused;
    Ok(())
  }

  pub async fn stop(&mut self) -> Result<()> {
    if let Some(handle) = self.mpv_monitor_handle.take() {
      handle.abort();
      let _ = handle.await;
    }
    self.mpv_status_rx = None;
    self.last_mpv_status = None;

    if let Some(mut child) = self.current_process.take() {
      child.kill().await.context("Failed to kill mpv process")?;
      let _ = child.wait().await;
    }
    self.paused = false;

    if let Some(path) = self.socket.current() {
      let _ = std::fs::remove_file(&path);
    }
    self.socket.set(None);
    Ok(())
  }
}
