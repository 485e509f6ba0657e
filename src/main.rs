mod agent;
mod app;
mod captions;
mod config;
mod constants;
mod error;
mod fetch;
mod input;
mod player;
mod protocol;
mod search;
mod serve;
mod store;
mod theme;
mod timestamp;
mod transcript;
mod ui;
mod youtube;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use ratatui::{
  DefaultTerminal,
  crossterm::event::{self, Event, KeyEventKind},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use agent::PageAgent;
use app::App;
use captions::{CaptionAdapter, Strategy};
use config::Config;
use fetch::{Fetcher, HttpFetcher};
use player::{MpvPlayer, MpvSocket};

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  /// YouTube video URL to open on start
  url: Option<String>,

  /// Play audio only (no video window)
  #[arg(short, long)]
  audio_only: bool,

  /// Do not start mpv when a video is opened
  #[arg(long)]
  no_play: bool,

  /// Caption strategies to try, in order (overrides prefs.toml)
  #[arg(short, long, value_delimiter = ',')]
  strategy: Vec<Strategy>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Answer JSON-line requests on stdin for the given video page
  Serve {
    url: String,

    /// mpv IPC socket of an already running player, used for seekTo and playback state
    #[arg(long)]
    mpv_socket: Option<PathBuf>,
  },
  /// Print shell completions
  Completions { shell: Shell },
}

// --- Logging ---

fn log_filter() -> EnvFilter {
  EnvFilter::try_from_env("YTX_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to `ytx.log` in the cache dir; the terminal belongs to the TUI.
fn init_file_logging() -> Option<WorkerGuard> {
  let dirs = directories::ProjectDirs::from("", "", "ytx")?;
  let dir = dirs.cache_dir();
  std::fs::create_dir_all(dir).ok()?;
  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, "ytx.log"));
  tracing_subscriber::fmt().with_env_filter(log_filter()).with_writer(writer).with_ansi(false).init();
  Some(guard)
}

fn init_stderr_logging() {
  tracing_subscriber::fmt().with_env_filter(log_filter()).with_writer(std::io::stderr).init();
}

// --- Main ---

fn strategy_order(args: &Args, config: &Config) -> Vec<Strategy> {
  if args.strategy.is_empty() { config.strategy_order() } else { args.strategy.clone() }
}

#[tokio::main]
async fn main() -> Result<()> {
  let mut args = Args::parse();
  let config = Config::load();

  match args.command.take() {
    Some(Command::Completions { shell }) => {
      let mut cmd = Args::command();
      let bin_name = cmd.get_name().to_string();
      generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
      Ok(())
    }
    Some(Command::Serve { url, mpv_socket }) => {
      init_stderr_logging();
      let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);
      let media = match mpv_socket {
        Some(path) => MpvSocket::attach(path),
        None => MpvSocket::default(),
      };
      let adapter = CaptionAdapter::new(&strategy_order(&args, &config));
      info!(url = %url, strategies = ?adapter.strategies(), "main: serving");
      let handle = PageAgent::new(fetcher, adapter, Arc::new(media)).spawn(Some(&url));
      let stdin = tokio::io::BufReader::new(tokio::io::stdin());
      serve::serve(&handle, stdin, tokio::io::stdout()).await
    }
    None => {
      let _guard = init_file_logging();

      let default_hook = std::panic::take_hook();
      std::panic::set_hook(Box::new(move |info| {
        ratatui::restore();
        default_hook(info);
      }));

      let mut terminal = ratatui::init();
      let result = run(&mut terminal, args, config).await;
      ratatui::restore();
      result
    }
  }
}

async fn run(terminal: &mut DefaultTerminal, args: Args, config: Config) -> Result<()> {
  let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new().context("Failed to build HTTP client")?);
  let player = MpvPlayer::new(args.audio_only);
  let adapter = CaptionAdapter::new(&strategy_order(&args, &config));
  info!(strategies = ?adapter.strategies(), "main: starting");

  let agent = PageAgent::new(fetcher, adapter, Arc::new(player.element())).spawn(None);
  let mut app = App::new(agent, player, config).with_autoplay(!args.no_play).with_prefs(config::prefs_path());

  if let Some(url) = &args.url {
    app.url_input = url.clone();
    app.url_cursor = url.chars().count();
    app.open_video(url).await;
  }

  loop {
    app.check_pending().await?;
    app.tick();
    app.player.check_mpv_status();

    terminal.draw(|frame| ui::ui(frame, &mut app))?;

    if event::poll(Duration::from_millis(100))? {
      match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => {
          input::handle_key_event(&mut app, key).await?;
        }
        _ => {}
      }
    }

    if app.should_quit {
      break;
    }
  }

  app.player.stop().await?;
  Ok(())
}
