//! Tunables (endpoints, timeouts, debounce, RTL prefixes) from `constants.ron`,
//! embedded with `include_str!` and parsed on first access.

use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Watch page / endpoints
  pub watch_url_base: String,
  pub timedtext_base: String,
  pub innertube_transcript_url: String,
  pub user_agent: String,
  pub accept_language: String,
  pub http_timeout_ms: u64,

  // Transcript panel settle bounds
  pub panel_open_timeout_ms: u64,
  pub menu_open_timeout_ms: u64,
  pub language_switch_timeout_ms: u64,

  // Session coordinator
  pub search_debounce_ms: u64,
  pub request_timeout_ms: u64,
  pub metadata_refresh_ms: u64,
  pub error_dismiss_secs: u64,

  pub rtl_language_prefixes: Vec<String>,
}

impl Constants {
  pub fn panel_open_timeout(&self) -> Duration {
    Duration::from_millis(self.panel_open_timeout_ms)
  }

  pub fn menu_open_timeout(&self) -> Duration {
    Duration::from_millis(self.menu_open_timeout_ms)
  }

  pub fn language_switch_timeout(&self) -> Duration {
    Duration::from_millis(self.language_switch_timeout_ms)
  }

  pub fn search_debounce(&self) -> Duration {
    Duration::from_millis(self.search_debounce_ms)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn embedded_constants_parse() {
    let c = constants();
    assert_eq!(c.search_debounce(), Duration::from_millis(200));
    assert_eq!(c.panel_open_timeout(), Duration::from_millis(1000));
    assert_eq!(c.menu_open_timeout(), Duration::from_millis(500));
    assert!(c.rtl_language_prefixes.iter().any(|p| p == "ar"));
  }
}
