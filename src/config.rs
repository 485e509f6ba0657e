use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::captions::Strategy;

/// User preferences kept in `prefs.toml`.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Config {
  pub theme_name: Option<String>,
  /// Caption strategies, tried in order.
  pub strategies: Option<Vec<Strategy>>,
  /// Language picked last time, applied when the video offers it.
  pub preferred_language: Option<String>,
}

pub fn prefs_path() -> Option<PathBuf> {
  ProjectDirs::from("", "", "ytx").map(|dirs| dirs.config_dir().join("prefs.toml"))
}

impl Config {
  pub fn load() -> Self {
    prefs_path().map(|path| Self::load_from(&path)).unwrap_or_default()
  }

  pub fn load_from(path: &Path) -> Self {
    if let Ok(content) = std::fs::read_to_string(path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }
    Self::default()
  }

  pub fn save_to(&self, path: &Path) {
    if let Some(dir) = path.parent()
      && std::fs::create_dir_all(dir).is_ok()
      && let Ok(content) = toml::to_string(self)
    {
      let _ = std::fs::write(path, content);
    }
  }

  pub fn strategy_order(&self) -> Vec<Strategy> {
    match &self.strategies {
      Some(order) if !order.is_empty() => order.clone(),
      _ => Strategy::DEFAULT_ORDER.to_vec(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_prefs_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("prefs.toml");
    let config = Config {
      theme_name: Some("night".to_string()),
      strategies: Some(vec![Strategy::Panel, Strategy::TimedText]),
      preferred_language: Some("es".to_string()),
    };
    config.save_to(&path);
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains(r#"strategies = ["panel", "timedtext"]"#));
    assert_eq!(Config::load_from(&path), config);
  }

  #[test]
  fn missing_or_broken_file_is_default() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(Config::load_from(&dir.path().join("absent.toml")), Config::default());

    let broken = dir.path().join("prefs.toml");
    std::fs::write(&broken, "strategies = [\"carrier-pigeon\"]").unwrap();
    assert_eq!(Config::load_from(&broken), Config::default());
  }

  #[test]
  fn strategy_order_defaults() {
    assert_eq!(Config::default().strategy_order(), vec![Strategy::Embedded]);
    let empty = Config { strategies: Some(Vec::new()), ..Config::default() };
    assert_eq!(empty.strategy_order(), vec![Strategy::Embedded]);
  }
}
