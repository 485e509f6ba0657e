//! Error kinds that cross the page-agent boundary.

use thiserror::Error;

pub type CaptionResult<T> = std::result::Result<T, CaptionError>;

/// Failure taxonomy for everything the page agent does on behalf of the UI.
///
/// `Clone` because one in-flight transcript fetch can have many waiters,
/// and each of them receives its own copy of the outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptionError {
  /// No media element, or no applicable UI panel / menu on the page.
  #[error("{0}")]
  ElementNotFound(String),

  /// No caption track for the requested (or any) language.
  #[error("{0}")]
  NotAvailable(String),

  /// Network or parse failure on page or track data.
  #[error("{0}")]
  FetchFailed(String),

  /// The message channel could not deliver the request or its reply.
  #[error("{0}")]
  Unreachable(String),
}

impl CaptionError {
  pub fn kind(&self) -> &'static str {
    match self {
      CaptionError::ElementNotFound(_) => "ElementNotFound",
      CaptionError::NotAvailable(_) => "NotAvailable",
      CaptionError::FetchFailed(_) => "FetchFailed",
      CaptionError::Unreachable(_) => "Unreachable",
    }
  }

  pub fn fetch(context: &str, err: impl std::fmt::Display) -> Self {
    CaptionError::FetchFailed(format!("{}: {}", context, err))
  }
}

impl From<reqwest::Error> for CaptionError {
  fn from(err: reqwest::Error) -> Self {
    CaptionError::fetch("request failed", err)
  }
}
