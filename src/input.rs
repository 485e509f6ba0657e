use anyhow::{Context, Result};
use ratatui::crossterm::event::{self, KeyCode, KeyModifiers};

use crate::app::{App, AppMode};

// --- Helpers ---

/// Convert a char index to a byte offset within the string.
pub fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
  s.char_indices().nth(char_idx).map_or(s.len(), |(i, _)| i)
}

/// Line-editing keys shared by the URL and query inputs. Returns whether the text changed.
fn edit_line(text: &mut String, cursor: &mut usize, code: KeyCode) -> bool {
  match code {
    KeyCode::Char(c) => {
      let byte_idx = char_to_byte_index(text, *cursor);
      text.insert(byte_idx, c);
      *cursor += 1;
      true
    }
    KeyCode::Backspace if *cursor > 0 => {
      *cursor -= 1;
      let byte_idx = char_to_byte_index(text, *cursor);
      text.remove(byte_idx);
      true
    }
    KeyCode::Delete if *cursor < text.chars().count() => {
      let byte_idx = char_to_byte_index(text, *cursor);
      text.remove(byte_idx);
      true
    }
    KeyCode::Left => {
      *cursor = cursor.saturating_sub(1);
      false
    }
    KeyCode::Right => {
      if *cursor < text.chars().count() {
        *cursor += 1;
      }
      false
    }
    KeyCode::Home => {
      *cursor = 0;
      false
    }
    KeyCode::End => {
      *cursor = text.chars().count();
      false
    }
    _ => false,
  }
}

fn step(selected: Option<usize>, count: usize, down: bool) -> Option<usize> {
  if count == 0 {
    return None;
  }
  Some(match (selected, down) {
    (None, _) => 0,
    (Some(i), true) => (i + 1) % count,
    (Some(0), false) => count - 1,
    (Some(i), false) => i - 1,
  })
}

// --- Event Handling ---

pub async fn handle_key_event(app: &mut App, key: event::KeyEvent) -> Result<()> {
  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
    app.should_quit = true;
    return Ok(());
  }

  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('t') {
    app.next_theme();
    return Ok(());
  }

  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('s') {
    if app.player.is_playing() {
      app.player.stop().await.context("Failed to stop playback")?;
    }
    return Ok(());
  }

  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('l') {
    if !app.languages.is_empty() {
      app.mode = AppMode::Languages;
    }
    return Ok(());
  }

  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('o') {
    app.input_scroll = 0;
    app.mode = AppMode::Url;
    return Ok(());
  }

  match app.mode {
    AppMode::Url => handle_url_key(app, key).await,
    AppMode::Query => handle_query_key(app, key),
    AppMode::Results => handle_results_key(app, key).await.context("Failed to handle results key event")?,
    AppMode::Languages => handle_language_key(app, key),
  }
  Ok(())
}

async fn handle_url_key(app: &mut App, key: event::KeyEvent) {
  app.clear_error();
  match key.code {
    KeyCode::Enter => {
      let url = app.url_input.clone();
      app.open_video(&url).await;
      app.input_scroll = 0;
    }
    KeyCode::Esc => {
      if app.video.is_some() {
        app.mode = AppMode::Query;
      } else if !app.url_input.is_empty() {
        app.url_input.clear();
        app.url_cursor = 0;
        app.input_scroll = 0;
      } else {
        app.should_quit = true;
      }
    }
    code => {
      edit_line(&mut app.url_input, &mut app.url_cursor, code);
    }
  }
}

fn handle_query_key(app: &mut App, key: event::KeyEvent) {
  match key.code {
    KeyCode::Enter => {
      app.run_search();
      if !app.results.is_empty() {
        app.mode = AppMode::Results;
      }
    }
    KeyCode::Down => {
      if !app.results.is_empty() {
        app.mode = AppMode::Results;
      }
    }
    KeyCode::Esc => {
      if !app.query.is_empty() {
        app.query.clear();
        app.query_cursor = 0;
        app.input_scroll = 0;
        app.run_search();
      } else {
        app.should_quit = true;
      }
    }
    code => {
      if edit_line(&mut app.query, &mut app.query_cursor, code) {
        app.query_changed();
      }
    }
  }
}

async fn handle_results_key(app: &mut App, key: event::KeyEvent) -> Result<()> {
  match key.code {
    KeyCode::Enter => {
      app.seek_selected();
    }
    KeyCode::Char(' ') => {
      if app.player.is_playing()
        && let Err(e) = app.player.toggle_pause().await
      {
        app.set_error(format!("Pause error: {}", e));
      }
    }
    KeyCode::Down | KeyCode::Char('j') => {
      let next = step(app.list_state.selected(), app.results.len(), true);
      app.list_state.select(next);
    }
    KeyCode::Up | KeyCode::Char('k') => {
      let next = step(app.list_state.selected(), app.results.len(), false);
      app.list_state.select(next);
    }
    KeyCode::Char('/') | KeyCode::Esc => {
      app.mode = AppMode::Query;
    }
    _ => {}
  }
  Ok(())
}

fn handle_language_key(app: &mut App, key: event::KeyEvent) {
  match key.code {
    KeyCode::Enter => {
      if let Some(code) = app.language_state.selected().and_then(|row| app.picker_code(row)).map(str::to_string) {
        app.select_language(&code);
      }
      app.mode = AppMode::Query;
    }
    KeyCode::Down | KeyCode::Char('j') => {
      let next = step(app.language_state.selected(), app.languages.len() + 1, true);
      app.language_state.select(next);
    }
    KeyCode::Up | KeyCode::Char('k') => {
      let next = step(app.language_state.selected(), app.languages.len() + 1, false);
      app.language_state.select(next);
    }
    KeyCode::Esc => {
      app.mode = AppMode::Query;
    }
    _ => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // --- char_to_byte_index ---

  #[test]
  fn char_to_byte_ascii() {
    assert_eq!(char_to_byte_index("hello", 0), 0);
    assert_eq!(char_to_byte_index("hello", 3), 3);
    assert_eq!(char_to_byte_index("hello", 5), 5); // past end
  }

  #[test]
  fn char_to_byte_multibyte() {
    let s = "aé日"; // a=1 byte, é=2 bytes, 日=3 bytes
    assert_eq!(char_to_byte_index(s, 0), 0);
    assert_eq!(char_to_byte_index(s, 1), 1);
    assert_eq!(char_to_byte_index(s, 2), 3);
    assert_eq!(char_to_byte_index(s, 3), 6);
  }

  // --- edit_line ---

  #[test]
  fn edit_line_inserts_and_deletes_at_cursor() {
    let mut text = "hllo".to_string();
    let mut cursor = 1;
    assert!(edit_line(&mut text, &mut cursor, KeyCode::Char('e')));
    assert_eq!((text.as_str(), cursor), ("hello", 2));
    assert!(!edit_line(&mut text, &mut cursor, KeyCode::End));
    assert!(edit_line(&mut text, &mut cursor, KeyCode::Backspace));
    assert_eq!((text.as_str(), cursor), ("hell", 4));
    assert!(!edit_line(&mut text, &mut cursor, KeyCode::Delete));
    cursor = 0;
    assert!(!edit_line(&mut text, &mut cursor, KeyCode::Backspace));
  }

  #[test]
  fn edit_line_handles_wide_chars() {
    let mut text = "日本".to_string();
    let mut cursor = 2;
    edit_line(&mut text, &mut cursor, KeyCode::Char('語'));
    edit_line(&mut text, &mut cursor, KeyCode::Left);
    edit_line(&mut text, &mut cursor, KeyCode::Backspace);
    assert_eq!(text, "日語");
    assert_eq!(cursor, 1);
  }

  // --- step ---

  #[test]
  fn step_wraps_both_ways() {
    assert_eq!(step(None, 3, true), Some(0));
    assert_eq!(step(Some(2), 3, true), Some(0));
    assert_eq!(step(Some(0), 3, false), Some(2));
    assert_eq!(step(Some(1), 3, false), Some(0));
    assert_eq!(step(Some(1), 0, true), None);
  }

  // --- language picker ---

  #[tokio::test]
  async fn enter_on_first_row_picks_default_language() {
    use crate::agent::PageAgent;
    use crate::captions::{CaptionAdapter, Strategy};
    use crate::config::Config;
    use crate::fetch::fake::FakeFetcher;
    use crate::player::{MpvPlayer, MpvSocket};
    use crate::transcript::LanguageOption;
    use ratatui::crossterm::event::KeyEvent;
    use std::sync::Arc;

    let agent = PageAgent::new(
      Arc::new(FakeFetcher::new()),
      CaptionAdapter::new(&[Strategy::Embedded]),
      Arc::new(MpvSocket::default()),
    )
    .spawn(None);
    let config = Config { preferred_language: Some("es".to_string()), ..Config::default() };
    let mut app = App::new(agent, MpvPlayer::new(true), config);
    app.languages = vec![
      LanguageOption { code: "en".to_string(), label: "English".to_string() },
      LanguageOption { code: "es".to_string(), label: "Spanish".to_string() },
    ];
    app.selected_language = "es".to_string();
    app.mode = AppMode::Languages;
    app.language_state.select(Some(2));

    handle_language_key(&mut app, KeyEvent::from(KeyCode::Down));
    assert_eq!(app.language_state.selected(), Some(0));
    handle_language_key(&mut app, KeyEvent::from(KeyCode::Enter));
    assert_eq!(app.selected_language, "");
    assert_eq!(app.preferred_language(), None);
    assert_eq!(app.mode, AppMode::Query);
  }
}
