use ratatui::{
  Frame,
  layout::{Alignment, Constraint, Layout, Rect},
  style::{Modifier, Style, Stylize},
  text::{Line, Span},
  widgets::{Block, BorderType, List, ListItem, Padding, Paragraph},
};

use crate::app::{App, AppMode};
use crate::search;
use crate::theme::Theme;
use crate::timestamp;

// --- Helpers ---

/// Compute the display width of the first `n` chars (accounting for double-width CJK).
pub fn display_width(s: &str, n: usize) -> usize {
  use unicode_width::UnicodeWidthChar;
  s.chars().take(n).map(|c| c.width().unwrap_or(0)).sum()
}

/// Truncate a string to `max_width` characters, appending "…" if truncated.
fn truncate_str(s: &str, max_width: usize) -> String {
  if s.chars().count() <= max_width {
    s.to_string()
  } else {
    let truncated: String = s.chars().take(max_width.saturating_sub(1)).collect();
    format!("{}…", truncated)
  }
}

/// The chars of `text` that fall inside display columns `scroll..scroll + width`.
fn visible_window(text: &str, scroll: usize, width: usize) -> String {
  let mut col = 0;
  let mut out = String::new();
  for c in text.chars() {
    let start = col;
    col += unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
    if col <= scroll {
      continue;
    }
    if start >= scroll + width {
      break;
    }
    out.push(c);
  }
  out
}

/// Scroll offset that keeps `cursor_col` inside a `width`-column window.
fn follow_cursor(scroll: usize, cursor_col: usize, width: usize) -> usize {
  if cursor_col < scroll {
    cursor_col
  } else if cursor_col >= scroll + width {
    cursor_col.saturating_sub(width) + 1
  } else {
    scroll
  }
}

/// Muted text flush against the right edge of a one-line area.
fn render_right(frame: &mut Frame, text: String, theme: &Theme, area: Rect) {
  let width = text.chars().count() as u16;
  let right_area = Rect { x: area.x + area.width.saturating_sub(width), width: width.min(area.width), ..area };
  frame.render_widget(Line::from(Span::styled(text, Style::default().fg(theme.muted))), right_area);
}

fn key_hints<'a>(keys: &[(&'a str, &'a str)], theme: &Theme) -> Line<'a> {
  let mut spans = Vec::with_capacity(keys.len() * 3);
  for (i, (key, action)) in keys.iter().enumerate() {
    if i > 0 {
      spans.push(Span::raw("  "));
    }
    spans.push(Span::styled(format!(" {} ", key), Style::default().fg(theme.key_fg).bg(theme.key_bg)));
    spans.push(Span::styled(format!(" {} ", action), Style::default().fg(theme.muted)));
  }
  Line::from(spans)
}

fn rounded(theme: &Theme) -> Block<'static> {
  Block::bordered().border_type(BorderType::Rounded).border_style(Style::default().fg(theme.border))
}

/// Spans for one transcript line with query matches marked.
fn highlighted_spans<'a>(text: &'a str, query: &str, theme: &Theme, fg: ratatui::style::Color) -> Vec<Span<'a>> {
  search::highlight(text, query)
    .into_iter()
    .map(|(part, hit)| {
      if hit {
        Span::styled(part, Style::default().fg(theme.match_fg).bg(theme.match_bg).add_modifier(Modifier::BOLD))
      } else {
        Span::styled(part, Style::default().fg(fg))
      }
    })
    .collect()
}

// --- UI Rendering ---

pub fn ui(frame: &mut Frame, app: &mut App) {
  let theme = app.theme();

  frame.render_widget(Block::default().style(Style::default().bg(theme.bg)), frame.area());

  let [header_area, info_area, main_area, status_area, input_area, footer_area] = Layout::vertical([
    Constraint::Length(1),
    Constraint::Length(1),
    Constraint::Min(3),
    Constraint::Length(1),
    Constraint::Length(3),
    Constraint::Length(1),
  ])
  .areas(frame.area());

  render_header(frame, theme, header_area);
  render_video_info(frame, app, info_area);
  render_main(frame, app, main_area);
  render_status(frame, app, status_area);
  app.mark_error_shown();
  render_input(frame, app, input_area);
  render_footer(frame, app, footer_area);
}

fn render_header(frame: &mut Frame, theme: &Theme, area: Rect) {
  let left = Line::from(Span::styled(" ▶ ytx ", Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)));
  frame.render_widget(left, area);

  render_right(frame, format!("v{} ", env!("CARGO_PKG_VERSION")), theme, area);
}

fn render_video_info(frame: &mut Frame, app: &App, area: Rect) {
  let theme = app.theme();
  let Some(video) = &app.video else { return };

  let clock = format!(" {} / {} ", timestamp::format(video.current_time), timestamp::format(video.duration));
  let language = format!("  {} ", app.selected_language_label());
  let title_w = (area.width as usize).saturating_sub(clock.chars().count() + language.chars().count() + 1);

  let line = Line::from(vec![
    Span::raw(" "),
    Span::styled(truncate_str(&video.title, title_w), Style::default().fg(theme.fg).add_modifier(Modifier::BOLD)),
    Span::styled(clock, Style::default().fg(theme.muted)),
    Span::styled(language, Style::default().fg(theme.accent)),
  ]);
  frame.render_widget(line, area);
}

fn render_main(frame: &mut Frame, app: &mut App, area: Rect) {
  match app.mode {
    AppMode::Languages => render_languages(frame, app, area),
    _ if app.video.is_some() => render_results(frame, app, area),
    _ => render_welcome(frame, app.theme(), area),
  }
}

fn render_welcome(frame: &mut Frame, theme: &Theme, area: Rect) {
  let text = vec![
    Line::from(""),
    Line::from(Span::styled("▶  Welcome to ytx", Style::default().fg(theme.accent).add_modifier(Modifier::BOLD))),
    Line::from(""),
    Line::from(Span::styled("Search what a video says. Jump to the moment.", Style::default().fg(theme.fg))),
    Line::from(""),
    Line::from(Span::styled("Paste a YouTube video URL below and press Enter.", Style::default().fg(theme.muted))),
  ];
  let paragraph = Paragraph::new(text).alignment(Alignment::Center).block(rounded(theme));
  frame.render_widget(paragraph, area);
}

fn render_results(frame: &mut Frame, app: &mut App, area: Rect) {
  let theme = app.theme();
  let query = app.query.trim();
  let alignment = if app.is_rtl() { Alignment::Right } else { Alignment::Left };

  let items: Vec<ListItem> = app
    .results
    .iter()
    .enumerate()
    .map(|(i, entry)| {
      let is_selected = Some(i) == app.list_state.selected();
      let fg = if is_selected { theme.highlight_fg } else { theme.fg };
      let bg = if is_selected {
        theme.highlight_bg
      } else if i % 2 == 1 {
        theme.stripe_bg
      } else {
        theme.bg
      };

      let stamp = format!("{:>6}  ", timestamp::format(entry.time));
      let mut spans = vec![Span::styled(stamp, Style::default().fg(theme.muted))];
      spans.extend(highlighted_spans(&entry.text, query, theme, fg));
      ListItem::new(Line::from(spans).alignment(alignment)).bg(bg)
    })
    .collect();

  let title = if query.is_empty() {
    " Transcript ".to_string()
  } else {
    format!(" Found {} matches ", app.results.len())
  };

  let block = rounded(theme).title(title).title_style(Style::default().fg(theme.accent).add_modifier(Modifier::BOLD));

  if items.is_empty() {
    let hint = Line::from(Span::styled(empty_hint(app.is_loading(), query), Style::default().fg(theme.muted)));
    let paragraph = Paragraph::new(hint).alignment(alignment).block(block);
    frame.render_widget(paragraph, area);
    return;
  }

  let list = List::new(items)
    .block(block)
    .highlight_symbol("▶ ")
    .highlight_style(Style::default().bg(theme.highlight_bg).add_modifier(Modifier::BOLD));

  frame.render_stateful_widget(list, area, &mut app.list_state);
}

fn empty_hint(loading: bool, query: &str) -> String {
  if loading {
    "Loading transcript…".to_string()
  } else if query.is_empty() {
    "Type to search the transcript.".to_string()
  } else {
    format!("No matches found for \"{}\"", query)
  }
}

/// Picker rows as (chosen, label, code); row 0 is the page default.
fn picker_rows(app: &App) -> Vec<(bool, String, &str)> {
  let default = (app.selected_language.is_empty(), app.default_language_label(), "");
  std::iter::once(default)
    .chain(app.languages.iter().map(|l| (l.code == app.selected_language, l.label.clone(), l.code.as_str())))
    .collect()
}

fn render_languages(frame: &mut Frame, app: &mut App, area: Rect) {
  let theme = app.theme();
  let items: Vec<ListItem> = picker_rows(app)
    .into_iter()
    .map(|(chosen, label, code)| {
      let marker = if chosen { "● " } else { "  " };
      ListItem::new(Line::from(vec![
        Span::styled(marker, Style::default().fg(theme.accent)),
        Span::styled(label, Style::default().fg(theme.fg)),
        Span::styled(format!("  {}", code), Style::default().fg(theme.muted)),
      ]))
    })
    .collect();

  let list = List::new(items)
    .block(
      rounded(theme)
        .title(" Transcript language ")
        .title_style(Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)),
    )
    .highlight_symbol("▶ ")
    .highlight_style(Style::default().fg(theme.highlight_fg).bg(theme.highlight_bg).add_modifier(Modifier::BOLD));

  frame.render_stateful_widget(list, area, &mut app.language_state);
}

/// Progress and the last error share the line so neither hides the other.
fn status_line(app: &App) -> Line<'static> {
  let theme = app.theme();
  let mut spans = Vec::new();
  if let Some(msg) = &app.status_message {
    spans.push(Span::styled(format!(" ⏳ {}", msg), Style::default().fg(theme.status)));
  }
  if let Some(err) = &app.last_error {
    spans.push(Span::styled(format!(" ⚠  {}", err), Style::default().fg(theme.error)));
  }
  if spans.is_empty() {
    spans.push(match app.player.last_mpv_status() {
      Some(status) => Span::styled(format!(" ♪ {}", status), Style::default().fg(theme.status)),
      None => Span::styled(" Ready", Style::default().fg(theme.muted)),
    });
  }
  Line::from(spans)
}

fn render_status(frame: &mut Frame, app: &App, area: Rect) {
  frame.render_widget(Paragraph::new(status_line(app)), area);
}

fn render_input(frame: &mut Frame, app: &mut App, area: Rect) {
  let theme = app.theme();
  let editing = matches!(app.mode, AppMode::Url | AppMode::Query);
  let border_color = if editing { theme.accent } else { theme.border };
  let (title, text, cursor) = match app.mode {
    AppMode::Url => (" Video URL ", app.url_input.as_str(), app.url_cursor),
    _ => (" Search transcript ", app.query.as_str(), app.query_cursor),
  };
  let input_block = Block::bordered()
    .title(title)
    .title_style(Style::default().fg(border_color))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(border_color))
    .padding(Padding::horizontal(1));

  let inner_w = area.width.saturating_sub(4) as usize;
  let cursor_col = display_width(text, cursor);
  let scroll = follow_cursor(app.input_scroll, cursor_col, inner_w);

  let paragraph =
    Paragraph::new(visible_window(text, scroll, inner_w)).style(Style::default().fg(theme.fg)).block(input_block);
  frame.render_widget(paragraph, area);
  app.input_scroll = scroll;

  if editing {
    let cursor_x = area.x + 2 + (cursor_col - scroll) as u16;
    frame.set_cursor_position((cursor_x, area.y + 1));
  }
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
  let theme = app.theme();
  let has_results = !app.results.is_empty();
  let has_languages = !app.languages.is_empty();
  let is_playing = app.player.is_playing();
  let keys: Vec<(&str, &str)> = match app.mode {
    AppMode::Url => {
      let mut k = vec![("Enter", "Open"), ("^t", "Theme")];
      if app.video.is_some() {
        k.push(("Esc", "Back"));
      } else {
        k.push(("Esc", "Quit"));
      }
      k
    }
    AppMode::Query => {
      let mut k = vec![("Enter", "Search"), ("^o", "URL")];
      if has_languages {
        k.push(("^l", "Language"));
      }
      if has_results {
        k.push(("↓", "Results"));
      }
      if is_playing {
        k.push(("^s", "Stop"));
      }
      k.push(("^t", "Theme"));
      k.push(("Esc", if app.query.is_empty() { "Quit" } else { "Clear" }));
      k
    }
    AppMode::Results => {
      let mut k = vec![("Enter", "Jump"), ("j/k", "Navigate")];
      if is_playing {
        let pause_label = if app.player.paused { "Resume" } else { "Pause" };
        k.push(("Space", pause_label));
        k.push(("^s", "Stop"));
      }
      k.push(("^t", "Theme"));
      k.push(("Esc", "Back"));
      k
    }
    AppMode::Languages => vec![("Enter", "Select"), ("j/k", "Navigate"), ("Esc", "Back")],
  };

  frame.render_widget(key_hints(&keys, theme), area);
  render_right(frame, format!("{} ", theme.name), theme, area);
}
