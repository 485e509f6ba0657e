use ratatui::style::Color;

#[derive(Debug)]
pub struct Theme {
  pub name: &'static str,
  pub bg: Color,
  pub fg: Color,
  pub accent: Color,
  pub muted: Color,
  pub border: Color,
  pub highlight_fg: Color,
  pub highlight_bg: Color,
  /// Background for odd result rows.
  pub stripe_bg: Color,
  pub status: Color,
  pub error: Color,
  /// Matched query text inside a transcript line.
  pub match_fg: Color,
  pub match_bg: Color,
  pub key_fg: Color,
  pub key_bg: Color,
}

pub static THEMES: [Theme; 3] = [
  Theme {
    name: "paper",
    bg: Color::Rgb(250, 247, 240),
    fg: Color::Rgb(60, 56, 54),
    accent: Color::Rgb(204, 36, 29),
    muted: Color::Rgb(146, 131, 116),
    border: Color::Rgb(213, 196, 161),
    highlight_fg: Color::Rgb(250, 247, 240),
    highlight_bg: Color::Rgb(69, 133, 136),
    stripe_bg: Color::Rgb(242, 236, 222),
    status: Color::Rgb(121, 116, 14),
    error: Color::Rgb(157, 0, 6),
    match_fg: Color::Rgb(40, 40, 40),
    match_bg: Color::Rgb(250, 189, 47),
    key_fg: Color::Rgb(250, 247, 240),
    key_bg: Color::Rgb(102, 92, 84),
  },
  Theme {
    name: "night",
    bg: Color::Rgb(29, 32, 33),
    fg: Color::Rgb(235, 219, 178),
    accent: Color::Rgb(251, 73, 52),
    muted: Color::Rgb(146, 131, 116),
    border: Color::Rgb(80, 73, 69),
    highlight_fg: Color::Rgb(29, 32, 33),
    highlight_bg: Color::Rgb(131, 165, 152),
    stripe_bg: Color::Rgb(40, 40, 40),
    status: Color::Rgb(184, 187, 38),
    error: Color::Rgb(251, 73, 52),
    match_fg: Color::Rgb(29, 32, 33),
    match_bg: Color::Rgb(250, 189, 47),
    key_fg: Color::Rgb(29, 32, 33),
    key_bg: Color::Rgb(168, 153, 132),
  },
  Theme {
    name: "terminal",
    bg: Color::Reset,
    fg: Color::Reset,
    accent: Color::Red,
    muted: Color::DarkGray,
    border: Color::Gray,
    highlight_fg: Color::Black,
    highlight_bg: Color::Cyan,
    stripe_bg: Color::Reset,
    status: Color::Green,
    error: Color::LightRed,
    match_fg: Color::Black,
    match_bg: Color::Yellow,
    key_fg: Color::Black,
    key_bg: Color::Gray,
  },
];

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn theme_names_are_unique() {
    for (i, theme) in THEMES.iter().enumerate() {
      assert!(THEMES.iter().skip(i + 1).all(|other| other.name != theme.name));
    }
  }
}
