//! Conversion between display timestamps (`1:23`, `1:02:03`) and seconds.

/// Parse `m:ss` or `h:mm:ss` into seconds. Fractional seconds in the last
/// field are kept (`0:05.5` → 5.5). Anything else is `None`.
pub fn parse(text: &str) -> Option<f64> {
  let parts: Vec<&str> = text.trim().split(':').collect();
  if !(2..=3).contains(&parts.len()) {
    return None;
  }

  let (last, leading) = parts.split_last()?;
  let secs: f64 = last.parse().ok().filter(|s: &f64| s.is_finite() && *s >= 0.0)?;
  let mut total = 0.0;
  for part in leading {
    let value: u64 = part.parse().ok()?;
    total = total * 60.0 + value as f64;
  }
  Some(total * 60.0 + secs)
}

/// Format seconds as `m:ss`, or `h:mm:ss` once past the hour. Fractions are
/// truncated, negative and non-finite input clamps to zero.
pub fn format(seconds: f64) -> String {
  let total = if seconds.is_finite() && seconds > 0.0 { seconds as u64 } else { 0 };
  let hours = total / 3600;
  let minutes = (total % 3600) / 60;
  let secs = total % 60;
  if hours > 0 { format!("{}:{:02}:{:02}", hours, minutes, secs) } else { format!("{}:{:02}", minutes, secs) }
}
