//! Small utility helpers used across modules.

/// Collapse inner whitespace and trim, so "  xin   chào " submits as "xin chào".
pub fn normalize_answer(s: &str) -> String {
  s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}
