use ratatui::prelude::Color;
use ratatui::widgets::TableState;

/// Truncate to at most `max_chars` characters, ending in "..." if cut
pub fn truncate(s: &str, max_chars: usize) -> String {
  if s.chars().count() <= max_chars {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Display color for a record status
pub fn status_color(status: &str) -> Color {
  match status {
    "Resolved" | "Closed" | "Done" | "Active" | "Approved" | "Funded" => Color::Green,
    "In Progress" | "Waiting" | "Submitted" | "Prospect" => Color::Yellow,
    "Churned" | "Declined" | "Inactive" => Color::Red,
    _ => Color::White,
  }
}

/// Keep the table selection inside `len` rows.
pub fn ensure_valid_selection(state: &mut TableState, len: usize) {
  match state.selected() {
    _ if len == 0 => state.select(None),
    None => state.select(Some(0)),
    Some(i) if i >= len => state.select(Some(len - 1)),
    Some(_) => {}
  }
}
