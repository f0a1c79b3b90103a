use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::api::UserProfile;
use crate::sync::{SyncState, SyncStatus};

/// Draw the header bar: app title, gateway, signed-in user, sync indicator
pub fn draw_header(
  frame: &mut Frame,
  area: Rect,
  title: &str,
  gateway_url: &str,
  user: Option<&UserProfile>,
  sync: &SyncState,
) {
  let user_label = match user {
    Some(u) => format!(" {} ({}) ", u.name, u.role),
    None => " not signed in ".to_string(),
  };

  let mut spans = vec![
    Span::styled(format!(" {} ", title), Style::default().fg(Color::Cyan).bold()),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(
      format!(" {} ", extract_host(gateway_url)),
      Style::default().fg(Color::White),
    ),
    Span::styled("│", Style::default().fg(Color::DarkGray)),
    Span::styled(user_label, Style::default().fg(Color::Yellow)),
  ];

  if let Some(indicator) = sync_indicator(sync) {
    spans.push(Span::styled("│", Style::default().fg(Color::DarkGray)));
    spans.push(indicator);
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}

/// Styled sync status, or nothing while idle.
fn sync_indicator(sync: &SyncState) -> Option<Span<'static>> {
  let message = sync.message.clone().unwrap_or_default();
  let (symbol, color) = match sync.status {
    SyncStatus::Idle => return None,
    SyncStatus::Syncing => ("⟳", Color::Yellow),
    SyncStatus::Success => ("✓", Color::Green),
    SyncStatus::Error => ("✗", Color::Red),
  };
  Some(Span::styled(
    format!(" {} {} ", symbol, message),
    Style::default().fg(color).bold(),
  ))
}

/// Host and port of the gateway URL
fn extract_host(url: &str) -> &str {
  url
    .strip_prefix("https://")
    .or_else(|| url.strip_prefix("http://"))
    .unwrap_or(url)
    .split('/')
    .next()
    .unwrap_or(url)
}
