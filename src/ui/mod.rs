pub mod components;
mod renderfns;
mod views;

use crate::app::App;
use crate::resources::Collection;
use ratatui::prelude::*;
use ratatui::widgets::{Paragraph, Tabs};

/// Main draw function
pub fn draw(frame: &mut Frame, app: &mut App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Length(1), // Collection tabs
      Constraint::Min(1),    // Main content
      Constraint::Length(1), // Status bar
    ])
    .split(frame.area());

  let sync = app.sync_state();
  renderfns::draw_header(
    frame,
    chunks[0],
    app.title(),
    app.gateway_url(),
    app.user(),
    &sync,
  );

  draw_tabs(frame, chunks[1], app.active());

  let active = app.active();
  let view = app.active_view();
  views::draw_records(frame, chunks[2], active, &view, app.table_state_mut());

  draw_status_bar(frame, chunks[3], app);

  // Overlay last so it sits above the table
  app.command().render_overlay(frame, chunks[2]);
}

fn draw_tabs(frame: &mut Frame, area: Rect, active: Collection) {
  let titles: Vec<&str> = Collection::ALL.iter().map(|c| c.title()).collect();
  let tabs = Tabs::new(titles)
    .select(active.index())
    .style(Style::default().fg(Color::DarkGray))
    .highlight_style(Style::default().fg(Color::Cyan).bold())
    .divider("│");
  frame.render_widget(tabs, area);
}

fn draw_status_bar(frame: &mut Frame, area: Rect, app: &App) {
  let (content, style) = match app.notice() {
    Some(notice) if notice.is_error => (
      format!(" {}", notice.text),
      Style::default().fg(Color::Red),
    ),
    Some(notice) => (format!(" {}", notice.text), Style::default().fg(Color::Green)),
    None => (
      " :command  j/k:nav  h/l:collection  s:next status  r:reload  q:quit".to_string(),
      Style::default().fg(Color::DarkGray),
    ),
  };

  let paragraph = Paragraph::new(renderfns::truncate(&content, area.width as usize)).style(style);
  frame.render_widget(paragraph, area);
}
