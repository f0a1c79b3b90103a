use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState};

use crate::resources::Collection;
use crate::sync::{CollectionView, LoadState};
use crate::ui::renderfns::{ensure_valid_selection, status_color, truncate};

const CELL_MAX: usize = 40;

/// Draw one collection as a table, or its loading/empty/error placeholder
pub fn draw_records(
  frame: &mut Frame,
  area: Rect,
  collection: Collection,
  view: &CollectionView,
  state: &mut TableState,
) {
  ensure_valid_selection(state, view.records.len());

  let title = match &view.load {
    LoadState::Loading => format!(" {} (loading...) ", collection.title()),
    LoadState::Failed(e) => format!(" {} (error: {}) ", collection.title(), truncate(e, 60)),
    LoadState::Ready => format!(" {} ({}) ", collection.title(), view.records.len()),
  };

  let mut block = Block::default()
    .title(title)
    .title_alignment(Alignment::Center)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  if let Some(e) = &view.refresh_error {
    block = block.title_bottom(
      Line::styled(format!(" {} ", truncate(e, 80)), Style::default().fg(Color::Red))
        .right_aligned(),
    );
  }

  if view.records.is_empty() {
    let content = match view.load {
      LoadState::Loading => "Loading...",
      LoadState::Failed(_) => "Failed to load. Press 'r' to retry.",
      LoadState::Ready => "No records. Use :new field=value ... to add one.",
    };
    let paragraph = Paragraph::new(content)
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let headers = collection.headers();
  let header = Row::new(
    headers
      .iter()
      .map(|h| Cell::from(h.replace('_', " ")).style(Style::default().fg(Color::Cyan).bold())),
  );

  let rows = view.records.iter().map(|record| {
    Row::new(headers.iter().map(|h| {
      let text = truncate(&record.text(h), CELL_MAX);
      match *h {
        "id" => Cell::from(text).style(Style::default().fg(Color::Cyan)),
        "status" => {
          let color = status_color(&text);
          Cell::from(text).style(Style::default().fg(color))
        }
        _ => Cell::from(text),
      }
    }))
  });

  let widths = headers.iter().map(|h| match *h {
    "id" => Constraint::Length(10),
    "status" => Constraint::Length(12),
    _ => Constraint::Fill(1),
  });

  let table = Table::new(rows, widths)
    .header(header)
    .block(block)
    .row_highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

  frame.render_stateful_widget(table, area, state);
}
