use super::input::{InputResult, TextInput};
use super::KeyResult;
use crate::commands::{self, Command};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph};

/// Events emitted by command input that parent needs to handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
  /// Command line submitted
  Submitted(String),
  Cancelled,
}

/// `:` command line with autocomplete on the command word
#[derive(Debug, Clone, Default)]
pub struct CommandInput {
  input: TextInput,
  active: bool,
  selected_suggestion: usize,
}

impl CommandInput {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  pub fn activate(&mut self) {
    self.active = true;
    self.input.clear();
    self.selected_suggestion = 0;
  }

  fn close(&mut self) {
    self.active = false;
    self.input.clear();
    self.selected_suggestion = 0;
  }

  /// Suggestions are only offered while the command word is being typed.
  pub fn suggestions(&self) -> Vec<&'static Command> {
    if self.has_arguments() {
      return Vec::new();
    }
    commands::get_suggestions(self.input.value())
  }

  fn has_arguments(&self) -> bool {
    self.input.value().trim_start().contains(char::is_whitespace)
  }

  /// Call this regardless of active state - it handles activation too
  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<CommandEvent> {
    if !self.active {
      if key.code == KeyCode::Char(':') {
        self.activate();
        return KeyResult::Handled;
      }
      return KeyResult::NotHandled;
    }

    match key.code {
      KeyCode::Esc => {
        self.close();
        return KeyResult::Event(CommandEvent::Cancelled);
      }
      KeyCode::Enter => {
        let line = self.resolve_command();
        self.close();
        return KeyResult::Event(CommandEvent::Submitted(line));
      }
      KeyCode::Tab => {
        // Complete the highlighted command so arguments can follow
        let suggestions = self.suggestions();
        if let Some(cmd) = suggestions.get(self.selected_suggestion) {
          self.input.set_value(&format!("{} ", cmd.name));
          self.selected_suggestion = 0;
        }
        return KeyResult::Handled;
      }
      KeyCode::Down => {
        let count = self.suggestions().len();
        if count > 0 {
          self.selected_suggestion = (self.selected_suggestion + 1) % count;
        }
        return KeyResult::Handled;
      }
      KeyCode::Up => {
        let count = self.suggestions().len();
        if count > 0 {
          self.selected_suggestion = (self.selected_suggestion + count - 1) % count;
        }
        return KeyResult::Handled;
      }
      _ => {}
    }

    match self.input.handle_key(key) {
      InputResult::Consumed => {
        self.selected_suggestion = 0; // Reset on input change
        KeyResult::Handled
      }
      InputResult::Submitted(_) | InputResult::Cancelled => KeyResult::Handled,
      InputResult::NotHandled => KeyResult::NotHandled,
    }
  }

  /// A bare word resolves through the highlighted suggestion; a line with
  /// arguments is passed through as typed.
  fn resolve_command(&self) -> String {
    if self.has_arguments() {
      return self.input.value().trim().to_string();
    }
    let suggestions = self.suggestions();
    match suggestions.get(self.selected_suggestion) {
      Some(cmd) if !self.input.is_empty() => cmd.name.to_string(),
      _ => self.input.value().trim().to_lowercase(),
    }
  }

  /// Render the command overlay if active
  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    if !self.active {
      return;
    }

    let suggestions = self.suggestions();
    let shown = suggestions.len().min(8) as u16;

    let width = (area.width * 60 / 100).clamp(30, 72).min(area.width);
    let height = (3 + shown).min(area.height);
    let overlay_area = Rect::new(area.x + 1, area.y + 1, width.saturating_sub(1), height);

    frame.render_widget(Clear, overlay_area);

    let block = Block::default()
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Yellow))
      .title(" Command ");

    let inner = block.inner(overlay_area);
    frame.render_widget(block, overlay_area);

    if inner.height == 0 {
      return;
    }

    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([
        Constraint::Length(1), // Input line
        Constraint::Min(0),    // Suggestions
      ])
      .split(inner);

    let (before, after) = self.input.split_at_cursor();
    let input_line = Line::from(vec![
      Span::styled(":", Style::default().fg(Color::Yellow)),
      Span::raw(before),
      Span::styled("▏", Style::default().fg(Color::Yellow)), // Cursor
      Span::raw(after),
    ]);
    frame.render_widget(Paragraph::new(input_line), chunks[0]);

    if !suggestions.is_empty() && chunks[1].height > 0 {
      let items: Vec<ListItem> = suggestions
        .iter()
        .take(8)
        .map(|cmd| {
          ListItem::new(Line::from(vec![
            Span::styled(
              format!("{:<10}", cmd.name),
              Style::default().fg(Color::Cyan),
            ),
            Span::styled(cmd.description, Style::default().fg(Color::DarkGray)),
          ]))
        })
        .collect();

      let list =
        List::new(items).highlight_style(Style::default().bg(Color::DarkGray).fg(Color::White));

      let mut state = ListState::default();
      state.select(Some(self.selected_suggestion));

      frame.render_stateful_widget(list, chunks[1], &mut state);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyModifiers;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  fn type_line(cmd: &mut CommandInput, text: &str) {
    cmd.handle_key(key(KeyCode::Char(':')));
    for c in text.chars() {
      cmd.handle_key(key(KeyCode::Char(c)));
    }
  }

  #[test]
  fn test_inactive_ignores_keys() {
    let mut cmd = CommandInput::new();
    assert_eq!(cmd.handle_key(key(KeyCode::Char('j'))), KeyResult::NotHandled);
    assert!(!cmd.is_active());
  }

  #[test]
  fn test_bare_word_resolves_to_suggestion() {
    let mut cmd = CommandInput::new();
    type_line(&mut cmd, "acc");
    assert_eq!(
      cmd.handle_key(key(KeyCode::Enter)),
      KeyResult::Event(CommandEvent::Submitted("accounts".into()))
    );
    assert!(!cmd.is_active());
  }

  #[test]
  fn test_arguments_are_kept() {
    let mut cmd = CommandInput::new();
    type_line(&mut cmd, "set priority=High");
    assert!(cmd.suggestions().is_empty());
    assert_eq!(
      cmd.handle_key(key(KeyCode::Enter)),
      KeyResult::Event(CommandEvent::Submitted("set priority=High".into()))
    );
  }

  #[test]
  fn test_tab_completes_command_word() {
    let mut cmd = CommandInput::new();
    type_line(&mut cmd, "sta");
    cmd.handle_key(key(KeyCode::Tab));
    for c in "Done".chars() {
      cmd.handle_key(key(KeyCode::Char(c)));
    }
    assert_eq!(
      cmd.handle_key(key(KeyCode::Enter)),
      KeyResult::Event(CommandEvent::Submitted("status Done".into()))
    );
  }

  #[test]
  fn test_escape_cancels() {
    let mut cmd = CommandInput::new();
    type_line(&mut cmd, "delete");
    assert_eq!(
      cmd.handle_key(key(KeyCode::Esc)),
      KeyResult::Event(CommandEvent::Cancelled)
    );
    assert!(!cmd.is_active());
  }
}
