use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::Duration;
use tokio::sync::mpsc;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Periodic tick for UI refresh
  Tick,
  /// Outcome of a background write or reload, for the status line
  Notice(Notice),
}

/// One line of feedback for the status bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub text: String,
  pub is_error: bool,
}

impl Notice {
  pub fn info(text: impl Into<String>) -> Self {
    Self {
      text: text.into(),
      is_error: false,
    }
  }

  pub fn error(text: impl Into<String>) -> Self {
    Self {
      text: text.into(),
      is_error: true,
    }
  }
}

/// Event handler that produces events from terminal input and a tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Terminal polling blocks, so it gets its own thread
    let input_tx = tx.clone();
    tokio::task::spawn_blocking(move || loop {
      let event = if event::poll(tick_rate).unwrap_or(false) {
        match event::read() {
          Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => Event::Key(key),
          Ok(_) | Err(_) => continue,
        }
      } else {
        Event::Tick
      };
      if input_tx.send(event).is_err() {
        break;
      }
    });

    Self { tx, rx }
  }

  /// Sender for background tasks reporting back to the UI loop
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
