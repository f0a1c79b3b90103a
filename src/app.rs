use crate::api::UserProfile;
use crate::commands::{self, Action};
use crate::config::Config;
use crate::event::{Event, EventHandler, Notice};
use crate::resources::{Collection, Record};
use crate::sync::{CollectionView, Dashboard, MutationError, SyncState};
use crate::ui;
use crate::ui::components::{CommandEvent, CommandInput, KeyResult};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use ratatui::widgets::TableState;
use serde_json::{Map, Value};
use std::future::Future;
use std::io::{stdout, Stdout};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Main application state
pub struct App {
  config: Config,
  dashboard: Dashboard,
  user: Option<UserProfile>,

  /// Collection shown in the table
  active: Collection,
  /// Selection per collection, indexed by `Collection::index`
  tables: [TableState; 5],

  command: CommandInput,
  /// Latest feedback line from a command or background write
  notice: Option<Notice>,

  sync: watch::Receiver<SyncState>,
  /// Event sender for async tasks, set once the loop starts
  event_tx: Option<mpsc::UnboundedSender<Event>>,

  should_quit: bool,
}

impl App {
  pub fn new(config: Config, dashboard: Dashboard, user: Option<UserProfile>) -> Self {
    let sync = dashboard.sync().subscribe();
    Self {
      config,
      dashboard,
      user,
      active: Collection::Tickets,
      tables: Default::default(),
      command: CommandInput::new(),
      notice: None,
      sync,
      event_tx: None,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = Some(events.sender());

    self.load_all();
    let result = self.event_loop(&mut terminal, &mut events).await;

    // Restore the terminal even when the loop failed
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn event_loop(
    &mut self,
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    events: &mut EventHandler,
  ) -> Result<()> {
    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }
    Ok(())
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {} // Views are read fresh on every draw
      Event::Notice(notice) => self.notice = Some(notice),
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    match self.command.handle_key(key) {
      KeyResult::Event(CommandEvent::Submitted(line)) => return self.execute_command(&line),
      KeyResult::Event(CommandEvent::Cancelled) | KeyResult::Handled => return,
      KeyResult::NotHandled => {}
    }

    match key.code {
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }

      // Navigation
      KeyCode::Down | KeyCode::Char('j') => self.table_state_mut().select_next(),
      KeyCode::Up | KeyCode::Char('k') => self.table_state_mut().select_previous(),
      KeyCode::Right | KeyCode::Tab | KeyCode::Char('l') => self.cycle_collection(1),
      KeyCode::Left | KeyCode::BackTab | KeyCode::Char('h') => self.cycle_collection(-1),

      // Writes and reads
      KeyCode::Char('s') => self.cycle_status(),
      KeyCode::Char('r') => self.reload(),
      KeyCode::Esc => self.notice = None,

      _ => {}
    }
  }

  fn execute_command(&mut self, line: &str) {
    let action = match commands::parse(line) {
      Ok(action) => action,
      Err(e) => return self.notify(Notice::error(e)),
    };

    match action {
      Action::Show(collection) => self.active = collection,
      Action::Create(fields) => self.create(fields),
      Action::Edit(patch) => self.edit(patch),
      Action::Status(status) => {
        let status = canonical_status(self.active, &status);
        self.set_status(status);
      }
      Action::Delete => self.delete(),
      Action::Reload => self.reload(),
      Action::Quit => self.should_quit = true,
    }
  }

  fn cycle_collection(&mut self, delta: i32) {
    let count = Collection::ALL.len() as i32;
    let next = (self.active.index() as i32 + delta).rem_euclid(count) as usize;
    self.active = Collection::ALL[next];
  }

  fn notify(&mut self, notice: Notice) {
    self.notice = Some(notice);
  }

  fn send_notice(tx: &Option<mpsc::UnboundedSender<Event>>, notice: Notice) {
    if let Some(tx) = tx {
      let _ = tx.send(Event::Notice(notice));
    }
  }

  fn load_all(&self) {
    let dashboard = self.dashboard.clone();
    tokio::spawn(async move { dashboard.load_all().await });
  }

  fn reload(&mut self) {
    let records = self.dashboard.collection(self.active).clone();
    let tx = self.event_tx.clone();
    let title = self.active.title();
    self.notify(Notice::info(format!("Reloading {}...", title)));

    tokio::spawn(async move {
      let notice = match records.load().await {
        Ok(()) => Notice::info(format!("{} reloaded", title)),
        Err(e) => Notice::error(format!("Reload failed: {}", e)),
      };
      Self::send_notice(&tx, notice);
    });
  }

  /// Run a write in the background and report how it ended.
  fn spawn_write<Fut>(&self, done: String, write: Fut)
  where
    Fut: Future<Output = std::result::Result<(), MutationError>> + Send + 'static,
  {
    let tx = self.event_tx.clone();
    tokio::spawn(async move {
      let notice = match write.await {
        Ok(()) => Notice::info(done),
        Err(MutationError::Invalid(e)) => Notice::error(format!("Not saved: {}", e)),
        // The sync indicator already shows the failure
        Err(MutationError::Rejected(e)) => Notice::error(format!("Reverted: {}", e)),
      };
      Self::send_notice(&tx, notice);
    });
  }

  fn selected_record(&self) -> Option<Record> {
    let selected = self.tables[self.active.index()].selected()?;
    self.active_view().records.get(selected).cloned()
  }

  fn selected_id(&mut self) -> Option<String> {
    let id = self
      .selected_record()
      .and_then(|r| r.id().map(str::to_string));
    if id.is_none() {
      self.notify(Notice::error("No record selected"));
    }
    id
  }

  fn create(&mut self, fields: Map<String, Value>) {
    let records = self.dashboard.collection(self.active).clone();
    let done = format!("{} created", self.active.noun());
    info!(collection = %self.active, "create requested");
    self.spawn_write(done, async move { records.create(fields).await });
  }

  fn edit(&mut self, patch: Map<String, Value>) {
    let Some(id) = self.selected_id() else {
      return;
    };
    let records = self.dashboard.collection(self.active).clone();
    self.spawn_write(format!("{} saved", id), async move {
      records.update(&id, patch).await
    });
  }

  fn set_status(&mut self, status: String) {
    let Some(id) = self.selected_id() else {
      return;
    };
    let records = self.dashboard.collection(self.active).clone();
    self.spawn_write(format!("{} is now {}", id, status), async move {
      records.set_status(&id, &status).await
    });
  }

  fn cycle_status(&mut self) {
    let Some(record) = self.selected_record() else {
      return self.notify(Notice::error("No record selected"));
    };
    let next = self.active.next_status(&record.text("status"));
    self.set_status(next.to_string());
  }

  fn delete(&mut self) {
    let Some(id) = self.selected_id() else {
      return;
    };
    let records = self.dashboard.collection(self.active).clone();
    self.spawn_write(format!("{} deleted", id), async move {
      records.delete(&id).await
    });
  }

  // Accessors for UI rendering
  pub fn title(&self) -> &str {
    self.config.title()
  }

  pub fn gateway_url(&self) -> &str {
    &self.config.client.url
  }

  pub fn user(&self) -> Option<&UserProfile> {
    self.user.as_ref()
  }

  pub fn sync_state(&self) -> SyncState {
    self.sync.borrow().clone()
  }

  pub fn active(&self) -> Collection {
    self.active
  }

  pub fn active_view(&self) -> CollectionView {
    self.dashboard.collection(self.active).view()
  }

  pub fn table_state_mut(&mut self) -> &mut TableState {
    &mut self.tables[self.active.index()]
  }

  pub fn command(&self) -> &CommandInput {
    &self.command
  }

  pub fn notice(&self) -> Option<&Notice> {
    self.notice.as_ref()
  }
}

/// Match a typed status against the collection's list, ignoring case.
/// Unknown values pass through for validation to reject.
fn canonical_status(collection: Collection, typed: &str) -> String {
  collection
    .statuses()
    .iter()
    .find(|s| s.eq_ignore_ascii_case(typed.trim()))
    .map(|s| s.to_string())
    .unwrap_or_else(|| typed.trim().to_string())
}
