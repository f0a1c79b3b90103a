//! Resource collections served by the dashboard and their tabular wire shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The five record kinds the dashboard manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
  Tickets,
  Accounts,
  Tasks,
  Contacts,
  Financing,
}

const TICKET_HEADERS: &[&str] = &[
  "id",
  "title",
  "account",
  "priority",
  "status",
  "assignee",
  "created_at",
  "updated_at",
];
const ACCOUNT_HEADERS: &[&str] = &["id", "name", "industry", "owner", "status", "phone", "email"];
const TASK_HEADERS: &[&str] = &["id", "title", "related_to", "assignee", "due_date", "status"];
const CONTACT_HEADERS: &[&str] = &["id", "name", "account", "email", "phone", "status"];
const FINANCING_HEADERS: &[&str] = &[
  "id",
  "account",
  "amount",
  "term_months",
  "rate",
  "status",
  "start_date",
];

impl Collection {
  pub const ALL: [Collection; 5] = [
    Collection::Tickets,
    Collection::Accounts,
    Collection::Tasks,
    Collection::Contacts,
    Collection::Financing,
  ];

  /// Position in [`Collection::ALL`].
  pub fn index(self) -> usize {
    self as usize
  }

  /// Cache key and wire name of the collection.
  pub fn cache_key(self) -> &'static str {
    match self {
      Self::Tickets => "tickets",
      Self::Accounts => "accounts",
      Self::Tasks => "tasks",
      Self::Contacts => "contacts",
      Self::Financing => "financing",
    }
  }

  /// Display title, also used to build the read action name.
  pub fn title(self) -> &'static str {
    match self {
      Self::Tickets => "Tickets",
      Self::Accounts => "Accounts",
      Self::Tasks => "Tasks",
      Self::Contacts => "Contacts",
      Self::Financing => "Financing",
    }
  }

  /// Singular noun used in write action names (`createTicket`, ...).
  pub fn noun(self) -> &'static str {
    match self {
      Self::Tickets => "Ticket",
      Self::Accounts => "Account",
      Self::Tasks => "Task",
      Self::Contacts => "Contact",
      Self::Financing => "Financing",
    }
  }

  pub fn id_prefix(self) -> &'static str {
    match self {
      Self::Tickets => "TCK",
      Self::Accounts => "ACC",
      Self::Tasks => "TSK",
      Self::Contacts => "CON",
      Self::Financing => "FIN",
    }
  }

  /// Column order of the tabular representation. `id` is always first.
  pub fn headers(self) -> &'static [&'static str] {
    match self {
      Self::Tickets => TICKET_HEADERS,
      Self::Accounts => ACCOUNT_HEADERS,
      Self::Tasks => TASK_HEADERS,
      Self::Contacts => CONTACT_HEADERS,
      Self::Financing => FINANCING_HEADERS,
    }
  }

  /// Allowed values of the `status` field, in workflow order.
  pub fn statuses(self) -> &'static [&'static str] {
    match self {
      Self::Tickets => &["New", "In Progress", "Waiting", "Resolved", "Closed"],
      Self::Accounts => &["Prospect", "Active", "Churned"],
      Self::Tasks => &["Open", "In Progress", "Done"],
      Self::Contacts => &["Active", "Inactive"],
      Self::Financing => &["Draft", "Submitted", "Approved", "Funded", "Declined"],
    }
  }

  /// Fields that must be present and non-empty on create.
  pub fn required_fields(self) -> &'static [&'static str] {
    match self {
      Self::Tickets => &["title", "account"],
      Self::Accounts => &["name"],
      Self::Tasks => &["title"],
      Self::Contacts => &["name", "email"],
      Self::Financing => &["account", "amount"],
    }
  }

  /// Status assigned to new records when the caller does not pick one.
  pub fn initial_status(self) -> &'static str {
    self.statuses()[0]
  }

  /// The status after `current` in workflow order, wrapping around.
  pub fn next_status(self, current: &str) -> &'static str {
    let statuses = self.statuses();
    let pos = statuses.iter().position(|s| *s == current);
    match pos {
      Some(i) => statuses[(i + 1) % statuses.len()],
      None => statuses[0],
    }
  }

  pub fn read_action(self) -> String {
    format!("get{}", self.title())
  }

  pub fn from_read_action(action: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|c| c.read_action() == action)
  }

  fn from_noun(noun: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|c| c.noun() == noun)
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.cache_key())
  }
}

impl FromStr for Collection {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_lowercase();
    Self::ALL
      .into_iter()
      .find(|c| c.cache_key() == lower || c.noun().to_lowercase() == lower)
      .ok_or_else(|| format!("unknown collection '{}'", s))
  }
}

/// Kind of write a mutation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
  Create,
  Update,
  Delete,
  StatusChange,
}

impl MutationKind {
  /// Wire action name for this kind on the given collection.
  pub fn action(self, collection: Collection) -> String {
    let noun = collection.noun();
    match self {
      Self::Create => format!("create{}", noun),
      Self::Update => format!("update{}", noun),
      Self::Delete => format!("delete{}", noun),
      Self::StatusChange => format!("update{}Status", noun),
    }
  }

  /// Parse a write action name back into its kind and collection.
  pub fn parse_action(action: &str) -> Option<(Self, Collection)> {
    if let Some(noun) = action.strip_prefix("create") {
      return Collection::from_noun(noun).map(|c| (Self::Create, c));
    }
    if let Some(noun) = action.strip_prefix("delete") {
      return Collection::from_noun(noun).map(|c| (Self::Delete, c));
    }
    let rest = action.strip_prefix("update")?;
    if let Some(noun) = rest.strip_suffix("Status") {
      if let Some(c) = Collection::from_noun(noun) {
        return Some((Self::StatusChange, c));
      }
    }
    Collection::from_noun(rest).map(|c| (Self::Update, c))
  }
}

/// One row of a collection, keyed by header name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
  pub fn new(fields: Map<String, Value>) -> Self {
    Self(fields)
  }

  pub fn id(&self) -> Option<&str> {
    self.0.get("id").and_then(Value::as_str)
  }

  pub fn get(&self, field: &str) -> Option<&Value> {
    self.0.get(field)
  }

  /// Field rendered as display text; missing fields render empty.
  pub fn text(&self, field: &str) -> String {
    match self.0.get(field) {
      None | Some(Value::Null) => String::new(),
      Some(Value::String(s)) => s.clone(),
      Some(other) => other.to_string(),
    }
  }

  pub fn set(&mut self, field: impl Into<String>, value: Value) {
    self.0.insert(field.into(), value);
  }

  /// Overlay `patch` onto this record. The id is never rewritten.
  pub fn merge(&mut self, patch: &Map<String, Value>) {
    for (field, value) in patch {
      if field != "id" {
        self.0.insert(field.clone(), value.clone());
      }
    }
  }

  pub fn fields(&self) -> &Map<String, Value> {
    &self.0
  }
}

/// Tabular representation of a collection: `rows[i][j]` is the value of
/// `headers[j]`. The header row itself never appears among `rows`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
  pub headers: Vec<String>,
  pub rows: Vec<Vec<Value>>,
}

impl Table {
  /// Lay out records in header order. Fields missing from a record become
  /// empty strings, the way a spreadsheet-backed store reports blank cells.
  pub fn from_records(headers: &[&str], records: &[Record]) -> Self {
    let rows = records
      .iter()
      .map(|record| {
        headers
          .iter()
          .map(|h| {
            record
              .get(h)
              .cloned()
              .unwrap_or_else(|| Value::String(String::new()))
          })
          .collect()
      })
      .collect();

    Self {
      headers: headers.iter().map(|h| h.to_string()).collect(),
      rows,
    }
  }

  /// Rebuild records using the headers as field names.
  ///
  /// Short rows are padded with empty strings and surplus cells dropped.
  /// A row that repeats the header names is skipped rather than returned
  /// as data.
  pub fn into_records(self) -> Vec<Record> {
    let Table { headers, rows } = self;
    rows
      .into_iter()
      .filter(|row| !is_header_row(&headers, row))
      .map(|row| {
        let mut cells = row.into_iter();
        let fields = headers
          .iter()
          .map(|h| {
            let value = cells
              .next()
              .unwrap_or_else(|| Value::String(String::new()));
            (h.clone(), value)
          })
          .collect();
        Record(fields)
      })
      .collect()
  }
}

/// A row that repeats the header names cell for cell.
///
/// Not general-purpose header stripping: a data row equal to the headers
/// would be dropped too. That cannot happen for records this crate writes,
/// since every row's `id` cell is a store-assigned `PREFIX-0001` value and
/// never the literal `id`.
fn is_header_row(headers: &[String], row: &[Value]) -> bool {
  !headers.is_empty()
    && row.len() == headers.len()
    && row
      .iter()
      .zip(headers)
      .all(|(cell, h)| cell.as_str() == Some(h.as_str()))
}

/// Client-side and gateway-side input errors, reported per field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
  #[error("{field} is required")]
  MissingField { field: String },
  #[error("{field} is not a {collection} field")]
  UnknownField {
    collection: Collection,
    field: String,
  },
  #[error("'{value}' is not a valid {collection} status")]
  UnknownStatus {
    collection: Collection,
    value: String,
  },
  #[error("record id is required")]
  MissingId,
  #[error("nothing to update")]
  EmptyPatch,
}

impl ValidationError {
  /// Name of the offending field, for field-level display.
  pub fn field(&self) -> &str {
    match self {
      Self::MissingField { field } | Self::UnknownField { field, .. } => field,
      Self::UnknownStatus { .. } => "status",
      Self::MissingId => "id",
      Self::EmptyPatch => "",
    }
  }
}

fn is_blank(value: Option<&Value>) -> bool {
  match value {
    None | Some(Value::Null) => true,
    Some(Value::String(s)) => s.trim().is_empty(),
    Some(_) => false,
  }
}

fn check_known_fields(
  collection: Collection,
  fields: &Map<String, Value>,
) -> Result<(), ValidationError> {
  let headers = collection.headers();
  match fields.keys().find(|k| !headers.contains(&k.as_str())) {
    Some(field) => Err(ValidationError::UnknownField {
      collection,
      field: field.clone(),
    }),
    None => Ok(()),
  }
}

pub fn validate_status(collection: Collection, status: &str) -> Result<(), ValidationError> {
  if collection.statuses().contains(&status) {
    Ok(())
  } else {
    Err(ValidationError::UnknownStatus {
      collection,
      value: status.to_string(),
    })
  }
}

fn check_status_field(
  collection: Collection,
  fields: &Map<String, Value>,
) -> Result<(), ValidationError> {
  match fields.get("status") {
    None => Ok(()),
    Some(Value::String(s)) => validate_status(collection, s),
    Some(other) => Err(ValidationError::UnknownStatus {
      collection,
      value: other.to_string(),
    }),
  }
}

/// Validate the fields of a record about to be created. The id is assigned
/// by the store and must not be supplied.
pub fn validate_new(
  collection: Collection,
  fields: &Map<String, Value>,
) -> Result<(), ValidationError> {
  check_known_fields(collection, fields)?;
  if fields.contains_key("id") {
    return Err(ValidationError::UnknownField {
      collection,
      field: "id".to_string(),
    });
  }
  if let Some(field) = collection
    .required_fields()
    .iter()
    .find(|f| is_blank(fields.get(**f)))
  {
    return Err(ValidationError::MissingField {
      field: field.to_string(),
    });
  }
  check_status_field(collection, fields)
}

/// Validate a partial update of an existing record.
pub fn validate_patch(
  collection: Collection,
  id: &str,
  patch: &Map<String, Value>,
) -> Result<(), ValidationError> {
  if id.trim().is_empty() {
    return Err(ValidationError::MissingId);
  }
  if patch.keys().all(|k| k == "id") {
    return Err(ValidationError::EmptyPatch);
  }
  check_known_fields(collection, patch)?;
  if let Some(field) = collection
    .required_fields()
    .iter()
    .find(|f| patch.contains_key(**f) && is_blank(patch.get(**f)))
  {
    return Err(ValidationError::MissingField {
      field: field.to_string(),
    });
  }
  check_status_field(collection, patch)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn record(value: Value) -> Record {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_action_names_round_trip() {
    for collection in Collection::ALL {
      assert_eq!(
        Collection::from_read_action(&collection.read_action()),
        Some(collection)
      );
      for kind in [
        MutationKind::Create,
        MutationKind::Update,
        MutationKind::Delete,
        MutationKind::StatusChange,
      ] {
        assert_eq!(
          MutationKind::parse_action(&kind.action(collection)),
          Some((kind, collection))
        );
      }
    }
  }

  #[test]
  fn test_known_action_names() {
    assert_eq!(Collection::Tickets.read_action(), "getTickets");
    assert_eq!(
      MutationKind::StatusChange.action(Collection::Financing),
      "updateFinancingStatus"
    );
    assert_eq!(MutationKind::parse_action("updateWidget"), None);
    assert_eq!(MutationKind::parse_action("getTickets"), None);
  }

  #[test]
  fn test_index_matches_all() {
    for (i, collection) in Collection::ALL.into_iter().enumerate() {
      assert_eq!(collection.index(), i);
    }
  }

  #[test]
  fn test_collection_from_str() {
    assert_eq!("tickets".parse::<Collection>(), Ok(Collection::Tickets));
    assert_eq!("Account".parse::<Collection>(), Ok(Collection::Accounts));
    assert!("widgets".parse::<Collection>().is_err());
  }

  #[test]
  fn test_next_status_wraps() {
    assert_eq!(Collection::Tickets.next_status("New"), "In Progress");
    assert_eq!(Collection::Tickets.next_status("Closed"), "New");
    assert_eq!(Collection::Tasks.next_status("bogus"), "Open");
  }

  #[test]
  fn test_table_round_trip() {
    let headers = Collection::Contacts.headers();
    let records = vec![
      record(json!({
        "id": "CON-0001", "name": "Ada", "account": "ACC-0001",
        "email": "ada@example.com", "phone": "555-0100", "status": "Active"
      })),
      record(json!({
        "id": "CON-0002", "name": "Grace", "account": "ACC-0002",
        "email": "grace@example.com", "phone": "", "status": "Inactive"
      })),
    ];

    let table = Table::from_records(headers, &records);
    assert_eq!(table.headers.len(), headers.len());
    assert_eq!(table.rows.len(), 2);
    assert!(table.rows.iter().all(|r| r.len() == headers.len()));

    assert_eq!(table.into_records(), records);
  }

  #[test]
  fn test_table_skips_header_row_and_pads_short_rows() {
    let table = Table {
      headers: vec!["id".into(), "name".into(), "status".into()],
      rows: vec![
        vec![json!("id"), json!("name"), json!("status")],
        vec![json!("ACC-0001"), json!("Initech")],
      ],
    };

    let records = table.into_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id(), Some("ACC-0001"));
    assert_eq!(records[0].text("status"), "");
  }

  #[test]
  fn test_row_with_store_id_is_never_a_header_row() {
    let table = Table {
      headers: vec!["id".into(), "name".into(), "status".into()],
      rows: vec![vec![json!("ACC-0007"), json!("name"), json!("status")]],
    };

    let records = table.into_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].text("name"), "name");
  }

  #[test]
  fn test_merge_keeps_id() {
    let mut rec = record(json!({"id": "TCK-0001", "status": "New"}));
    let patch = json!({"id": "TCK-9999", "status": "In Progress"});
    rec.merge(patch.as_object().unwrap());
    assert_eq!(rec.id(), Some("TCK-0001"));
    assert_eq!(rec.text("status"), "In Progress");
  }

  #[test]
  fn test_validate_new_requires_fields() {
    let fields = json!({"title": "Printer on fire"});
    let err = validate_new(Collection::Tickets, fields.as_object().unwrap()).unwrap_err();
    assert_eq!(err.field(), "account");

    let fields = json!({"title": "Printer on fire", "account": "ACC-0001"});
    assert!(validate_new(Collection::Tickets, fields.as_object().unwrap()).is_ok());
  }

  #[test]
  fn test_validate_new_rejects_id_and_unknown_fields() {
    let fields = json!({"id": "TCK-1", "title": "x", "account": "y"});
    assert!(validate_new(Collection::Tickets, fields.as_object().unwrap()).is_err());

    let fields = json!({"title": "x", "account": "y", "color": "red"});
    let err = validate_new(Collection::Tickets, fields.as_object().unwrap()).unwrap_err();
    assert_eq!(err.field(), "color");
  }

  #[test]
  fn test_validate_patch() {
    let patch = json!({"status": "Escalated"});
    let err = validate_patch(Collection::Tickets, "TCK-1", patch.as_object().unwrap()).unwrap_err();
    assert!(matches!(err, ValidationError::UnknownStatus { .. }));

    let patch = json!({"title": "  "});
    let err = validate_patch(Collection::Tickets, "TCK-1", patch.as_object().unwrap()).unwrap_err();
    assert_eq!(err.field(), "title");

    let patch = json!({"status": "Waiting"});
    assert_eq!(
      validate_patch(Collection::Tickets, "", patch.as_object().unwrap()),
      Err(ValidationError::MissingId)
    );
    assert_eq!(
      validate_patch(Collection::Tickets, "TCK-1", &Map::new()),
      Err(ValidationError::EmptyPatch)
    );
  }
}
