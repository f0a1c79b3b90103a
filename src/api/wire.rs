use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::resources::{Collection, MutationKind};

/// Response envelope. The HTTP status is always 200; `status` carries the
/// outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub enum Envelope<T> {
  Success {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
  },
  Error {
    message: String,
  },
}

impl<T> Envelope<T> {
  pub fn data(data: T) -> Self {
    Self::Success {
      data: Some(data),
      message: None,
    }
  }

  pub fn message(message: impl Into<String>) -> Self {
    Self::Success {
      data: None,
      message: Some(message.into()),
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self::Error {
      message: message.into(),
    }
  }

  /// Unwrap into the payload, or the server's error message.
  pub fn into_result(self) -> Result<Option<T>, String> {
    match self {
      Self::Success { data, .. } => Ok(data),
      Self::Error { message } => Err(message),
    }
  }
}

/// Body of a write request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
  pub action: String,
  #[serde(default)]
  pub payload: Map<String, Value>,
}

/// Query string of a read request. `code` and `role` are only used by
/// `login`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadQuery {
  pub action: Option<String>,
  pub code: Option<String>,
  pub role: Option<String>,
}

/// Who is signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
  pub name: String,
  pub role: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
}

/// A write against one collection, in the shape the client submits it.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
  pub kind: MutationKind,
  pub collection: Collection,
  /// Record the write targets. `None` only for creates.
  pub target_id: Option<String>,
  /// Fields to write, never including `id`.
  pub payload: Map<String, Value>,
}

impl Mutation {
  pub fn create(collection: Collection, fields: Map<String, Value>) -> Self {
    Self {
      kind: MutationKind::Create,
      collection,
      target_id: None,
      payload: fields,
    }
  }

  pub fn update(collection: Collection, id: impl Into<String>, patch: Map<String, Value>) -> Self {
    Self {
      kind: MutationKind::Update,
      collection,
      target_id: Some(id.into()),
      payload: patch,
    }
  }

  pub fn delete(collection: Collection, id: impl Into<String>) -> Self {
    Self {
      kind: MutationKind::Delete,
      collection,
      target_id: Some(id.into()),
      payload: Map::new(),
    }
  }

  pub fn status_change(
    collection: Collection,
    id: impl Into<String>,
    status: impl Into<String>,
  ) -> Self {
    let mut payload = Map::new();
    payload.insert("status".to_string(), Value::String(status.into()));
    Self {
      kind: MutationKind::StatusChange,
      collection,
      target_id: Some(id.into()),
      payload,
    }
  }

  pub fn action(&self) -> String {
    self.kind.action(self.collection)
  }

  /// Status value of a status change.
  pub fn status(&self) -> Option<&str> {
    self.payload.get("status").and_then(Value::as_str)
  }

  /// Encode for the wire: the target id travels inside the payload.
  pub fn to_request(&self) -> WriteRequest {
    let mut payload = Map::new();
    if let Some(id) = &self.target_id {
      payload.insert("id".to_string(), Value::String(id.clone()));
    }
    for (field, value) in &self.payload {
      payload.insert(field.clone(), value.clone());
    }
    WriteRequest {
      action: self.action(),
      payload,
    }
  }

  /// Decode a write request received by the gateway.
  pub fn from_request(request: WriteRequest) -> Result<Self, String> {
    let (kind, collection) = MutationKind::parse_action(&request.action)
      .ok_or_else(|| format!("Unknown action: {}", request.action))?;

    let mut payload = request.payload;
    let target_id = match payload.remove("id") {
      None | Some(Value::Null) => None,
      Some(Value::String(id)) => Some(id),
      Some(other) => Some(other.to_string()),
    };

    if kind == MutationKind::Create {
      if target_id.is_some() {
        return Err("id is assigned by the store and must not be sent on create".to_string());
      }
    } else if target_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
      return Err("record id is required".to_string());
    }

    Ok(Self {
      kind,
      collection,
      target_id,
      payload,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_envelope_shapes() {
    let ok: Envelope<Value> = Envelope::data(json!({"headers": [], "rows": []}));
    assert_eq!(
      serde_json::to_value(&ok).unwrap(),
      json!({"status": "success", "data": {"headers": [], "rows": []}})
    );

    let saved: Envelope<Value> = Envelope::message("Ticket updated");
    assert_eq!(
      serde_json::to_value(&saved).unwrap(),
      json!({"status": "success", "message": "Ticket updated"})
    );

    let err: Envelope<Value> = Envelope::error("Unknown action: getWidgets");
    assert_eq!(
      serde_json::to_value(&err).unwrap(),
      json!({"status": "error", "message": "Unknown action: getWidgets"})
    );
  }

  #[test]
  fn test_envelope_parses_bare_success() {
    let env: Envelope<Value> = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
    assert_eq!(env.into_result(), Ok(None));
  }

  #[test]
  fn test_status_change_request() {
    let mutation = Mutation::status_change(Collection::Tickets, "TCK-0042", "Resolved");
    let request = mutation.to_request();

    assert_eq!(request.action, "updateTicketStatus");
    assert_eq!(
      Value::Object(request.payload.clone()),
      json!({"id": "TCK-0042", "status": "Resolved"})
    );
    assert_eq!(Mutation::from_request(request), Ok(mutation));
  }

  #[test]
  fn test_from_request_checks_id() {
    let missing = WriteRequest {
      action: "deleteAccount".into(),
      payload: Map::new(),
    };
    assert!(Mutation::from_request(missing).is_err());

    let create_with_id = WriteRequest {
      action: "createTask".into(),
      payload: json!({"id": "TSK-1", "title": "x"}).as_object().cloned().unwrap(),
    };
    assert!(Mutation::from_request(create_with_id).is_err());

    let unknown = WriteRequest {
      action: "archiveTicket".into(),
      payload: Map::new(),
    };
    assert_eq!(
      Mutation::from_request(unknown),
      Err("Unknown action: archiveTicket".to_string())
    );
  }
}
