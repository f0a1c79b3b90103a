//! Available commands, autocomplete, and argument parsing

use serde_json::{Map, Value};

use crate::resources::Collection;

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "tickets",
    aliases: &["t", "ticket"],
    description: "Support tickets",
  },
  Command {
    name: "accounts",
    aliases: &["a", "account"],
    description: "Customer accounts",
  },
  Command {
    name: "tasks",
    aliases: &["task", "todo"],
    description: "Follow-up tasks",
  },
  Command {
    name: "contacts",
    aliases: &["c", "contact"],
    description: "People at accounts",
  },
  Command {
    name: "financing",
    aliases: &["f", "fin"],
    description: "Financing applications",
  },
  Command {
    name: "new",
    aliases: &["n", "create", "add"],
    description: "new field=value ... create a record",
  },
  Command {
    name: "set",
    aliases: &["edit", "update"],
    description: "set field=value ... edit selected record",
  },
  Command {
    name: "status",
    aliases: &["st"],
    description: "status <value> on selected record",
  },
  Command {
    name: "delete",
    aliases: &["del", "rm"],
    description: "Delete selected record",
  },
  Command {
    name: "reload",
    aliases: &["r", "refresh"],
    description: "Reload current collection",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Exit recdash",
  },
];

/// Get autocomplete suggestions for a given input.
///
/// Only the command word is matched; arguments after it are ignored.
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input
    .split_whitespace()
    .next()
    .unwrap_or_default()
    .to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// A submitted command line, resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
  Show(Collection),
  Create(Map<String, Value>),
  Edit(Map<String, Value>),
  Status(String),
  Delete,
  Reload,
  Quit,
}

fn lookup(word: &str) -> Option<&'static Command> {
  let word = word.to_lowercase();
  COMMANDS
    .iter()
    .find(|c| c.name == word || c.aliases.contains(&word.as_str()))
}

/// Parse a command line such as `set priority=High assignee=sam`.
pub fn parse(line: &str) -> Result<Action, String> {
  let line = line.trim();
  let (word, args) = match line.split_once(char::is_whitespace) {
    Some((word, args)) => (word, args.trim()),
    None => (line, ""),
  };
  if word.is_empty() {
    return Err("empty command".to_string());
  }

  let cmd = lookup(word).ok_or_else(|| format!("unknown command '{}'", word))?;

  match cmd.name {
    "new" => parse_assignments(args).map(Action::Create),
    "set" => parse_assignments(args).map(Action::Edit),
    "status" if args.is_empty() => Err("usage: status <value>".to_string()),
    "status" => Ok(Action::Status(args.to_string())),
    "delete" => Ok(Action::Delete),
    "reload" => Ok(Action::Reload),
    "quit" => Ok(Action::Quit),
    name => name.parse().map(Action::Show),
  }
}

/// Parse `field=value` pairs. A word without `=` continues the previous
/// value, so `title=Printer on fire` sets one field.
pub fn parse_assignments(args: &str) -> Result<Map<String, Value>, String> {
  let mut fields: Vec<(String, String)> = Vec::new();

  for word in args.split_whitespace() {
    match word.split_once('=') {
      Some((field, value)) if !field.is_empty() => {
        fields.push((field.to_string(), value.to_string()));
      }
      _ => match fields.last_mut() {
        Some((_, value)) => {
          value.push(' ');
          value.push_str(word);
        }
        None => return Err(format!("expected field=value, got '{}'", word)),
      },
    }
  }

  if fields.is_empty() {
    return Err("expected at least one field=value".to_string());
  }

  Ok(
    fields
      .into_iter()
      .map(|(field, value)| (field, Value::String(value)))
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_and_alias_match() {
    assert_eq!(get_suggestions("tasks")[0].name, "tasks");
    assert_eq!(get_suggestions("fin")[0].name, "financing");
    assert_eq!(get_suggestions("rm")[0].name, "delete");
  }

  #[test]
  fn test_prefix_match_ignores_arguments() {
    let suggestions = get_suggestions("sta In Progress");
    assert_eq!(suggestions[0].name, "status");
  }

  #[test]
  fn test_parse_collection_switch() {
    assert_eq!(parse("contacts"), Ok(Action::Show(Collection::Contacts)));
    assert_eq!(parse("  F "), Ok(Action::Show(Collection::Financing)));
  }

  #[test]
  fn test_parse_write_commands() {
    assert_eq!(
      parse("new title=Printer on fire account=ACC-0001"),
      Ok(Action::Create(
        json!({"title": "Printer on fire", "account": "ACC-0001"})
          .as_object()
          .cloned()
          .unwrap()
      ))
    );
    assert_eq!(
      parse("status In Progress"),
      Ok(Action::Status("In Progress".into()))
    );
    assert_eq!(parse("del"), Ok(Action::Delete));
    assert!(parse("status").is_err());
    assert!(parse("launch").is_err());
  }

  #[test]
  fn test_parse_assignments_errors() {
    assert!(parse_assignments("").is_err());
    assert!(parse_assignments("orphan title=x").is_err());
    assert!(parse_assignments("=x").is_err());

    let cleared = parse_assignments("phone=").unwrap();
    assert_eq!(cleared["phone"], json!(""));
  }
}
