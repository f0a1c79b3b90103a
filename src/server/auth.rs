//! Access-code sign-in against the configured users.

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::api::UserProfile;
use crate::config::UserConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
  #[error("access code is required")]
  MissingCode,
  #[error("invalid access code")]
  InvalidCode,
  #[error("access code is not valid for role '{0}'")]
  WrongRole(String),
}

/// Checks access codes. Only SHA-256 digests are kept in memory.
pub struct Authenticator {
  users: Vec<UserConfig>,
}

/// Lowercase hex SHA-256 of an access code, the form stored in config.
pub fn digest_code(code: &str) -> String {
  hex::encode(Sha256::digest(code.as_bytes()))
}

impl Authenticator {
  pub fn new(users: Vec<UserConfig>) -> Self {
    Self { users }
  }

  /// Resolve `code` to a user. When `role` is given it must match the
  /// user's role, ignoring case.
  pub fn login(&self, code: &str, role: Option<&str>) -> Result<UserProfile, AuthError> {
    let code = code.trim();
    if code.is_empty() {
      return Err(AuthError::MissingCode);
    }

    let digest = digest_code(code);
    let Some(user) = self
      .users
      .iter()
      .find(|u| u.access_code_sha256.trim().eq_ignore_ascii_case(&digest))
    else {
      warn!("login rejected: unknown access code");
      return Err(AuthError::InvalidCode);
    };

    if let Some(role) = role.map(str::trim).filter(|r| !r.is_empty()) {
      if !user.role.eq_ignore_ascii_case(role) {
        warn!(user = %user.name, role, "login rejected: role mismatch");
        return Err(AuthError::WrongRole(role.to_string()));
      }
    }

    info!(user = %user.name, role = %user.role, "login");
    Ok(UserProfile {
      name: user.name.clone(),
      role: user.role.clone(),
      email: user.email.clone(),
    })
  }
}
