use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::wire::{Envelope, Mutation, UserProfile};
use super::RecordService;
use crate::config::ClientConfig;
use crate::resources::{Collection, Record, Table};

/// HTTP client for the gateway
#[derive(Clone)]
pub struct DashboardClient {
  http: reqwest::Client,
  base: Url,
}

impl DashboardClient {
  pub fn new(config: &ClientConfig) -> Result<Self> {
    let base = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid gateway URL '{}': {}", config.url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("recdash/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base })
  }

  fn read_url(&self, query: &[(&str, &str)]) -> Url {
    let mut url = self.base.clone();
    url.query_pairs_mut().extend_pairs(query);
    url
  }

  /// Decode an envelope, turning the error variant into a report.
  async fn unwrap_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
  ) -> Result<Option<T>> {
    let envelope: Envelope<T> = response
      .json()
      .await
      .map_err(|e| eyre!("Malformed response to {}: {}", what, e))?;

    envelope.into_result().map_err(|message| eyre!("{}", message))
  }

  /// Sign in with an access code, returning who it belongs to.
  pub async fn login(&self, code: &str, role: &str) -> Result<UserProfile> {
    let url = self.read_url(&[("action", "login"), ("code", code), ("role", role)]);

    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to reach gateway: {}", e))?;

    Self::unwrap_envelope(response, "login")
      .await?
      .ok_or_else(|| eyre!("Login response carried no profile"))
  }
}

#[async_trait]
impl RecordService for DashboardClient {
  async fn fetch(&self, collection: Collection) -> Result<Vec<Record>> {
    let action = collection.read_action();
    let url = self.read_url(&[("action", action.as_str())]);

    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to load {}: {}", collection, e))?;

    let table: Table = Self::unwrap_envelope(response, &action)
      .await?
      .ok_or_else(|| eyre!("Response to {} carried no data", action))?;

    debug!(%collection, rows = table.rows.len(), "fetched collection");
    Ok(table.into_records())
  }

  async fn mutate(&self, mutation: &Mutation) -> Result<()> {
    let request = mutation.to_request();

    let response = self
      .http
      .post(self.base.clone())
      .json(&request)
      .send()
      .await
      .map_err(|e| eyre!("Failed to send {}: {}", request.action, e))?;

    Self::unwrap_envelope::<serde_json::Value>(response, &request.action).await?;
    Ok(())
  }
}
