mod api;
mod app;
mod cache;
mod commands;
mod config;
mod event;
mod logging;
mod resources;
mod server;
mod store;
mod sync;
mod ui;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "recdash")]
#[command(about = "Record dashboard: caching gateway and terminal client")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./recdash.yaml or $XDG_CONFIG_HOME/recdash/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Run the HTTP gateway over the record store
  Serve {
    /// Address to listen on (overrides server.bind)
    #[arg(short, long)]
    bind: Option<String>,
  },
  /// Open the terminal dashboard (default)
  Tui {
    /// Gateway URL (overrides client.url)
    #[arg(short, long)]
    url: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let mut config = config::Config::load(args.config.as_deref())?;

  match args.command.unwrap_or(Cmd::Tui { url: None }) {
    Cmd::Serve { bind } => {
      logging::init_server()?;
      let bind = bind.unwrap_or_else(|| config.server.bind.clone());
      server::serve(&config, &bind).await
    }
    Cmd::Tui { url } => {
      if let Some(url) = url {
        config.client.url = url;
      }
      run_tui(config).await
    }
  }
}

async fn run_tui(config: config::Config) -> Result<()> {
  let _guard = logging::init_client(&config::data_dir()?.join("logs"))?;

  let client = api::DashboardClient::new(&config.client)?;

  // Signing in is optional; a code that is set but rejected stops startup
  let user = match config::Config::get_access_code() {
    Ok(code) => {
      let profile = client.login(&code, &config.client.role).await?;
      info!(user = %profile.name, role = %profile.role, "signed in");
      Some(profile)
    }
    Err(_) => {
      warn!("no access code set, continuing without sign-in");
      None
    }
  };

  let dashboard = sync::Dashboard::new(Arc::new(client), config.client.revert_delay());
  let mut app = app::App::new(config, dashboard, user);
  app.run().await
}
