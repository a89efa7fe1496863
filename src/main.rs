mod app;
mod cache;
mod commands;
mod config;
mod db;
mod event;
mod gateway;
mod queue;
mod recent;
mod report;
mod resources;
mod settings;
mod sync;
mod view;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::app::{App, AppContext, CheckInOptions, Notice, Output, ResourceAction};
use crate::gateway::Condition;
use crate::sync::SyncTrigger;

#[derive(Parser, Debug)]
#[command(name = "assetscan")]
#[command(about = "Asset inventory scanning that keeps working offline")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./assetscan.yaml or $XDG_CONFIG_HOME/assetscan/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Path to the local database (default: $XDG_DATA_HOME/assetscan/assetscan.db)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Interactive session: every input line is an asset code (default)
  Scan,
  /// Check in one asset
  Check {
    code: String,
    /// Where the asset was found
    #[arg(short, long)]
    location: Option<String>,
    /// good, fair, broken, under-repair or disposed
    #[arg(long, default_value = "good")]
    condition: Condition,
    #[arg(long)]
    serial: Option<String>,
    #[arg(long, default_value = "")]
    notes: String,
    /// Submit even if the asset was already checked this period
    #[arg(long)]
    force: bool,
  },
  /// Show one asset and its inventory status
  Asset { code: String },
  /// Inventory progress for the current period
  Stats,
  /// List every asset
  List,
  /// Search assets by text
  Search { query: Vec<String> },
  /// Change asset columns: `update A1 Vị trí="Kho B" Serial=SN-9`
  Update {
    code: String,
    #[arg(value_parser = parse_field)]
    fields: Vec<(String, String)>,
  },
  /// Start a new inventory period
  Reset {
    /// Must be exactly RESET
    #[arg(long)]
    confirm: Option<String>,
  },
  /// Show QR label data
  Qr {
    /// Regenerate the labels on the backend first
    #[arg(long)]
    generate: bool,
  },
  /// Write the progress report as CSV
  Export {
    path: Option<PathBuf>,
    /// Have the backend build its own report instead
    #[arg(long)]
    remote: bool,
  },
  /// Create the backend's sheets
  Init,
  /// Replay queued updates now
  Sync,
  /// Inspect or manage queued updates
  Queue {
    #[command(subcommand)]
    action: Option<QueueCmd>,
  },
  /// Recent scans, newest first
  Recent,
  /// Show or change saved settings
  Settings {
    #[command(subcommand)]
    action: Option<SettingsCmd>,
  },
  /// Manage the offline resource cache
  Resources {
    #[command(subcommand)]
    action: ResourcesCmd,
  },
}

#[derive(Subcommand, Debug)]
enum QueueCmd {
  List,
  /// Drop one queued update by id
  Drop { id: i64 },
  /// Drop every queued update
  Clear,
}

#[derive(Subcommand, Debug)]
enum SettingsCmd {
  Show,
  /// Keys: endpoint, name, email, department, location
  Set { key: String, value: String },
}

#[derive(Subcommand, Debug)]
enum ResourcesCmd {
  /// Cache the install manifest
  Install,
  /// Remove caches from older versions
  Activate,
  /// Fetch a URL through the cache
  Fetch {
    url: String,
    /// Treat as a page navigation
    #[arg(long)]
    document: bool,
  },
  /// Keep a JSON document for offline use
  Store { json: String },
  /// Read a kept JSON document
  Get { key: String },
  /// Drop every resource cache
  Clear,
}

fn parse_field(s: &str) -> std::result::Result<(String, String), String> {
  let (key, value) = s
    .split_once('=')
    .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
  if key.trim().is_empty() {
    return Err(format!("empty column name in '{}'", s));
  }
  Ok((key.trim().to_string(), value.to_string()))
}

/// Log to a daily file in the data directory so the terminal stays clean.
fn init_tracing() -> Option<WorkerGuard> {
  let dir = match db::data_dir() {
    Ok(dir) => dir.join("logs"),
    Err(_) => return None,
  };
  let appender = tracing_appender::rolling::daily(dir, "assetscan.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("assetscan=info")))
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .init();
  Some(guard)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  color_eyre::install()?;
  let _log_guard = init_tracing();

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let ctx = AppContext::new(config, args.db.as_deref())?;

  let outputs = match args.command.unwrap_or(Cmd::Scan) {
    Cmd::Scan => {
      let mut app = App::new(ctx);
      app.run().await?;
      Vec::new()
    }
    Cmd::Check {
      code,
      location,
      condition,
      serial,
      notes,
      force,
    } => {
      let options = CheckInOptions {
        location,
        condition,
        serial,
        notes,
        force,
      };
      ctx.check_in(&code, &options).await
    }
    Cmd::Asset { code } => ctx.asset(&code).await,
    Cmd::Stats => ctx.stats().await,
    Cmd::List => ctx.list().await,
    Cmd::Search { query } => ctx.search(&query.join(" ")).await,
    Cmd::Update { code, fields } => {
      let fields: BTreeMap<String, String> = fields.into_iter().collect();
      ctx.update(&code, fields).await
    }
    Cmd::Reset { confirm } => {
      if confirm.as_deref() == Some("RESET") {
        ctx.reset().await
      } else {
        vec![Notice::info("Reset cancelled; pass --confirm RESET to proceed").into()]
      }
    }
    Cmd::Qr { generate } => ctx.qr(generate).await,
    Cmd::Export { path, remote } => {
      if remote {
        ctx.export_remote().await
      } else {
        ctx.export(path).await
      }
    }
    Cmd::Init => ctx.init().await,
    Cmd::Sync => ctx.sync(SyncTrigger::Manual).await,
    Cmd::Queue { action } => match action.unwrap_or(QueueCmd::List) {
      QueueCmd::List => ctx.queue_list(),
      QueueCmd::Drop { id } => ctx.queue_drop(id),
      QueueCmd::Clear => ctx.queue_clear(),
    },
    Cmd::Recent => ctx.recent_scans(),
    Cmd::Settings { action } => match action.unwrap_or(SettingsCmd::Show) {
      SettingsCmd::Show => ctx.settings_show(),
      SettingsCmd::Set { key, value } => ctx.settings_set(&key, &value),
    },
    Cmd::Resources { action } => {
      let action = match action {
        ResourcesCmd::Install => ResourceAction::Install,
        ResourcesCmd::Activate => ResourceAction::Activate,
        ResourcesCmd::Fetch { url, document } => ResourceAction::Fetch { url, document },
        ResourcesCmd::Store { json } => ResourceAction::CacheData { json },
        ResourcesCmd::Get { key } => ResourceAction::GetData { key },
        ResourcesCmd::Clear => ResourceAction::Clear,
      };
      let handle = ctx.spawn_resource_worker(None)?;
      ctx.resources(&handle, action).await
    }
  };

  for output in &outputs {
    println!("{}", output);
  }

  if outputs.iter().any(Output::is_error) {
    Ok(ExitCode::FAILURE)
  } else {
    Ok(ExitCode::SUCCESS)
  }
}
