use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use tripsync::cache::CacheSource;
use tripsync::config::Config;
use tripsync::net::ReqwestTransport;
use tripsync::store::{PersistentStore, SqliteStore};
use tripsync::trips::{PackingItem, TripsService, MY_TRIPS};
use tripsync::{logging, SyncContext, SyncError, SyncEvent};

#[derive(Parser, Debug)]
#[command(name = "tripsync")]
#[command(about = "Offline-first sync for trip plans")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tripsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Start offline: serve from cache and queue every change
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sign in (password from TRIPSYNC_PASSWORD)
  Login { username: String },
  /// Sign out and drop all local data
  Logout,
  /// List trips
  Trips,
  /// Show the packing list of a trip
  Packing { trip: i64 },
  /// Add an item to a trip's packing list
  Pack {
    trip: i64,
    name: String,
    #[arg(short, long, default_value_t = 1)]
    quantity: u32,
  },
  /// Replay queued changes and refresh stale lists
  Sync,
  /// Show session and queue state
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _log_guard = logging::init(&data_dir.join("logs"), config.log_level.as_deref())?;

  let store: Arc<dyn PersistentStore> = Arc::new(SqliteStore::open(&data_dir.join("store.db"))?);
  let settings = config.sync_settings()?;
  let transport = Arc::new(ReqwestTransport::new(settings.timeouts.request)?);
  let context = Arc::new(SyncContext::new(settings, store, transport, !args.offline)?);
  let mut events = context.events.subscribe();
  let service = TripsService::new(context.clone());
  info!(command = ?args.command, offline = args.offline, "starting");

  let outcome = run(args.command, &service, &context).await;
  print_events(&mut events);

  match outcome {
    Err(SyncError::SessionExpired) => Err(eyre!("Session expired. Run `tripsync login <username>`.")),
    Err(SyncError::NetworkUnavailable) => Err(eyre!("Offline and nothing cached for this request.")),
    other => other.map_err(Into::into),
  }
}

async fn run(
  command: Command,
  service: &TripsService<ReqwestTransport>,
  context: &SyncContext<ReqwestTransport>,
) -> Result<(), SyncError> {
  match command {
    Command::Login { username } => {
      let password = Config::get_password().map_err(|e| SyncError::Validation(e.to_string()))?;
      let session = service.login(&username, &password).await?;
      println!("Signed in as {}", session.profile.username);
    }
    Command::Logout => {
      service.logout()?;
      println!("Signed out");
    }
    Command::Trips => {
      let result = service.trips.load(MY_TRIPS).await?;
      print_source(result.source);
      for trip in result.data {
        let dates = match (trip.start_date, trip.end_date) {
          (Some(start), Some(end)) => format!("{} to {}", start, end),
          (Some(start), None) => start.to_string(),
          _ => String::new(),
        };
        println!(
          "{:>6}  {:<30} {:<20} {}",
          trip.id,
          trip.name,
          trip.destination.unwrap_or_default(),
          dates
        );
      }
    }
    Command::Packing { trip } => {
      let key = trip.to_string();
      let result = service.packing.load(&key).await?;
      print_source(result.source);
      for item in result.data {
        let mark = if item.packed { "x" } else { " " };
        let pending = if item.id < 0 { " (not synced)" } else { "" };
        println!("[{}] {} x{}{}", mark, item.name, item.quantity, pending);
      }
      let queued = service.packing.pending_count(&key)?;
      if queued > 0 {
        println!("{} change(s) waiting to sync", queued);
      }
    }
    Command::Pack {
      trip,
      name,
      quantity,
    } => {
      let item = service
        .packing
        .create(&trip.to_string(), PackingItem::new(trip, name, quantity))
        .await?;
      if item.id < 0 {
        println!("Added {} (queued, will sync when online)", item.name);
      } else {
        println!("Added {} (id {})", item.name, item.id);
      }
    }
    Command::Sync => {
      if !context.reachability.is_online() {
        return Err(SyncError::NetworkUnavailable);
      }
      let mut engine = context.engine();
      for hook in service.reconnect_hooks() {
        engine.register(hook);
      }
      engine.sync_now().await;
      // Let any background refreshes land before exiting
      tokio::time::sleep(Duration::from_millis(100)).await;
      println!("Sync finished");
    }
    Command::Status => {
      match context.sessions.get() {
        Some(session) => println!("Signed in as {}", session.profile.username),
        None => println!("Signed out"),
      }
      println!(
        "Network: {}",
        if context.reachability.is_online() {
          "online"
        } else {
          "offline"
        }
      );
      let queues = context.store.keys_with_prefix("pending:")?;
      println!("Queues with pending changes: {}", queues.len());
      for key in queues {
        println!("  {}", key.trim_start_matches("pending:"));
      }
    }
  }
  Ok(())
}

fn print_source(source: CacheSource) {
  match source {
    CacheSource::Offline => println!("(offline, showing saved data)"),
    CacheSource::CacheStale => println!("(could not refresh, showing saved data)"),
    CacheSource::Network | CacheSource::CacheFresh => {}
  }
}

fn print_events(events: &mut broadcast::Receiver<SyncEvent>) {
  while let Ok(event) = events.try_recv() {
    match event {
      SyncEvent::AuthExpired => eprintln!("Session expired, please sign in again"),
      SyncEvent::Notice(message) => eprintln!("{}", message),
      SyncEvent::FlushCompleted {
        collection,
        key,
        replayed,
        remaining,
      } if replayed > 0 || remaining > 0 => {
        eprintln!(
          "{} {}: {} synced, {} still pending",
          collection, key, replayed, remaining
        );
      }
      _ => {}
    }
  }
}
