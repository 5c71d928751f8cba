use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use reading_queue::config::Config;
use reading_queue::ingest;
use reading_queue::refresh;
use reading_queue::scheduler::{Scheduler, TcpProbe};
use reading_queue::storage::{ContentFilter, ContentItem, Database, Feed, StorageError};

/// Name the periodic refresh job is registered under; re-running `run`
/// supersedes any pending cycle rather than stacking a second one.
const REFRESH_JOB: &str = "fetch-rss";

/// Get the config directory path (~/.config/reading-queue/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("reading-queue"))
}

#[derive(Parser, Debug)]
#[command(name = "reading-queue", about = "Reading queue over subscribed RSS feeds")]
struct Args {
    /// Config file (default: ~/.config/reading-queue/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (overrides the config file)
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the periodic refresh job until interrupted
    Run,
    /// Run one refresh cycle and print the report
    Refresh,
    /// Manage feed subscriptions
    Feeds {
        #[command(subcommand)]
        command: FeedsCommand,
    },
    /// Print a snapshot of stored items
    List {
        #[arg(long, conflicts_with = "favorites")]
        queued: bool,
        #[arg(long)]
        favorites: bool,
    },
    /// Stream live snapshots as the store changes
    Watch {
        #[arg(long, conflicts_with = "favorites")]
        queued: bool,
        #[arg(long)]
        favorites: bool,
    },
    /// Update an item's flags
    Mark {
        /// Item id (its URL)
        id: String,
        #[arg(long)]
        favorite: Option<bool>,
        #[arg(long)]
        queued: Option<bool>,
        #[arg(long)]
        read: Option<bool>,
    },
    /// Save a shared URL as a manually-saved item
    Save {
        /// Shared text; the first http(s) URL in it is stored
        text: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum FeedsCommand {
    /// Subscribe to a feed
    Add {
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        icon_url: Option<String>,
    },
    /// Unsubscribe from a feed
    Remove { url: String },
    /// List subscriptions
    List,
}

fn content_filter(queued: bool, favorites: bool) -> ContentFilter {
    if queued {
        ContentFilter::Queued
    } else if favorites {
        ContentFilter::Favorites
    } else {
        ContentFilter::All
    }
}

fn print_item(item: &ContentItem) {
    let mut flags = String::new();
    if item.favorite {
        flags.push('F');
    }
    if item.queued {
        flags.push('Q');
    }
    if item.read {
        flags.push('r');
    }
    println!("[{:<3}] {}  {}", flags, item.id, item.title);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // User-only access: the database holds a private reading history
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(&config_dir) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o700);
            if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to set config directory permissions to 0700"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args
        .database
        .clone()
        .or_else(|| config.database_path.clone().map(PathBuf::from))
        .unwrap_or_else(|| config_dir.join("reading-queue.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(e @ StorageError::Locked) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let client = reqwest::Client::builder()
        .user_agent(concat!("reading-queue/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    match args.command {
        Command::Run => {
            let mut scheduler = Scheduler::new();
            let options = config.refresh_options();
            let job_db = db.clone();
            let job_client = client.clone();
            scheduler.schedule(
                REFRESH_JOB,
                config.refresh_interval(),
                TcpProbe::default(),
                move || {
                    let db = job_db.clone();
                    let client = job_client.clone();
                    async move {
                        let report = refresh::run(&db, &client, &options).await?;
                        if report.all_failed() {
                            anyhow::bail!("all {} feeds failed this cycle", report.attempted);
                        }
                        Ok(())
                    }
                },
            );
            println!(
                "Refreshing every {} minutes. Press Ctrl-C to stop.",
                config.refresh_interval_minutes
            );
            tokio::signal::ctrl_c().await?;
            println!("Goodbye!");
        }
        Command::Refresh => {
            let report = refresh::run(&db, &client, &config.refresh_options()).await?;
            println!(
                "{} of {} feeds refreshed, {} new item(s)",
                report.succeeded, report.attempted, report.inserted
            );
            for failure in &report.failures {
                eprintln!("  failed: {} ({})", failure.feed_id, failure.error);
            }
        }
        Command::Feeds { command } => match command {
            FeedsCommand::Add {
                url,
                name,
                icon_url,
            } => {
                let feed = Feed {
                    name: name.unwrap_or_else(|| url.clone()),
                    id: url,
                    icon_url,
                };
                db.add_feeds(std::slice::from_ref(&feed)).await?;
                println!("Subscribed: {}", feed.id);
            }
            FeedsCommand::Remove { url } => {
                let removed = db.remove_feeds(&[url.as_str()]).await?;
                if removed == 0 {
                    println!("Not subscribed: {url}");
                } else {
                    println!("Unsubscribed: {url}");
                }
            }
            FeedsCommand::List => {
                for feed in db.feeds().await? {
                    println!("{}  {}", feed.id, feed.name);
                }
            }
        },
        Command::List { queued, favorites } => {
            let items = match content_filter(queued, favorites) {
                ContentFilter::All => db.content_items().await?,
                ContentFilter::Favorites => db.favorites().await?,
                ContentFilter::Queued => db.queued().await?,
            };
            for item in items {
                print_item(&item);
            }
        }
        Command::Watch { queued, favorites } => {
            let mut watch = db.watch_content(content_filter(queued, favorites));
            loop {
                let snapshot = watch.next().await?;
                println!("-- {} item(s)", snapshot.len());
                for item in &snapshot {
                    print_item(item);
                }
            }
        }
        Command::Mark {
            id,
            favorite,
            queued,
            read,
        } => {
            if favorite.is_none() && queued.is_none() && read.is_none() {
                anyhow::bail!("nothing to change: pass --favorite, --queued, or --read");
            }
            let Some(mut item) = db.content_item(&id).await? else {
                anyhow::bail!("no such item: {id}");
            };
            if let Some(favorite) = favorite {
                item.favorite = favorite;
            }
            if let Some(queued) = queued {
                item.queued = queued;
            }
            if let Some(read) = read {
                item.read = read;
            }
            db.update_content(std::slice::from_ref(&item)).await?;
            print_item(&item);
        }
        Command::Save { text } => {
            let item = ingest::save_shared_text(&db, &text.join(" ")).await?;
            print_item(&item);
        }
    }

    Ok(())
}
