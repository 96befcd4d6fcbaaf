use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use housing_sniper::config::AppConfig;
use housing_sniper::models::CategorizedListings;
use housing_sniper::portal::{ChromeAuthenticator, SearchMode, SearchParams, SystemClock};
use housing_sniper::status::{ChannelSink, SharedSink, TracingSink};
use housing_sniper::{telemetry, Bot, BotError, Selection};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "housing-sniper",
    about = "Apply to new rental listings the moment the daily window opens",
    version
)]
struct Cli {
    /// Portal username (overrides SNIPER_USERNAME)
    #[arg(long, global = true)]
    username: Option<String>,
    /// Portal password (overrides SNIPER_PASSWORD)
    #[arg(long, global = true)]
    password: Option<String>,
    /// Show the browser window during login
    #[arg(long, global = true)]
    visible: bool,
    /// Send status messages to the log instead of printing them
    #[arg(long, global = true)]
    status_to_log: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one discovery cycle and print the categorized listings
    List(ListArgs),
    /// Discover and apply immediately
    ApplyNow(ApplyArgs),
    /// Discover, wait for the application window, then apply
    Scheduled(ScheduledArgs),
    /// Check a single listing's application form
    Test(TestArgs),
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Today,
    Upcoming,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Which part of the listing feed to search
    #[arg(long, value_enum, default_value = "today")]
    mode: ModeArg,
}

impl SearchArgs {
    fn params(&self) -> SearchParams {
        SearchParams {
            mode: match self.mode {
                ModeArg::Today => SearchMode::TodayOnly,
                ModeArg::Upcoming => SearchMode::CurrentAndUpcoming,
            },
            criteria: Vec::new(),
        }
    }
}

#[derive(Args, Debug)]
struct ListArgs {
    #[command(flatten)]
    search: SearchArgs,
    /// Also save the listings as JSON
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SelectionArgs {
    /// Number of cheapest listings to apply to
    #[arg(long, default_value_t = 1)]
    count: usize,
    /// Apply to every selectable listing
    #[arg(long)]
    max: bool,
    /// Also consider listings where you have no priority
    #[arg(long)]
    include_lower_priority: bool,
    /// Explicit listing ids; skips discovery
    #[arg(long, value_delimiter = ',')]
    ids: Vec<String>,
}

impl SelectionArgs {
    fn selection(&self) -> Selection {
        Selection {
            count: (!self.max).then_some(self.count),
            include_lower_priority: self.include_lower_priority,
        }
    }
}

#[derive(Args, Debug)]
struct ApplyArgs {
    #[command(flatten)]
    search: SearchArgs,
    #[command(flatten)]
    selection: SelectionArgs,
}

#[derive(Args, Debug)]
struct ScheduledArgs {
    #[command(flatten)]
    search: SearchArgs,
    #[command(flatten)]
    selection: SelectionArgs,
    /// Seconds between discovery attempts while nothing is selectable
    #[arg(long, default_value_t = 60)]
    rediscover_secs: u64,
}

#[derive(Args, Debug)]
struct TestArgs {
    /// Listing id to probe
    listing_id: String,
    /// Actually submit the application
    #[arg(long)]
    submit: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load()?;
    if cli.visible {
        config.portal.headless = false;
    }
    telemetry::init(&config.telemetry)?;

    info!("🏠 Housing Sniper");
    info!("==================");

    let username = cli
        .username
        .clone()
        .or_else(|| config.credentials.username.clone());
    let password = cli
        .password
        .clone()
        .or_else(|| config.credentials.password.clone());
    let (Some(username), Some(password)) = (username, password) else {
        bail!(
            "Username and password are required \
             (--username/--password or SNIPER_USERNAME/SNIPER_PASSWORD)"
        );
    };

    let mut printer = None;
    let sink: SharedSink = if cli.status_to_log {
        Arc::new(TracingSink)
    } else {
        let (sink, mut rx) = ChannelSink::new();
        printer = Some(tokio::spawn(async move {
            while let Some(status) = rx.recv().await {
                println!("[{}] {}", status.level, status.message);
            }
        }));
        Arc::new(sink)
    };

    let authenticator =
        ChromeAuthenticator::new(&config.portal).context("Failed to start browser worker")?;
    let mut bot = Bot::new(
        config.portal.clone(),
        Arc::new(authenticator),
        sink,
        Arc::new(SystemClock),
    );

    let stop = bot.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Stop command received. Shutting down...");
            stop.cancel();
        }
    });

    let result = run(&mut bot, cli.command, &username, &password).await;

    bot.shutdown().await;
    drop(bot);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    match result {
        Err(e) if matches!(e.downcast_ref::<BotError>(), Some(BotError::Cancelled)) => {
            info!("Bot has stopped.");
            Ok(())
        }
        other => other,
    }
}

async fn run(
    bot: &mut Bot,
    command: Command,
    username: &str,
    password: &str,
) -> anyhow::Result<()> {
    bot.login(username, password).await.context("Login failed")?;

    match command {
        Command::List(args) => {
            let categorized = bot.discover(&args.search.params()).await?;
            print_listings(&categorized);

            if let Some(path) = args.output {
                let json = serde_json::to_string_pretty(&categorized)?;
                tokio::fs::write(&path, json)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("💾 Saved listings to {}", path.display());
            }
        }
        Command::ApplyNow(args) => {
            let applied = if args.selection.ids.is_empty() {
                bot.run_now(&args.search.params(), &args.selection.selection())
                    .await?
            } else {
                bot.apply_now(&args.selection.ids).await?
            };
            info!("✅ Applied to {} listings", applied);
        }
        Command::Scheduled(args) => {
            let applied = if args.selection.ids.is_empty() {
                bot.run_scheduled(
                    &args.search.params(),
                    &args.selection.selection(),
                    Duration::from_secs(args.rediscover_secs.max(1)),
                )
                .await?
            } else {
                bot.apply_at_unlock(&args.selection.ids).await?
            };
            info!("✅ Applied to {} listings", applied);
        }
        Command::Test(args) => {
            bot.run_test(&args.listing_id, args.submit).await?;
        }
    }

    Ok(())
}

fn print_listings(categorized: &CategorizedListings) {
    for (category, listings) in categorized {
        println!("== {} ({})", category, listings.len());
        for (i, listing) in listings.iter().enumerate() {
            println!("{}. {} ({})", i + 1, listing.address, listing.price_display);
            println!(
                "   {} | {} | {}",
                listing.status_text,
                listing.property_type,
                if listing.is_selectable {
                    "selectable"
                } else {
                    "not selectable"
                }
            );
            println!("   ID: {}", listing.id);
            if let Some(image) = &listing.image_url {
                println!("   Image: {}", image);
            }
        }
        println!();
    }
}
