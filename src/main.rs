//! Binary entrypoint for the opstrainer CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml` and a seeded store
//! - `seed [--file <path>]` - apply a JSON seed file of levels, categories and scenarios
//! - `status` - print trainer statistics
//! - `progress [--user <id>]` - per-level progress for a user
//! - `results [--user <id>] [--id <result>]` - a user's results or one result in detail
//! - `play <scenario> [--choose 1,2,0]` - scripted play-through picking answers by position (0 = timeout)
//!
//! See the library crate docs for module-level details: `opstrainer::`.
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};

use opstrainer::config::Config;
use opstrainer::trainer::{
    self, ChannelSink, IdentityProvider, LogSink, MessagingSink, SessionEngine, SessionState,
    StaticIdentity, TrainerStore, TrainerStoreBuilder,
};

#[derive(Parser)]
#[command(name = "opstrainer")]
#[command(about = "Operator training engine: dialogue scenarios, loyalty scoring and level progression")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Acting user id; defaults to $USER
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the store
    Init,
    /// Apply a JSON seed file
    Seed {
        /// Seed file; defaults to trainer.scenarios_seed_file
        #[arg(short, long)]
        file: Option<String>,
    },
    /// Show trainer statistics
    Status,
    /// Show level progress for a user
    Progress,
    /// List a user's results, or show one in detail
    Results {
        /// Result id to show in detail
        #[arg(long)]
        id: Option<u64>,
    },
    /// Play a scenario with scripted answer choices
    Play {
        /// Scenario id
        scenario: u64,
        /// 1-based answer position per step; 0 lets the step time out. Missing steps pick 1.
        #[arg(long, value_delimiter = ',')]
        choose: Vec<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        info!("Initializing new trainer configuration");
        Config::create_default(&cli.config).await?;
        info!("Configuration file created at {}", cli.config);
        let config = Config::load(&cli.config).await?;
        let store = open_store(&config)?;
        let levels = store.list_levels()?.len();
        info!(
            "Trainer store ready at {} ({} levels)",
            config.storage.db_path().display(),
            levels
        );
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);
    info!("{} starting", config.trainer.name);
    let store = open_store(&config)?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Seed { file } => {
            let path = file
                .or_else(|| config.trainer.scenarios_seed_file.clone())
                .ok_or_else(|| anyhow!("no seed file given and trainer.scenarios_seed_file is unset"))?;
            let seed = trainer::load_seed_file(&path)?;
            let report = trainer::apply_seed(&store, seed)?;
            println!("{}", serde_json::json!({
                "levels": report.levels,
                "categories": report.categories,
                "scenarios": report.scenarios,
                "steps": report.steps,
                "answers": report.answers,
            }));
        }
        Commands::Status => {
            let stats = trainer::overview(&store, config.trainer.top_users_limit)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Progress => {
            let user = acting_user(&cli.user)?;
            let progress = trainer::user_progress(&store, &user)?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        Commands::Results { id } => {
            let user = acting_user(&cli.user)?;
            match id {
                Some(result_id) => {
                    let detail = trainer::result_detail(&store, result_id, &user)?;
                    println!("{}", serde_json::to_string_pretty(&detail)?);
                }
                None => {
                    let results = trainer::user_results(&store, &user, None)?;
                    println!("{}", serde_json::to_string_pretty(&results)?);
                }
            }
        }
        Commands::Play { scenario, choose } => {
            let user = acting_user(&cli.user)?;
            let (sink, dispatcher): (Arc<dyn MessagingSink>, _) = if config.notifications.enabled {
                let (sink, rx) = ChannelSink::new(config.notifications.queue_capacity);
                let handle = trainer::spawn_dispatcher(rx, |n| LogSink.notify(n.clone()));
                (Arc::new(sink), Some(handle))
            } else {
                (Arc::new(LogSink), None)
            };
            let engine = SessionEngine::new(store.clone(), sink);
            play(&engine, &user, scenario, &choose)?;
            drop(engine);
            if let Some(handle) = dispatcher {
                match handle.await {
                    Ok(delivered) => info!("Delivered {} notifications", delivered),
                    Err(e) => warn!("Notification dispatcher failed: {}", e),
                }
            }
            debug!("Session counters: {:?}", opstrainer::metrics::snapshot());
        }
    }

    store.flush()?;
    Ok(())
}

fn acting_user(explicit: &Option<String>) -> Result<String> {
    let identity = match explicit {
        Some(user) => StaticIdentity::new(user.clone()),
        None => StaticIdentity::from_env("USER")?,
    };
    Ok(identity.current_user()?)
}

fn open_store(config: &Config) -> Result<Arc<TrainerStore>> {
    let mut builder = TrainerStoreBuilder::new(config.storage.db_path());
    if !config.trainer.seed_defaults {
        builder = builder.without_default_seed();
    }
    Ok(Arc::new(builder.open()?))
}

fn play(engine: &SessionEngine, user: &str, scenario_id: u64, choose: &[usize]) -> Result<()> {
    let mut session = engine.start_session(user, scenario_id)?;
    let mut picks = choose.iter().copied();
    while let Some(step_num) = session.current_step() {
        let step = engine.get_step(scenario_id, step_num)?;
        println!(
            "[{}/{}] {} {}: {}",
            step.step_num, step.total_steps, step.client_avatar, step.client_name, step.client_message
        );
        let (answer_id, is_timeout) = match picks.next().unwrap_or(1) {
            0 => (None, true),
            pick => match step.answers.get(pick - 1) {
                Some(answer) => {
                    println!("  > {}", answer.answer_text);
                    (Some(answer.id), false)
                }
                None => bail!("step {} has only {} answers", step_num, step.answers.len()),
            },
        };
        let outcome = engine.play_step(&mut session, answer_id, 0, is_timeout)?;
        println!(
            "  {:+} points, loyalty {} ({}){}",
            outcome.points_earned,
            outcome.new_loyalty,
            outcome.new_mood,
            if outcome.feedback.is_empty() {
                String::new()
            } else {
                format!(" - {}", outcome.feedback)
            }
        );
        if let SessionState::AnswerSubmitted(_) = session.state() {
            session.advance()?;
        }
    }

    let receipt = engine.finish(&session)?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|cfg| cfg.logging.level_filter().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Mirror to the console only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
