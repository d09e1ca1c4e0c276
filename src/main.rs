use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use setweaver::engine::{BuildOutcome, BuildRequest, Engine};
use setweaver::events::ProgressEvent;
use setweaver::library::{Track, TrackTable};
use setweaver::llm::anthropic::AnthropicClient;
use setweaver::phases::{BuiltinProfiles, PhaseProfiles};
use setweaver::pool::analyze_pool;
use setweaver::store::{SetStore, SqliteStore};
use setweaver::trees::{CollectionTree, HierarchicalTree, Tree, TreeKind};

#[derive(Parser)]
#[command(name = "setweaver", version, about = "Narrative DJ set builder")]
struct Cli {
    /// Path to the SQLite database for saved sets
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Path to the TOML config file (model tiers)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a narrative set from a track library
    Build {
        /// JSON file with the track library (array of track objects)
        library: PathBuf,

        /// Phase profile id (see `profiles`)
        #[arg(long, default_value = "classic_arc")]
        profile: String,

        /// Name for the saved set
        #[arg(long, default_value = "Auto Set")]
        name: String,

        /// Restrict the pool to these track ids (default: whole library)
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,

        /// Optional genre tree JSON for pool context
        #[arg(long)]
        genre_tree: Option<PathBuf>,

        /// Optional scene tree JSON for pool context
        #[arg(long)]
        scene_tree: Option<PathBuf>,

        /// Optional collection tree JSON for pool context
        #[arg(long)]
        collection_tree: Option<PathBuf>,
    },

    /// Analyze a track pool and print its profile as JSON
    Pool {
        /// JSON file with the track library
        library: PathBuf,

        /// Restrict the pool to these track ids (default: whole library)
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,
    },

    /// List available phase profiles
    Profiles,

    /// List saved sets
    Sets,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Build {
            library,
            profile,
            name,
            ids,
            genre_tree,
            scene_tree,
            collection_tree,
        } => {
            let table = load_library(&library)?;
            let pool_ids = resolve_ids(&table, ids);

            let mut trees = BTreeMap::new();
            if let Some(path) = genre_tree {
                trees.insert(TreeKind::Genre, load_hierarchical_tree(&path)?);
            }
            if let Some(path) = scene_tree {
                trees.insert(TreeKind::Scene, load_hierarchical_tree(&path)?);
            }
            if let Some(path) = collection_tree {
                trees.insert(TreeKind::Collection, load_collection_tree(&path)?);
            }

            let config_path = cli.config.unwrap_or_else(setweaver::config::default_config_path);
            let models = setweaver::config::load_model_config(&config_path);
            let llm = AnthropicClient::from_env(models).context("LLM client setup failed")?;

            let db_path = cli.db_path.unwrap_or_else(setweaver::config::default_db_path);
            log::info!("Database: {}", db_path.display());
            let store = SqliteStore::open(&db_path).context("Failed to open database")?;

            let engine = Engine::new(Arc::new(llm), Arc::new(store));

            // Ctrl-C requests a cooperative stop.
            let cancel = CancellationToken::new();
            let ctrl_c_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nStopping after the current step...");
                    ctrl_c_token.cancel();
                }
            });

            let progress_task = spawn_progress_bar(&engine);

            let request = BuildRequest {
                track_ids: pool_ids,
                phase_profile_id: profile,
                set_name: name,
                trees,
            };
            let outcome = engine.build(&table, &request, &cancel).await;
            progress_task.abort();

            match outcome.context("Set build failed")? {
                BuildOutcome::Stopped => {
                    println!("Build stopped — nothing was saved.");
                }
                BuildOutcome::Completed(result) => {
                    println!();
                    println!("Narrative");
                    println!("=========");
                    println!("{}", result.narrative);
                    println!();
                    print_tracklist(&result.ordered_tracks);
                    println!();
                    println!(
                        "Saved set '{}' ({}) with {} slots.",
                        result.set.name,
                        result.set.id,
                        result.set.slots.len()
                    );
                }
            }
        }

        Commands::Pool { library, ids } => {
            let table = load_library(&library)?;
            let pool_ids = resolve_ids(&table, ids);
            let profile = analyze_pool(&table, &pool_ids, &BTreeMap::new())
                .context("Pool analysis failed")?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }

        Commands::Profiles => {
            for profile in BuiltinProfiles.list() {
                println!("{:<14} {} — {}", profile.id, profile.name, profile.description);
                for phase in &profile.phases {
                    println!(
                        "    {:>3}-{:<3}% {}",
                        phase.pct[0], phase.pct[1], phase.name
                    );
                }
                println!();
            }
        }

        Commands::Sets => {
            let db_path = cli.db_path.unwrap_or_else(setweaver::config::default_db_path);
            let store = SqliteStore::open(&db_path).context("Failed to open database")?;
            let sets = store.list_saved_sets().context("Query failed")?;
            if sets.is_empty() {
                println!("No saved sets.");
                return Ok(());
            }
            println!("{:<10} {:<30} {:>6}  {}", "Id", "Name", "Slots", "Created");
            println!("{}", "-".repeat(70));
            for s in sets {
                println!("{:<10} {:<30} {:>6}  {}", s.id, s.name, s.slot_count, s.created_at);
            }
        }
    }

    Ok(())
}

fn load_library(path: &PathBuf) -> Result<TrackTable> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read library {}", path.display()))?;
    let tracks: Vec<Track> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse library {}", path.display()))?;
    Ok(TrackTable::from_tracks(tracks))
}

fn resolve_ids(table: &TrackTable, ids: Vec<i64>) -> Vec<i64> {
    if ids.is_empty() {
        table.iter().map(|t| t.id).collect()
    } else {
        ids
    }
}

fn load_hierarchical_tree(path: &PathBuf) -> Result<Tree> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tree {}", path.display()))?;
    let tree: HierarchicalTree = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse tree {}", path.display()))?;
    Ok(Tree::Hierarchical(tree))
}

fn load_collection_tree(path: &PathBuf) -> Result<Tree> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tree {}", path.display()))?;
    let tree: CollectionTree = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse tree {}", path.display()))?;
    Ok(Tree::Collection(tree))
}

/// Drive an indicatif bar from the engine's progress events.
fn spawn_progress_bar(engine: &Engine) -> tokio::task::JoinHandle<()> {
    let mut rx = engine.progress().subscribe();
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                ProgressEvent::Progress { percent, detail, .. } => {
                    pb.set_position(u64::from(percent));
                    pb.set_message(detail);
                }
                ProgressEvent::Done { percent, .. } => {
                    pb.set_position(u64::from(percent));
                    pb.finish_with_message("done");
                    break;
                }
                ProgressEvent::Stopped => {
                    pb.abandon_with_message("stopped");
                    break;
                }
                ProgressEvent::Error { detail } => {
                    pb.abandon_with_message(detail);
                    break;
                }
            }
        }
    })
}

fn print_tracklist(tracks: &[setweaver::sequence::OrderedTrack]) {
    println!("Tracklist");
    println!("=========");
    println!(
        "{:<4} {:<28} {:<20} {:>6} {:>4}  {}",
        "#", "Title", "Artist", "BPM", "Key", "Act"
    );
    println!("{}", "-".repeat(80));
    for (i, t) in tracks.iter().enumerate() {
        // Truncate long titles
        let title: String = if t.title.len() > 28 {
            format!("{}...", &t.title[..25])
        } else {
            t.title.clone()
        };
        println!(
            "{:<4} {:<28} {:<20} {:>6} {:>4}  {}",
            i + 1,
            title,
            t.artist,
            t.bpm.map(|b| format!("{b:.1}")).unwrap_or_default(),
            t.key.as_deref().unwrap_or(""),
            t.act_name,
        );
    }
}
