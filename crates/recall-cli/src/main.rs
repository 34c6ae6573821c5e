//! Recall - operational CLI for the agent memory store
//!
//! The `recall` command inspects and maintains the Redis-backed memory and
//! checkpoint store. Every command prints pretty JSON on stdout.
//!
//! ## Commands
//!
//! - `health`: probe the backend and the checkpoint path
//! - `stats`: key counts per record family
//! - `checkpoints`: list, show, summarise or clear thread checkpoints
//! - `history` / `decisions`: an agent's recent conversations and decisions
//! - `search`: substring recall over an agent's recent memory
//! - `clear`: drop an agent's memory

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recall_state::telemetry::{init_tracing, LogFormat};
use recall_state::{BackendConfig, CheckpointManager, HealthReport, MemoryStore, StorageError};
use serde_json::{json, Value};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "recall")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and maintain agent memory and checkpoints", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the backend and run a checkpoint save/load cycle
    Health,

    /// Show key counts per record family
    Stats,

    /// Inspect or clear thread checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Show an agent's recent conversation history (newest first)
    History {
        /// Agent id
        agent: String,

        /// Maximum number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show an agent's recent decisions (newest first)
    Decisions {
        /// Agent id
        agent: String,

        /// Maximum number of decisions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Search an agent's recent conversations and decisions
    Search {
        /// Text to look for (case-insensitive)
        query: String,

        /// Agent whose memory is searched
        #[arg(short, long)]
        agent: String,

        /// Maximum number of hits
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Delete an agent's conversations, decisions and state
    Clear {
        /// Agent id
        agent: String,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List a thread's checkpoints (newest first)
    List {
        /// Thread id
        thread: String,

        /// Maximum number of checkpoints to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show a thread's latest checkpoint
    Latest {
        /// Thread id
        thread: String,
    },
    /// Show one checkpoint by id
    Show {
        /// Checkpoint id
        id: String,
    },
    /// Show a thread's checkpoint statistics
    Stats {
        /// Thread id
        thread: String,
    },
    /// Delete every checkpoint of a thread
    Clear {
        /// Thread id
        thread: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::from_env()
    };
    init_tracing(format, level);

    let config = BackendConfig::from_env().context("Invalid RECALL_* configuration")?;
    let store = match MemoryStore::connect(&config).await {
        Ok(store) => store,
        Err(e) if matches!(cli.command, Commands::Health) => {
            warn!(host = %config.host, port = config.port, error = %e, "Backend unreachable");
            println!("{}", serde_json::to_string_pretty(&unreachable_health(&e))?);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to connect to Redis at {}:{}", config.host, config.port)
            })
        }
    };

    let output = run(cli.command, &store).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    if output.get("status").and_then(Value::as_str) == Some("unhealthy") {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Execute one command against the store and return its JSON output.
async fn run(command: Commands, store: &MemoryStore) -> Result<Value> {
    let checkpoints = CheckpointManager::from_store(store);
    match command {
        Commands::Health => cmd_health(store, &checkpoints).await,
        Commands::Stats => cmd_stats(store).await,
        Commands::Checkpoints { action } => cmd_checkpoints(&checkpoints, action).await,
        Commands::History { agent, limit } => {
            let history = store
                .get_conversation_history(&agent, limit)
                .await
                .context("Failed to read conversation history")?;
            Ok(json!({ "agent_id": agent, "history": history }))
        }
        Commands::Decisions { agent, limit } => {
            let decisions = store
                .get_recent_decisions(&agent, limit)
                .await
                .context("Failed to read decisions")?;
            Ok(json!({ "agent_id": agent, "decisions": decisions }))
        }
        Commands::Search {
            query,
            agent,
            limit,
        } => {
            let hits = store
                .search_memory(&query, &agent, limit)
                .await
                .context("Failed to search memory")?;
            Ok(json!({ "query": query, "agent_id": agent, "hits": hits }))
        }
        Commands::Clear { agent } => cmd_clear(store, &agent).await,
    }
}

async fn cmd_health(store: &MemoryStore, checkpoints: &CheckpointManager) -> Result<Value> {
    let backend = store.health_check().await;
    let checkpoint = checkpoints.health_check().await;
    let status = if backend.is_healthy() && checkpoint.checkpoint_operations {
        "healthy"
    } else {
        "unhealthy"
    };

    Ok(json!({
        "status": status,
        "backend": backend,
        "checkpoints": checkpoint,
    }))
}

/// Health output when no connection could be opened at all.
fn unreachable_health(error: &StorageError) -> Value {
    json!({
        "status": "unhealthy",
        "backend": HealthReport::unreachable(error),
    })
}

async fn cmd_stats(store: &MemoryStore) -> Result<Value> {
    let stats = store
        .get_memory_stats()
        .await
        .context("Failed to collect memory statistics")?;
    Ok(serde_json::to_value(stats)?)
}

async fn cmd_checkpoints(checkpoints: &CheckpointManager, action: CheckpointAction) -> Result<Value> {
    let value = match action {
        CheckpointAction::List { thread, limit } => {
            let listed = checkpoints
                .list_checkpoints(&thread, limit)
                .await
                .context("Failed to list checkpoints")?;
            json!({ "thread_id": thread, "checkpoints": listed })
        }
        CheckpointAction::Latest { thread } => {
            let latest = checkpoints
                .get_latest_checkpoint(&thread)
                .await
                .context("Failed to read latest checkpoint")?;
            json!({ "thread_id": thread, "checkpoint": latest })
        }
        CheckpointAction::Show { id } => {
            let checkpoint = checkpoints
                .load_checkpoint(&id)
                .await
                .context("Failed to load checkpoint")?
                .with_context(|| format!("Checkpoint not found: {id}"))?;
            serde_json::to_value(checkpoint)?
        }
        CheckpointAction::Stats { thread } => serde_json::to_value(
            checkpoints
                .get_thread_statistics(&thread)
                .await
                .context("Failed to read thread statistics")?,
        )?,
        CheckpointAction::Clear { thread } => {
            let deleted = checkpoints
                .clear_thread_checkpoints(&thread)
                .await
                .context("Failed to clear thread checkpoints")?;
            info!(thread_id = %thread, deleted, "Cleared thread checkpoints");
            json!({ "thread_id": thread, "deleted": deleted })
        }
    };
    Ok(value)
}

async fn cmd_clear(store: &MemoryStore, agent: &str) -> Result<Value> {
    let cleared = store
        .clear_agent_memory(agent)
        .await
        .context("Failed to clear agent memory")?;
    Ok(json!({ "agent_id": agent, "cleared": cleared }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_state::fakes::MemoryKvBackend;
    use recall_state::KeySpace;
    use std::sync::Arc;

    fn store() -> (Arc<MemoryKvBackend>, MemoryStore) {
        let kv = Arc::new(MemoryKvBackend::new());
        let store = MemoryStore::new(kv.clone(), KeySpace::new(Some("meshnet")));
        (kv, store)
    }

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["recall", "history", "miner-1", "--verbose", "--json"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::History { ref agent, limit: 10 } if agent == "miner-1"
        ));
    }

    #[test]
    fn test_parse_search_requires_agent() {
        assert!(Cli::try_parse_from(["recall", "search", "mining"]).is_err());
        assert!(matches!(
            parse(&["recall", "search", "mining", "--agent", "a", "-l", "3"]),
            Commands::Search { limit: 3, .. }
        ));
    }

    #[test]
    fn test_parse_checkpoint_actions() {
        assert!(matches!(
            parse(&["recall", "checkpoints", "list", "t1", "--limit", "2"]),
            Commands::Checkpoints {
                action: CheckpointAction::List { limit: 2, .. }
            }
        ));
        assert!(matches!(
            parse(&["recall", "checkpoints", "show", "abc"]),
            Commands::Checkpoints {
                action: CheckpointAction::Show { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_history_and_clear_commands() {
        let (_, store) = store();
        store
            .store_conversation("miner-1", json!({"msg": "hello"}))
            .await
            .unwrap();

        let out = run(parse(&["recall", "history", "miner-1"]), &store).await.unwrap();
        assert_eq!(out["agent_id"], "miner-1");
        assert_eq!(out["history"][0]["data"]["msg"], "hello");

        let out = run(parse(&["recall", "clear", "miner-1"]), &store).await.unwrap();
        assert_eq!(out["cleared"], true);
        let out = run(parse(&["recall", "clear", "miner-1"]), &store).await.unwrap();
        assert_eq!(out["cleared"], false);
    }

    #[tokio::test]
    async fn test_checkpoint_commands() {
        let (_, store) = store();
        let manager = CheckpointManager::from_store(&store);
        let id = manager
            .save_checkpoint("t1", json!({"step": 3}), None)
            .await
            .unwrap();

        let out = run(parse(&["recall", "checkpoints", "latest", "t1"]), &store)
            .await
            .unwrap();
        assert_eq!(out["checkpoint"]["data"]["step"], 3);

        let out = run(parse(&["recall", "checkpoints", "show", id.as_str()]), &store)
            .await
            .unwrap();
        assert_eq!(out["thread_id"], "t1");

        let out = run(parse(&["recall", "checkpoints", "stats", "t1"]), &store)
            .await
            .unwrap();
        assert_eq!(out["checkpoint_count"], 1);

        let out = run(parse(&["recall", "checkpoints", "clear", "t1"]), &store)
            .await
            .unwrap();
        assert_eq!(out["deleted"], 1);

        let err = run(parse(&["recall", "checkpoints", "show", id.as_str()]), &store)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Checkpoint not found"));
    }

    #[tokio::test]
    async fn test_search_and_stats_commands() {
        let (_, store) = store();
        store
            .store_decision("a", json!({"action": "start mining"}))
            .await
            .unwrap();

        let out = run(parse(&["recall", "search", "MINING", "--agent", "a"]), &store)
            .await
            .unwrap();
        assert_eq!(out["hits"][0]["relevance"], "medium");
        assert_eq!(out["hits"][0]["type"], "decision");

        let out = run(parse(&["recall", "stats"]), &store).await.unwrap();
        assert_eq!(out["key_counts"]["decision"], 1);
        assert_eq!(out["key_counts"]["decision_index"], 1);
    }

    #[test]
    fn test_health_output_when_connect_fails() {
        let err = StorageError::Connection("Connection refused (os error 111)".into());
        let out = unreachable_health(&err);
        assert_eq!(out["status"], "unhealthy");
        assert_eq!(out["backend"]["connected"], false);
        assert_eq!(out["backend"]["status"], "unhealthy");
        assert!(out["backend"]["error"]
            .as_str()
            .unwrap()
            .contains("Connection refused"));
    }

    #[tokio::test]
    async fn test_health_command_reports_unreachable_backend() {
        let (kv, store) = store();
        let out = run(Commands::Health, &store).await.unwrap();
        assert_eq!(out["status"], "healthy");

        kv.set_online(false);
        let out = run(Commands::Health, &store).await.unwrap();
        assert_eq!(out["status"], "unhealthy");
        assert_eq!(out["backend"]["connected"], false);
    }
}
