use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use quarry_core::{Config, Quarry};
use quarry_index::{ChangeEvent, IndexingJob, RerankMethod, chunk_file};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "quarry",
    about = "Index repositories into a vector store and search them",
    version
)]
struct Cli {
    /// Path to the TOML config. Falls back to `QUARRY_CONFIG`, then
    /// `config/quarry.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index every supported file under a repository.
    Index {
        repo: PathBuf,
        #[arg(long)]
        collection: String,
        /// Drop the collection and its ledger entries first.
        #[arg(long)]
        force: bool,
    },
    /// Apply a push or pull-request change set.
    Sync {
        repo: PathBuf,
        /// JSON file holding the change event. Overrides the list flags.
        #[arg(long)]
        event: Option<PathBuf>,
        #[arg(long, value_delimiter = ',')]
        added: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        modified: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        deleted: Vec<String>,
        #[arg(long, default_value = "")]
        repo_name: String,
        #[arg(long, default_value = "")]
        branch: String,
        #[arg(long, default_value = "")]
        commit: String,
        /// Defaults to `{repo_name}_{branch}`.
        #[arg(long)]
        collection: Option<String>,
    },
    /// Hybrid search with re-ranking.
    Search {
        query: String,
        #[arg(long)]
        collection: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        #[arg(long)]
        no_expand: bool,
        /// cross-encoder, semantic-similarity, feature-based, hybrid or basic.
        #[arg(long)]
        rerank: Option<RerankMethod>,
        #[arg(long)]
        diversify: bool,
        /// Attach a ranking explanation to every result.
        #[arg(long)]
        explain: bool,
    },
    /// Inspect or cancel indexing jobs.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },
    /// Ledger and job counters.
    Stats,
    /// Print the chunks a file would be split into.
    Chunk { file: PathBuf },
}

#[derive(Subcommand)]
enum JobsAction {
    List {
        /// Only queued and processing jobs.
        #[arg(long)]
        active: bool,
    },
    Status {
        job_id: String,
    },
    Cancel {
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    // Chunking needs no stores.
    if let Command::Chunk { file } = &cli.command {
        return print_chunks(file, &config);
    }

    let quarry = quarry_core::build(config).await?;
    let result = run(&quarry, cli.command).await;
    quarry.shutdown().await;
    result
}

async fn run(quarry: &Quarry, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Index {
            repo,
            collection,
            force,
        } => {
            quarry.recover().await?;
            let job = quarry
                .coordinator
                .index_repository(&repo, &collection, force)
                .await?;
            let job = wait(quarry, job).await?;
            print_json(&job)
        }
        Command::Sync {
            repo,
            event,
            added,
            modified,
            deleted,
            repo_name,
            branch,
            commit,
            collection,
        } => {
            let event = match event {
                Some(path) => read_event(&path)?,
                None => ChangeEvent {
                    repo: repo_name,
                    branch,
                    commit,
                    added,
                    modified,
                    deleted,
                },
            };
            quarry.recover().await?;
            let job = quarry
                .coordinator
                .incremental_index(&repo, event, collection.as_deref())
                .await?;
            let job = wait(quarry, job).await?;
            print_json(&job)
        }
        Command::Search {
            query,
            collection,
            top_k,
            no_expand,
            rerank,
            diversify,
            explain,
        } => {
            let expand = quarry.config.retrieval.expand_queries && !no_expand;
            let response = quarry
                .search(&query, &collection, top_k, expand, rerank, diversify)
                .await;
            for error in &response.errors {
                tracing::warn!("search degraded: {error}");
            }
            let results = response.results;
            if explain {
                let explained: Vec<_> = results
                    .iter()
                    .map(|r| Explained {
                        result: r,
                        explanation: quarry.reranker.explain(r),
                    })
                    .collect();
                print_json(&explained)
            } else {
                print_json(&results)
            }
        }
        Command::Jobs { action } => match action {
            JobsAction::List { active } => print_json(&quarry.coordinator.list_jobs(active).await?),
            JobsAction::Status { job_id } => {
                let Some(job) = quarry.coordinator.get_job_status(&job_id).await? else {
                    bail!("no job with id {job_id}");
                };
                print_json(&job)
            }
            JobsAction::Cancel { job_id } => {
                let cancelled = quarry.coordinator.cancel_job(&job_id).await?;
                print_json(&serde_json::json!({ "job_id": job_id, "cancelled": cancelled }))
            }
        },
        Command::Stats => print_json(&quarry.coordinator.stats().await?),
        Command::Chunk { file } => print_chunks(&file, &quarry.config),
    }
}

#[derive(Serialize)]
struct Explained<'a> {
    #[serde(flatten)]
    result: &'a quarry_index::RerankedResult,
    explanation: quarry_index::RankingExplanation,
}

/// Wait for `job`, cancelling it on Ctrl-C.
async fn wait(quarry: &Quarry, job: IndexingJob) -> anyhow::Result<IndexingJob> {
    tracing::info!(job_id = %job.job_id, collection = %job.collection, "job queued");
    tokio::select! {
        finished = quarry.coordinator.wait_for_job(&job.job_id) => Ok(finished?),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(job_id = %job.job_id, "interrupted, cancelling job");
            quarry.coordinator.cancel_job(&job.job_id).await?;
            Ok(quarry.coordinator.wait_for_job(&job.job_id).await?)
        }
    }
}

fn read_event(path: &Path) -> anyhow::Result<ChangeEvent> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid change event in {}", path.display()))
}

fn print_chunks(file: &Path, config: &Config) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let chunks = chunk_file(&file.display().to_string(), &content, &config.index.chunking);
    print_json(&chunks)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Ok(path) = std::env::var("QUARRY_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/quarry.toml")
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn search_flags_parse() {
        let cli = Cli::try_parse_from([
            "quarry",
            "search",
            "load config",
            "--collection",
            "demo_main",
            "--top-k",
            "3",
            "--rerank",
            "feature-based",
            "--diversify",
        ])
        .unwrap();
        let Command::Search {
            top_k,
            rerank,
            diversify,
            no_expand,
            ..
        } = cli.command
        else {
            panic!("expected search");
        };
        assert_eq!(top_k, 3);
        assert_eq!(rerank, Some(RerankMethod::FeatureBased));
        assert!(diversify);
        assert!(!no_expand);
    }

    #[test]
    fn sync_lists_split_on_commas() {
        let cli = Cli::try_parse_from([
            "quarry",
            "sync",
            ".",
            "--added",
            "a.py,b.md",
            "--deleted",
            "old.py",
        ])
        .unwrap();
        let Command::Sync { added, deleted, .. } = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(added, vec!["a.py", "b.md"]);
        assert_eq!(deleted, vec!["old.py"]);
    }

    #[test]
    fn unknown_rerank_method_is_rejected() {
        let parsed = Cli::try_parse_from([
            "quarry",
            "search",
            "q",
            "--collection",
            "c",
            "--rerank",
            "magic",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn explicit_config_path_wins() {
        let path = resolve_config_path(Some(PathBuf::from("custom.toml")));
        assert_eq!(path, PathBuf::from("custom.toml"));
    }

    #[test]
    fn read_event_parses_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(&path, r#"{"repo":"demo","branch":"main","added":["a.py"]}"#).unwrap();
        let event = read_event(&path).unwrap();
        assert_eq!(event.default_collection(), "demo_main");
        assert_eq!(event.added, vec!["a.py"]);
        assert!(event.deleted.is_empty());
    }
}
