//! CLI tool for the task-info error tables.
//!
//! Provides commands for:
//! - Creating the error tables a configuration needs
//! - Counting recorded errors per target table
//! - Listing recorded conflicts of one table

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;

use errmgr_core::config::ErrorManagerConfig;
use errmgr_core::engine::{ExecutionEngine, SqlValue, SqliteEngine, Statement};
use errmgr_core::schema::{self, ErrorTable};
use errmgr_runtime::ErrorManager;

/// Command-line arguments for the error table tool.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database the import writes to
    #[arg(long)]
    db: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the task-info schema and the error tables in use
    Init,

    /// Count recorded errors per table
    Stats,

    /// List recorded conflicts of one table
    Conflicts {
        /// Target table name as recorded
        #[arg(long)]
        table: String,

        /// Maximum rows to list
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

#[derive(Debug, Serialize)]
struct TableCount {
    error_table: &'static str,
    table_name: String,
    count: i64,
}

#[derive(Debug, Serialize)]
struct ConflictRow {
    row_id: i64,
    index_name: String,
    key_data: String,
    row_data: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => ErrorManagerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ErrorManagerConfig::default(),
    };
    config.apply_env_overrides()?;
    if !config.persistence_enabled() {
        bail!("task_info_schema is empty, nothing is persisted");
    }

    let engine = Arc::new(
        SqliteEngine::open(&cli.db, &config.engine_config())
            .with_context(|| format!("opening {}", cli.db.display()))?,
    );
    engine.ensure_schema(&config.task_info_schema).await?;
    tracing::debug!(
        "Opened {} with task-info schema {}",
        cli.db.display(),
        config.task_info_schema
    );
    let schema_name = schema::escape_identifier(&config.task_info_schema);

    match cli.command {
        Commands::Init => {
            let shared: Arc<dyn ExecutionEngine> = engine.clone();
            let manager = ErrorManager::new(Some(shared), &config);
            manager.init().await?;
            let tables: Vec<&str> = manager.enabled_tables().iter().map(|t| t.name()).collect();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else if tables.is_empty() {
                println!("No error tables are needed for this configuration");
            } else {
                for table in tables {
                    println!("Created {}", schema::fmt_table_name(&schema_name, table));
                }
            }
        }
        Commands::Stats => {
            let counts = stats(&engine, &schema_name).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else if counts.is_empty() {
                println!("No errors recorded");
            } else {
                for c in &counts {
                    println!("{:<20} {:<40} {:>10}", c.error_table, c.table_name, c.count);
                }
            }
        }
        Commands::Conflicts { table, limit } => {
            let rows = conflicts(&engine, &schema_name, &table, limit).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for r in &rows {
                    println!("{:>8}  {:<16} {}  {}", r.row_id, r.index_name, r.key_data, r.row_data);
                }
            }
        }
    }

    Ok(())
}

/// Error tables present in the attached schema.
async fn existing_tables(engine: &SqliteEngine, schema_name: &str) -> anyhow::Result<Vec<ErrorTable>> {
    let rows = engine
        .query(
            "list error tables",
            Statement::new(format!(
                "SELECT name FROM {}.sqlite_master WHERE type = 'table'",
                schema_name
            )),
        )
        .await?;
    let names: Vec<String> = rows
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect();
    Ok(ErrorTable::ALL
        .into_iter()
        .filter(|table| names.iter().any(|n| n == table.name()))
        .collect())
}

async fn stats(engine: &SqliteEngine, schema_name: &str) -> anyhow::Result<Vec<TableCount>> {
    let mut counts = Vec::new();
    for table in existing_tables(engine, schema_name).await? {
        let rows = engine
            .query("count errors", schema::count_by_table(schema_name, table))
            .await?;
        for row in rows {
            let [table_name, count]: [SqlValue; 2] = row
                .try_into()
                .map_err(|_| anyhow::anyhow!("unexpected count row"))?;
            counts.push(TableCount {
                error_table: table.name(),
                table_name: table_name.as_str().unwrap_or_default().to_string(),
                count: count.as_i64().unwrap_or_default(),
            });
        }
    }
    Ok(counts)
}

async fn conflicts(
    engine: &SqliteEngine,
    schema_name: &str,
    table: &str,
    limit: i64,
) -> anyhow::Result<Vec<ConflictRow>> {
    if !existing_tables(engine, schema_name)
        .await?
        .contains(&ErrorTable::ConflictError)
    {
        bail!("{} does not exist", schema::fmt_table_name(schema_name, schema::CONFLICT_ERROR_TABLE));
    }
    let rows = engine
        .query(
            "list conflicts",
            schema::select_conflict_details(schema_name, table, limit),
        )
        .await?;
    rows.into_iter()
        .map(|row| {
            let [row_id, index_name, key_data, row_data]: [SqlValue; 4] = row
                .try_into()
                .map_err(|_| anyhow::anyhow!("unexpected conflict row"))?;
            Ok(ConflictRow {
                row_id: row_id.as_i64().unwrap_or_default(),
                index_name: index_name.as_str().unwrap_or_default().to_string(),
                key_data: key_data.as_str().unwrap_or_default().to_string(),
                row_data: row_data.as_str().unwrap_or_default().to_string(),
            })
        })
        .collect()
}
