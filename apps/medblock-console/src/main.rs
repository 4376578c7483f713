//! Interactive SQL console over the MedBlock patient store

mod history;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

use medblock_core::{Config, DeletePolicy, View};

use history::{QueryHistory, HISTORY_LIMIT};
use render::{render_log, render_patients, render_result};

#[derive(Parser)]
#[command(name = "medblock", version)]
#[command(about = "Query the MedBlock patient store")]
struct Args {
    /// Directory holding the database image and query log
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Reject DELETE statements as well as DROP/TRUNCATE
    #[arg(long)]
    strict_delete: bool,

    /// Do not insert the sample patients into a fresh store
    #[arg(long)]
    no_seed: bool,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.data_dir.unwrap_or_else(Config::data_dir));
        if self.strict_delete {
            config.delete_policy = DeletePolicy::Reject;
        }
        config.seed_sample_data = !self.no_seed;
        config
    }
}

enum Outcome {
    Continue,
    Quit,
}

const HELP: &str = "\
.patients   list registered patients
.count      number of patients
.history    last statements run in this session
.log        last statements run by any view of this store
.migrate    rewrite machine-format creation dates
.refresh    reload the store from disk
.quit       exit
Anything else is run as SQL.";

#[tokio::main]
async fn main() -> Result<()> {
    medblock_core::init_logging();

    let config = Args::parse().into_config();
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", config.data_dir))?;

    let view = View::open_on_disk(config)
        .await
        .context("Failed to open patient store")?;

    println!("MedBlock console, store at {:?}", view.config().data_dir);
    println!("Type .help for commands");

    let mut history = QueryHistory::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("medblock> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match handle_line(&view, &mut history, line).await {
            Outcome::Continue => {}
            Outcome::Quit => break,
        }
    }

    view.close();
    Ok(())
}

async fn handle_line(view: &View, history: &mut QueryHistory, line: &str) -> Outcome {
    match line {
        ".quit" | ".exit" => return Outcome::Quit,
        ".help" => println!("{}", HELP),
        ".patients" => match view.get_all_patients().await {
            Ok(patients) => println!("{}", render_patients(&patients)),
            Err(e) => eprintln!("Error: {}", e),
        },
        ".count" => match view.get_patient_count().await {
            Ok(count) => println!("{} patient(s)", count),
            Err(e) => eprintln!("Error: {}", e),
        },
        ".history" => {
            if history.is_empty() {
                println!("No statements yet");
            }
            for (i, sql) in history.iter().enumerate() {
                println!("{:>2}  {}", i + 1, sql);
            }
        }
        ".log" => {
            let records = view.shared_query_log().await.recent(HISTORY_LIMIT);
            println!("{}", render_log(&records));
        }
        ".migrate" => match view.repository().migrate_created_at().await {
            Ok(count) => println!("Migrated {} date(s)", count),
            Err(e) => eprintln!("Error: {}", e),
        },
        ".refresh" => {
            view.refresh();
            println!("Store will be reloaded on next access");
        }
        sql if sql.starts_with('.') => eprintln!("Unknown command {}; try .help", sql),
        sql => match view.execute_query(sql).await {
            Ok(result) => {
                history.push(sql);
                println!("{}", render_result(&result));
            }
            Err(e) => {
                tracing::debug!(error = %e, "Statement failed");
                eprintln!("Error: {}", e);
            }
        },
    }

    Outcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_map_to_config() {
        let args = Args::parse_from(["medblock", "--data-dir", "/tmp/mb", "--strict-delete"]);
        let config = args.into_config();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/mb"));
        assert_eq!(config.delete_policy, DeletePolicy::Reject);
        assert!(config.seed_sample_data);
    }

    #[test]
    fn test_defaults() {
        let config = Args::parse_from(["medblock"]).into_config();
        assert_eq!(config.delete_policy, DeletePolicy::Allow);
        assert_eq!(config.data_dir, Config::data_dir());
    }
}
