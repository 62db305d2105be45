use std::path::PathBuf;
use std::sync::Arc;

mod app;
mod config;
mod db;
mod error;
mod models;
mod server;
mod storage;
mod tracker;

use app::App;
use config::Config;
use error::{AppError, Result};

const USAGE: &str = "Usage: blog-images [--config <path>] [COMMAND]

Commands:
  --serve                   Run the HTTP endpoints (default)
  --cleanup                 Delete images whose grace period has passed
  --sync                    Reconcile every article's images
  --stats                   Print image statistics
  --reconcile <article_id>  Reconcile one article as stored
  --restore <article_id>    Mark an article's images used again
  --force-delete <id>...    Delete images immediately";

enum Command {
    Serve,
    Cleanup,
    Sync,
    Stats,
    Reconcile(i64),
    Restore(i64),
    ForceDelete(Vec<i64>),
    Help,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG overrides the info default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, command) = parse_args(&args)?;

    if let Command::Help = command {
        println!("{}", USAGE);
        return Ok(());
    }

    // Load configuration
    let config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let app = App::new(config).await?;

    match command {
        Command::Serve => server::serve(Arc::new(app)).await?,
        Command::Cleanup => {
            let report = app.tracker.run_cleanup().await?;
            print_json(&report)?;
            if report.has_failures() {
                tracing::warn!("{} images could not be deleted", report.failures.len());
            }
        }
        Command::Sync => print_json(&app.tracker.sync().await?)?,
        Command::Stats => print_json(&app.tracker.stats().await?)?,
        Command::Reconcile(article_id) => {
            print_json(&app.tracker.reconcile_article(article_id).await?)?
        }
        Command::Restore(article_id) => {
            let restored = app.tracker.restore_article_images(article_id).await?;
            println!("Restored {} images of article {}", restored, article_id);
        }
        Command::ForceDelete(ids) => print_json(&app.tracker.force_delete(&ids).await?)?,
        Command::Help => {}
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_args(args: &[String]) -> Result<(Option<PathBuf>, Command)> {
    let mut config_path = None;
    let mut command = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let parsed = match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| AppError::validation("--config needs a path"))?;
                config_path = Some(PathBuf::from(path));
                continue;
            }
            "--serve" => Command::Serve,
            "--cleanup" => Command::Cleanup,
            "--sync" => Command::Sync,
            "--stats" => Command::Stats,
            "--reconcile" => Command::Reconcile(parse_id(iter.next(), arg)?),
            "--restore" => Command::Restore(parse_id(iter.next(), arg)?),
            "--force-delete" => {
                let ids = iter
                    .by_ref()
                    .map(|id| parse_id(Some(id), arg))
                    .collect::<Result<Vec<_>>>()?;
                Command::ForceDelete(ids)
            }
            "-h" | "--help" => Command::Help,
            other => {
                return Err(AppError::validation(format!(
                    "unknown argument {}\n\n{}",
                    other, USAGE
                )))
            }
        };
        if command.replace(parsed).is_some() {
            return Err(AppError::validation("only one command may be given"));
        }
    }

    Ok((config_path, command.unwrap_or(Command::Serve)))
}

fn parse_id(value: Option<&String>, flag: &str) -> Result<i64> {
    let value = value.ok_or_else(|| AppError::validation(format!("{} needs an id", flag)))?;
    value
        .parse()
        .map_err(|_| AppError::validation(format!("{} expects numeric ids, got {}", flag, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn serve_is_the_default() {
        let (path, command) = parse_args(&[]).unwrap();
        assert!(path.is_none());
        assert!(matches!(command, Command::Serve));
    }

    #[test]
    fn config_combines_with_a_command() {
        let (path, command) = parse_args(&args(&["--config", "/tmp/c.toml", "--restore", "7"])).unwrap();
        assert_eq!(path, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(command, Command::Restore(7)));
    }

    #[test]
    fn force_delete_takes_remaining_ids() {
        let (_, command) = parse_args(&args(&["--force-delete", "1", "2", "3"])).unwrap();
        match command {
            Command::ForceDelete(ids) => assert_eq!(ids, vec![1, 2, 3]),
            _ => panic!("expected force delete"),
        }
    }

    #[test]
    fn bad_input_is_rejected() {
        assert!(parse_args(&args(&["--reconcile"])).is_err());
        assert!(parse_args(&args(&["--reconcile", "abc"])).is_err());
        assert!(parse_args(&args(&["--cleanup", "--sync"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }
}
