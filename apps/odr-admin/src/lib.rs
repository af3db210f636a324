use std::{io, path::PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use odr_domain::{
	model::{SchemaId, UserId},
	search_key::SearchKey,
};
use odr_service::{CacheEvent, OdrService, SearchRequest};
use odr_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = odr_cli::VERSION,
	rename_all = "kebab",
	styles = odr_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Create or update the Postgres schema.
	Bootstrap,
	/// Print the changelist between a derived schema and its template.
	Diff {
		#[arg(long, value_name = "ID")]
		schema: SchemaId,
	},
	/// Bring a derived schema in line with its template.
	Sync {
		#[arg(long, value_name = "ID")]
		schema: SchemaId,
		#[arg(long, value_name = "ID")]
		user: UserId,
	},
	/// Run a JSON search key; searches anonymously without `--user`.
	Search {
		#[arg(long, value_name = "ID")]
		user: Option<UserId>,
		#[arg(long, value_name = "JSON")]
		key: String,
	},
	/// Raise a cache invalidation event given as tagged JSON.
	Invalidate {
		#[arg(long, value_name = "JSON")]
		event: String,
	},
}

#[derive(Serialize)]
struct Bootstrapped {
	bootstrapped: bool,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = odr_config::load(&args.config)?;
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter(&config.service.log_level));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();

	let db = Db::connect(&config.storage.postgres).await?;

	if let Command::Bootstrap = args.command {
		db.ensure_schema().await?;

		tracing::info!("Schema bootstrapped.");

		return print_json(&Bootstrapped { bootstrapped: true });
	}

	let service = OdrService::with_postgres(config, db);

	match args.command {
		Command::Bootstrap => Ok(()),
		Command::Diff { schema } => print_json(&service.diff_with_template(schema).await?),
		Command::Sync { schema, user } =>
			print_json(&service.sync_with_template(user, schema).await?),
		Command::Search { user, key } => {
			let key: SearchKey = serde_json::from_str(&key).wrap_err("Failed to decode --key.")?;

			print_json(&service.search(SearchRequest { user_id: user, key }).await?)
		},
		Command::Invalidate { event } => {
			let event: CacheEvent =
				serde_json::from_str(&event).wrap_err("Failed to decode --event.")?;

			print_json(&service.invalidate(event).await?)
		},
	}
}

/// `directive` as an env filter, or `info` when it does not parse.
fn log_filter(directive: &str) -> EnvFilter {
	EnvFilter::try_new(directive).unwrap_or_else(|err| {
		eprintln!("Invalid log level {directive:?}: {err}. Falling back to info.");

		EnvFilter::new("info")
	})
}

fn print_json(value: &impl Serialize) -> color_eyre::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_search_arguments() {
		let args = Args::try_parse_from([
			"odr-admin",
			"-c",
			"odr.toml",
			"search",
			"--user",
			"7",
			"--key",
			r#"{"schema_id":3}"#,
		])
		.expect("Arguments should parse.");

		assert_eq!(args.config, PathBuf::from("odr.toml"));
		assert!(matches!(args.command, Command::Search { user: Some(7), .. }));
	}

	#[test]
	fn invalid_log_level_falls_back_to_info() {
		assert_eq!(log_filter("debug").to_string(), "debug");
		assert_eq!(log_filter("odr=notalevel").to_string(), "info");
	}

	#[test]
	fn sync_requires_a_user() {
		assert!(Args::try_parse_from(["odr-admin", "-c", "odr.toml", "sync", "--schema", "3"]).is_err());
	}
}
