// src/config.rs

use std::env;
use std::path::PathBuf;

const DEFAULT_PARSER_BASE_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_SBOM_TOOL: &str = "./opensca-cli";
const DEFAULT_WORKER_COUNT: usize = 10;
const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Process-wide configuration, built once at startup and passed by reference.
///
/// Every knob can be overridden through the environment:
///
/// * `INVENTORY_DB_PATH` - SQLite database file
/// * `INVENTORY_UPLOAD_DIR` - root directory for extracted project uploads
/// * `INVENTORY_PARSER_URL` - base URL of the dependency parser service
/// * `INVENTORY_SBOM_TOOL` - path to the SBOM CLI executable
/// * `INVENTORY_WORKER_COUNT` - resolution worker tasks
/// * `INVENTORY_QUEUE_CAPACITY` - resolution task backlog bound
#[derive(Debug, Clone)]
pub struct AppConfig {
	pub database_path: PathBuf,
	pub upload_dir: PathBuf,
	pub parser_base_url: String,
	pub sbom_tool_path: PathBuf,
	pub worker_count: usize,
	pub queue_capacity: usize,
}

impl AppConfig {
	pub fn from_env() -> Self {
		Self {
			database_path: env_path("INVENTORY_DB_PATH", "./database/inventory.db"),
			upload_dir: env_path("INVENTORY_UPLOAD_DIR", "./upload"),
			parser_base_url: env::var("INVENTORY_PARSER_URL")
				.unwrap_or_else(|_| DEFAULT_PARSER_BASE_URL.to_string()),
			sbom_tool_path: env_path("INVENTORY_SBOM_TOOL", DEFAULT_SBOM_TOOL),
			worker_count: env_usize("INVENTORY_WORKER_COUNT", DEFAULT_WORKER_COUNT),
			queue_capacity: env_usize("INVENTORY_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
		}
	}
}

fn env_path(key: &str, default: &str) -> PathBuf {
	env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn env_usize(key: &str, default: usize) -> usize {
	env::var(key)
		.ok()
		.and_then(|v| v.parse().ok())
		.filter(|&v| v > 0)
		.unwrap_or(default)
}
