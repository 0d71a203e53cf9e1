use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use anyhow::{Result, Context};
use log::info;

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Establishes a connection pool for the database at the given path
pub fn establish_pool(db_path: &Path) -> Result<SqlitePool> {
	info!("SQLite database will be located at: {:?}", db_path);

	if let Some(parent) = db_path.parent() {
		std::fs::create_dir_all(parent)
			.context("Failed to create database directory")?;
	}

	let manager = SqliteConnectionManager::file(db_path);

	let pool = Pool::builder()
		.max_size(15)
		.build(manager)
		.context("Failed to create SQLite connection pool")?;

	info!("SQLite connection pool established successfully");
	Ok(pool)
}
