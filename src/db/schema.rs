use rusqlite::Connection;
use anyhow::{Result, Context};

pub fn create_tables(conn: &Connection) -> Result<()> {
	conn.execute_batch(
		"
		CREATE TABLE IF NOT EXISTS companies (
			company_id INTEGER PRIMARY KEY AUTOINCREMENT,
			name TEXT UNIQUE NOT NULL,
			detect_strategy TEXT NOT NULL DEFAULT 'signature',
			similarity_threshold REAL NOT NULL DEFAULT 0.75,
			max_detect_count INTEGER NOT NULL DEFAULT 50,
			create_time TEXT NOT NULL
		);

		CREATE TABLE IF NOT EXISTS projects (
			project_id INTEGER PRIMARY KEY AUTOINCREMENT,
			company_id INTEGER NOT NULL REFERENCES companies(company_id),
			name TEXT NOT NULL,
			description TEXT,
			language TEXT NOT NULL,
			file_path TEXT NOT NULL,
			risk_threshold INTEGER NOT NULL DEFAULT 0,
			isdelete INTEGER NOT NULL DEFAULT 0,
			create_time TEXT NOT NULL
		);

		CREATE INDEX IF NOT EXISTS idx_project_company
		ON projects(company_id, isdelete);

		CREATE TABLE IF NOT EXISTS white_list (
			id INTEGER PRIMARY KEY AUTOINCREMENT,
			file_path TEXT NOT NULL,
			name TEXT NOT NULL,
			version TEXT,
			language TEXT NOT NULL,
			package_manager TEXT NOT NULL,
			isdelete INTEGER NOT NULL DEFAULT 0,
			create_time TEXT NOT NULL
		);

		CREATE UNIQUE INDEX IF NOT EXISTS idx_white_list_component
		ON white_list(file_path, name, IFNULL(version, '')) WHERE isdelete = 0;

		CREATE INDEX IF NOT EXISTS idx_white_list_lookup
		ON white_list(file_path, language, isdelete);
		"
	).context("Failed to create tables")?;

	Ok(())
}
