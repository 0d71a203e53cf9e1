// src/repositories/company_repo.rs

use crate::db::connection::SqlitePool;
use crate::models::company::Company;
use rusqlite::params;
use std::sync::Arc;
use anyhow::{Result, Context};
use chrono::NaiveDateTime;
use tokio::task;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub async fn create_company(pool: Arc<SqlitePool>, company: Company) -> Result<i64> {
	task::spawn_blocking(move || -> Result<i64> {
		let conn = pool.get().context("Failed to get database connection")?;

		let create_time = company.create_time
			.unwrap_or_else(|| chrono::Utc::now().naive_utc())
			.format(TIME_FORMAT)
			.to_string();

		conn.execute(
			"INSERT INTO companies (name, detect_strategy, similarity_threshold, max_detect_count, create_time)
			 VALUES (?1, ?2, ?3, ?4, ?5)",
			params![
				company.name,
				company.detect_strategy,
				company.similarity_threshold,
				company.max_detect_count,
				create_time,
			],
		).context("Failed to insert company")?;

		Ok(conn.last_insert_rowid())
	})
		.await
		.context("Failed to execute database operation")?
}

pub async fn get_company(pool: Arc<SqlitePool>, company_id: i64) -> Result<Option<Company>> {
	task::spawn_blocking(move || -> Result<Option<Company>> {
		let conn = pool.get().context("Failed to get database connection")?;
		let mut stmt = conn.prepare(
			"SELECT company_id, name, detect_strategy, similarity_threshold, max_detect_count, create_time
			 FROM companies WHERE company_id = ?1"
		)?;

		let mut rows = stmt.query_map([company_id], |row| {
			Ok(Company {
				company_id: row.get(0)?,
				name: row.get(1)?,
				detect_strategy: row.get(2)?,
				similarity_threshold: row.get(3)?,
				max_detect_count: row.get(4)?,
				create_time: row.get::<_, Option<String>>(5)?
					.and_then(|t| NaiveDateTime::parse_from_str(&t, TIME_FORMAT).ok()),
			})
		})?;

		match rows.next() {
			Some(company) => Ok(Some(company.context("Failed to read company row")?)),
			None => Ok(None),
		}
	})
		.await
		.context("Failed to execute database operation")?
}

/// Fetches a company by name, creating it with default detection settings
/// when absent. Used by bootstrap paths that need an owner for new projects.
pub async fn ensure_company(pool: Arc<SqlitePool>, name: &str) -> Result<i64> {
	let name = name.to_string();
	task::spawn_blocking(move || -> Result<i64> {
		let conn = pool.get().context("Failed to get database connection")?;

		let existing: Option<i64> = conn.query_row(
			"SELECT company_id FROM companies WHERE name = ?1",
			[&name],
			|row| row.get(0),
		).map(Some).or_else(|e| match e {
			rusqlite::Error::QueryReturnedNoRows => Ok(None),
			other => Err(other),
		}).context("Failed to look up company")?;

		if let Some(id) = existing {
			return Ok(id);
		}

		let company = Company::new(name);
		let create_time = company.create_time
			.unwrap_or_else(|| chrono::Utc::now().naive_utc())
			.format(TIME_FORMAT)
			.to_string();

		conn.execute(
			"INSERT INTO companies (name, detect_strategy, similarity_threshold, max_detect_count, create_time)
			 VALUES (?1, ?2, ?3, ?4, ?5)",
			params![
				company.name,
				company.detect_strategy,
				company.similarity_threshold,
				company.max_detect_count,
				create_time,
			],
		).context("Failed to insert company")?;

		Ok(conn.last_insert_rowid())
	})
		.await
		.context("Failed to execute database operation")?
}
