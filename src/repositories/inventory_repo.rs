// src/repositories/inventory_repo.rs

use crate::db::connection::SqlitePool;
use crate::models::inventory::InventoryEntry;
use rusqlite::{params, Row};
use std::sync::Arc;
use anyhow::{Result, Context};
use chrono::NaiveDateTime;
use tokio::task;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub struct InventoryRepository {
	pool: Arc<SqlitePool>,
}

impl InventoryRepository {
	pub fn new(pool: Arc<SqlitePool>) -> Self {
		Self { pool }
	}

	/// Inserts the entry unless a non-deleted row with the same
	/// (file_path, name, version) already exists. Returns whether a row was
	/// actually inserted.
	pub async fn insert_if_absent(&self, entry: InventoryEntry) -> Result<bool> {
		let pool = self.pool.clone();

		task::spawn_blocking(move || -> Result<bool> {
			let conn = pool.get().context("Failed to get database connection")?;

			let exists: bool = conn.query_row(
				"SELECT EXISTS(
					SELECT 1 FROM white_list
					WHERE file_path = ?1
					  AND name = ?2
					  AND IFNULL(version, '') = IFNULL(?3, '')
					  AND isdelete = 0
				)",
				params![entry.file_path, entry.name, entry.version],
				|row| row.get(0),
			).context("Failed to check for existing inventory entry")?;

			if exists {
				return Ok(false);
			}

			let create_time = entry.create_time
				.unwrap_or_else(|| chrono::Utc::now().naive_utc())
				.format(TIME_FORMAT)
				.to_string();

			match conn.execute(
				"INSERT INTO white_list (file_path, name, version, language, package_manager, isdelete, create_time)
				 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
				params![
					entry.file_path,
					entry.name,
					entry.version,
					entry.language,
					entry.package_manager,
					create_time,
				],
			) {
				Ok(_) => Ok(true),
				// the partial unique index closes the race between the check and the insert
				Err(rusqlite::Error::SqliteFailure(e, _))
					if e.code == rusqlite::ErrorCode::ConstraintViolation => Ok(false),
				Err(e) => Err(e).context("Failed to insert inventory entry"),
			}
		})
			.await
			.context("Failed to execute database operation")?
	}

	/// All non-deleted entries recorded for a project's extraction path.
	pub async fn list_by_file_path(&self, file_path: &str) -> Result<Vec<InventoryEntry>> {
		let pool = self.pool.clone();
		let file_path = file_path.to_string();

		task::spawn_blocking(move || -> Result<Vec<InventoryEntry>> {
			let conn = pool.get().context("Failed to get database connection")?;
			let mut stmt = conn.prepare(
				"SELECT id, file_path, name, version, language, package_manager, isdelete, create_time
				 FROM white_list
				 WHERE file_path = ?1 AND isdelete = 0
				 ORDER BY id"
			)?;

			let entries = stmt.query_map([file_path], row_to_entry)?
				.collect::<Result<Vec<_>, _>>()
				.context("Failed to read inventory entries")?;

			Ok(entries)
		})
			.await
			.context("Failed to execute database operation")?
	}

	/// Non-deleted entries for one language of a project.
	pub async fn list_by_file_path_and_language(&self, file_path: &str, language: &str) -> Result<Vec<InventoryEntry>> {
		let pool = self.pool.clone();
		let file_path = file_path.to_string();
		let language = language.to_string();

		task::spawn_blocking(move || -> Result<Vec<InventoryEntry>> {
			let conn = pool.get().context("Failed to get database connection")?;
			let mut stmt = conn.prepare(
				"SELECT id, file_path, name, version, language, package_manager, isdelete, create_time
				 FROM white_list
				 WHERE file_path = ?1 AND language = ?2 AND isdelete = 0
				 ORDER BY id"
			)?;

			let entries = stmt.query_map(params![file_path, language], row_to_entry)?
				.collect::<Result<Vec<_>, _>>()
				.context("Failed to read inventory entries")?;

			Ok(entries)
		})
			.await
			.context("Failed to execute database operation")?
	}

	/// Soft-deletes every entry for a project's extraction path, returning the
	/// number of rows affected.
	pub async fn soft_delete_by_file_path(&self, file_path: &str) -> Result<usize> {
		let pool = self.pool.clone();
		let file_path = file_path.to_string();

		task::spawn_blocking(move || -> Result<usize> {
			let conn = pool.get().context("Failed to get database connection")?;
			let affected = conn.execute(
				"UPDATE white_list SET isdelete = 1 WHERE file_path = ?1 AND isdelete = 0",
				[file_path],
			).context("Failed to soft-delete inventory entries")?;
			Ok(affected)
		})
			.await
			.context("Failed to execute database operation")?
	}
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<InventoryEntry> {
	Ok(InventoryEntry {
		id: row.get(0)?,
		file_path: row.get(1)?,
		name: row.get(2)?,
		version: row.get(3)?,
		language: row.get(4)?,
		package_manager: row.get(5)?,
		is_deleted: row.get::<_, i64>(6)? != 0,
		create_time: row.get::<_, Option<String>>(7)?
			.and_then(|t| NaiveDateTime::parse_from_str(&t, TIME_FORMAT).ok()),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::{connection, schema};
	use tempfile::TempDir;

	async fn test_repository() -> (TempDir, InventoryRepository) {
		let dir = TempDir::new().unwrap();
		let pool = connection::establish_pool(&dir.path().join("test.db")).unwrap();
		schema::create_tables(&pool.get().unwrap()).unwrap();
		(dir, InventoryRepository::new(Arc::new(pool)))
	}

	fn entry(file_path: &str, name: &str, version: Option<&str>) -> InventoryEntry {
		InventoryEntry::new(
			file_path.to_string(),
			name.to_string(),
			version.map(str::to_string),
			"java".to_string(),
			"maven".to_string(),
		)
	}

	#[tokio::test]
	async fn test_insert_if_absent_is_idempotent() {
		let (_dir, repo) = test_repository().await;

		assert!(repo.insert_if_absent(entry("/p1", "junit", Some("4.12"))).await.unwrap());
		assert!(!repo.insert_if_absent(entry("/p1", "junit", Some("4.12"))).await.unwrap());

		let entries = repo.list_by_file_path("/p1").await.unwrap();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].name, "junit");
		assert_eq!(entries[0].version.as_deref(), Some("4.12"));
	}

	#[tokio::test]
	async fn test_version_is_part_of_the_key() {
		let (_dir, repo) = test_repository().await;

		assert!(repo.insert_if_absent(entry("/p1", "junit", Some("4.12"))).await.unwrap());
		assert!(repo.insert_if_absent(entry("/p1", "junit", Some("4.13"))).await.unwrap());
		assert!(repo.insert_if_absent(entry("/p1", "junit", None)).await.unwrap());
		assert!(!repo.insert_if_absent(entry("/p1", "junit", None)).await.unwrap());

		assert_eq!(repo.list_by_file_path("/p1").await.unwrap().len(), 3);
	}

	#[tokio::test]
	async fn test_same_component_in_two_projects() {
		let (_dir, repo) = test_repository().await;

		assert!(repo.insert_if_absent(entry("/p1", "junit", Some("4.12"))).await.unwrap());
		assert!(repo.insert_if_absent(entry("/p2", "junit", Some("4.12"))).await.unwrap());

		assert_eq!(repo.list_by_file_path("/p1").await.unwrap().len(), 1);
		assert_eq!(repo.list_by_file_path("/p2").await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_list_by_language_filters() {
		let (_dir, repo) = test_repository().await;

		repo.insert_if_absent(entry("/p1", "junit", Some("4.12"))).await.unwrap();
		let mut py = entry("/p1", "flask", Some("2.3.0"));
		py.language = "python".to_string();
		py.package_manager = "pip".to_string();
		repo.insert_if_absent(py).await.unwrap();

		let java = repo.list_by_file_path_and_language("/p1", "java").await.unwrap();
		assert_eq!(java.len(), 1);
		assert_eq!(java[0].name, "junit");

		let python = repo.list_by_file_path_and_language("/p1", "python").await.unwrap();
		assert_eq!(python.len(), 1);
		assert_eq!(python[0].package_manager, "pip");
	}

	#[tokio::test]
	async fn test_soft_delete_hides_rows_and_frees_the_key() {
		let (_dir, repo) = test_repository().await;

		repo.insert_if_absent(entry("/p1", "junit", Some("4.12"))).await.unwrap();
		assert_eq!(repo.soft_delete_by_file_path("/p1").await.unwrap(), 1);
		assert!(repo.list_by_file_path("/p1").await.unwrap().is_empty());

		// a re-parse after delete may record the component again
		assert!(repo.insert_if_absent(entry("/p1", "junit", Some("4.12"))).await.unwrap());
	}
}
