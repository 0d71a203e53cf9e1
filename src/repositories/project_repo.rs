// src/repositories/project_repo.rs

use crate::db::connection::SqlitePool;
use crate::models::project::Project;
use rusqlite::{params, Row};
use std::sync::Arc;
use anyhow::{Result, Context, anyhow};
use chrono::NaiveDateTime;
use tokio::task;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Creates a project row. A non-deleted project with the same name is a
/// business-rule violation.
pub async fn create_project(pool: Arc<SqlitePool>, project: Project) -> Result<i64> {
	task::spawn_blocking(move || -> Result<i64> {
		let conn = pool.get().context("Failed to get database connection")?;

		let name_taken: bool = conn.query_row(
			"SELECT EXISTS(SELECT 1 FROM projects WHERE name = ?1 AND isdelete = 0)",
			[&project.name],
			|row| row.get(0),
		).context("Failed to check for duplicate project name")?;
		if name_taken {
			return Err(anyhow!("Project already exists: {}", project.name));
		}

		let company_exists: bool = conn.query_row(
			"SELECT EXISTS(SELECT 1 FROM companies WHERE company_id = ?1)",
			[project.company_id],
			|row| row.get(0),
		).context("Failed to check company")?;
		if !company_exists {
			return Err(anyhow!("Company does not exist: {}", project.company_id));
		}

		let create_time = project.create_time
			.unwrap_or_else(|| chrono::Utc::now().naive_utc())
			.format(TIME_FORMAT)
			.to_string();

		conn.execute(
			"INSERT INTO projects (company_id, name, description, language, file_path, risk_threshold, isdelete, create_time)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
			params![
				project.company_id,
				project.name,
				project.description,
				project.language,
				project.file_path,
				project.risk_threshold,
				create_time,
			],
		).context("Failed to insert project")?;

		Ok(conn.last_insert_rowid())
	})
		.await
		.context("Failed to execute database operation")?
}

/// Fetches a project regardless of its delete flag.
pub async fn get_project(pool: Arc<SqlitePool>, project_id: i64) -> Result<Option<Project>> {
	task::spawn_blocking(move || -> Result<Option<Project>> {
		let conn = pool.get().context("Failed to get database connection")?;
		let mut stmt = conn.prepare(
			"SELECT project_id, company_id, name, description, language, file_path, risk_threshold, isdelete, create_time
			 FROM projects WHERE project_id = ?1"
		)?;

		let mut rows = stmt.query_map([project_id], row_to_project)?;
		match rows.next() {
			Some(project) => Ok(Some(project.context("Failed to read project row")?)),
			None => Ok(None),
		}
	})
		.await
		.context("Failed to execute database operation")?
}

/// Updates name, description and risk threshold; the file path only when a
/// replacement is supplied.
pub async fn update_project(
	pool: Arc<SqlitePool>,
	project_id: i64,
	name: String,
	description: Option<String>,
	risk_threshold: i64,
	file_path: Option<String>,
) -> Result<()> {
	task::spawn_blocking(move || -> Result<()> {
		let conn = pool.get().context("Failed to get database connection")?;

		let affected = match file_path {
			Some(path) => conn.execute(
				"UPDATE projects SET name = ?1, description = ?2, risk_threshold = ?3, file_path = ?4
				 WHERE project_id = ?5 AND isdelete = 0",
				params![name, description, risk_threshold, path, project_id],
			),
			None => conn.execute(
				"UPDATE projects SET name = ?1, description = ?2, risk_threshold = ?3
				 WHERE project_id = ?4 AND isdelete = 0",
				params![name, description, risk_threshold, project_id],
			),
		}.context("Failed to update project")?;

		if affected == 0 {
			return Err(anyhow!("Project does not exist: {}", project_id));
		}
		Ok(())
	})
		.await
		.context("Failed to execute database operation")?
}

/// Records the detected language on an existing project.
pub async fn update_project_language(pool: Arc<SqlitePool>, project_id: i64, language: String) -> Result<()> {
	task::spawn_blocking(move || -> Result<()> {
		let conn = pool.get().context("Failed to get database connection")?;
		let affected = conn.execute(
			"UPDATE projects SET language = ?1 WHERE project_id = ?2 AND isdelete = 0",
			params![language, project_id],
		).context("Failed to update project language")?;

		if affected == 0 {
			return Err(anyhow!("Project does not exist: {}", project_id));
		}
		Ok(())
	})
		.await
		.context("Failed to execute database operation")?
}

/// Soft-deletes a project row.
pub async fn soft_delete_project(pool: Arc<SqlitePool>, project_id: i64) -> Result<()> {
	task::spawn_blocking(move || -> Result<()> {
		let conn = pool.get().context("Failed to get database connection")?;
		let affected = conn.execute(
			"UPDATE projects SET isdelete = 1 WHERE project_id = ?1 AND isdelete = 0",
			[project_id],
		).context("Failed to soft-delete project")?;

		if affected == 0 {
			return Err(anyhow!("Project does not exist: {}", project_id));
		}
		Ok(())
	})
		.await
		.context("Failed to execute database operation")?
}

/// All non-deleted projects owned by a company, via the company_id relation.
pub async fn list_projects_by_company(pool: Arc<SqlitePool>, company_id: i64) -> Result<Vec<Project>> {
	task::spawn_blocking(move || -> Result<Vec<Project>> {
		let conn = pool.get().context("Failed to get database connection")?;
		let mut stmt = conn.prepare(
			"SELECT project_id, company_id, name, description, language, file_path, risk_threshold, isdelete, create_time
			 FROM projects WHERE company_id = ?1 AND isdelete = 0
			 ORDER BY project_id"
		)?;

		let projects = stmt.query_map([company_id], row_to_project)?
			.collect::<Result<Vec<_>, _>>()
			.context("Failed to read project rows")?;

		Ok(projects)
	})
		.await
		.context("Failed to execute database operation")?
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
	Ok(Project {
		project_id: row.get(0)?,
		company_id: row.get(1)?,
		name: row.get(2)?,
		description: row.get(3)?,
		language: row.get(4)?,
		file_path: row.get(5)?,
		risk_threshold: row.get(6)?,
		is_deleted: row.get::<_, i64>(7)? != 0,
		create_time: row.get::<_, Option<String>>(8)?
			.and_then(|t| NaiveDateTime::parse_from_str(&t, TIME_FORMAT).ok()),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::{connection, schema};
	use crate::repositories::company_repo;
	use tempfile::TempDir;

	async fn test_pool() -> (TempDir, Arc<SqlitePool>) {
		let dir = TempDir::new().unwrap();
		let pool = Arc::new(connection::establish_pool(&dir.path().join("test.db")).unwrap());
		schema::create_tables(&pool.get().unwrap()).unwrap();
		(dir, pool)
	}

	fn sample_project(company_id: i64, name: &str) -> Project {
		Project::new(company_id, name.to_string(), "java".to_string(), format!("/upload/{}", name))
	}

	#[tokio::test]
	async fn test_create_and_get_project() {
		let (_dir, pool) = test_pool().await;
		let company_id = company_repo::ensure_company(pool.clone(), "acme").await.unwrap();

		let id = create_project(pool.clone(), sample_project(company_id, "demo")).await.unwrap();
		let project = get_project(pool.clone(), id).await.unwrap().unwrap();
		assert_eq!(project.name, "demo");
		assert_eq!(project.language, "java");
		assert!(!project.is_deleted);
	}

	#[tokio::test]
	async fn test_duplicate_name_is_rejected() {
		let (_dir, pool) = test_pool().await;
		let company_id = company_repo::ensure_company(pool.clone(), "acme").await.unwrap();

		create_project(pool.clone(), sample_project(company_id, "demo")).await.unwrap();
		let err = create_project(pool.clone(), sample_project(company_id, "demo")).await.unwrap_err();
		assert!(err.to_string().contains("already exists"));
	}

	#[tokio::test]
	async fn test_missing_company_is_rejected() {
		let (_dir, pool) = test_pool().await;
		let err = create_project(pool.clone(), sample_project(99, "demo")).await.unwrap_err();
		assert!(err.to_string().contains("Company does not exist"));
	}

	#[tokio::test]
	async fn test_soft_delete_and_listing() {
		let (_dir, pool) = test_pool().await;
		let company_id = company_repo::ensure_company(pool.clone(), "acme").await.unwrap();

		let first = create_project(pool.clone(), sample_project(company_id, "one")).await.unwrap();
		create_project(pool.clone(), sample_project(company_id, "two")).await.unwrap();

		soft_delete_project(pool.clone(), first).await.unwrap();
		let projects = list_projects_by_company(pool.clone(), company_id).await.unwrap();
		assert_eq!(projects.len(), 1);
		assert_eq!(projects[0].name, "two");

		// deleting again is an error, the row is already flagged
		assert!(soft_delete_project(pool.clone(), first).await.is_err());
	}

	#[tokio::test]
	async fn test_update_language() {
		let (_dir, pool) = test_pool().await;
		let company_id = company_repo::ensure_company(pool.clone(), "acme").await.unwrap();

		let id = create_project(pool.clone(), sample_project(company_id, "demo")).await.unwrap();
		update_project_language(pool.clone(), id, "python".to_string()).await.unwrap();

		let project = get_project(pool.clone(), id).await.unwrap().unwrap();
		assert_eq!(project.language, "python");
	}
}
