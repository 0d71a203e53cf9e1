// src/services/project_service.rs

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use tokio::task;
use crate::config::AppConfig;
use crate::db::connection::SqlitePool;
use crate::models::inventory::InventoryEntry;
use crate::models::project::Project;
use crate::repositories::{company_repo, inventory_repo::InventoryRepository, project_repo};
use crate::services::dispatcher::{ScanDispatcher, ScanTask};
use crate::utils::archive;
use crate::utils::language::{self, Detection};
use crate::utils::parser_api::{self, ParserApiClient};
use crate::utils::sbom::{SbomExporter, SbomFormat};

/// What the caller gets back immediately after an upload: resolution runs in
/// the background, the inventory fills in as workers finish.
#[derive(Debug)]
pub struct UploadOutcome {
	pub project_id: i64,
	pub detected_language: String,
	pub resolving: Vec<String>,
	pub status: &'static str,
}

pub struct ProjectService {
	pool: Arc<SqlitePool>,
	config: AppConfig,
	dispatcher: Arc<ScanDispatcher>,
	parser_client: ParserApiClient,
	inventory: InventoryRepository,
	exporter: SbomExporter,
}

impl ProjectService {
	pub fn new(
		pool: Arc<SqlitePool>,
		config: AppConfig,
		dispatcher: Arc<ScanDispatcher>,
		parser_client: ParserApiClient,
	) -> Self {
		let inventory = InventoryRepository::new(pool.clone());
		let exporter = SbomExporter::new(config.sbom_tool_path.clone(), pool.clone());
		Self { pool, config, dispatcher, parser_client, inventory, exporter }
	}

	/// Ingests an uploaded archive: extract, detect languages, create the
	/// project record, then queue one resolution task per detected language.
	///
	/// Extraction and detection are synchronous on the caller's path; the
	/// call returns as soon as the background tasks are queued. A language
	/// whose task cannot be queued is logged and skipped, the upload itself
	/// still succeeds.
	pub async fn upload_project(
		&self,
		data: &[u8],
		original_name: &str,
		name: &str,
		description: Option<String>,
		risk_threshold: i64,
		company_id: i64,
	) -> Result<UploadOutcome> {
		let company = company_repo::get_company(self.pool.clone(), company_id)
			.await?
			.ok_or_else(|| anyhow!("Company does not exist: {}", company_id))?;

		let extracted_path = {
			let data = data.to_vec();
			let original_name = original_name.to_string();
			let upload_root = self.config.upload_dir.clone();
			task::spawn_blocking(move || archive::extract_upload(&data, &original_name, &upload_root))
				.await
				.context("Failed to run extraction task")??
		};

		let detection = {
			let path = extracted_path.clone();
			let strategy = company.detect_strategy.clone();
			task::spawn_blocking(move || match strategy.as_str() {
				"size" => language::detect_by_size(&path),
				_ => language::detect_by_signatures(&path),
			})
				.await
				.context("Failed to run language detection task")?
		};
		let file_path = extracted_path.to_string_lossy().into_owned();
		let detection = self.consult_remote_detection(detection, &file_path).await;
		let primary_language = detection.primary().unwrap_or("unknown").to_string();

		let mut project = Project::new(company_id, name.to_string(), primary_language.clone(), file_path.clone());
		project.description = description;
		project.risk_threshold = risk_threshold;
		let project_id = project_repo::create_project(self.pool.clone(), project).await?;

		let resolving = self.submit_resolution_tasks(&file_path, &detection);
		info!(
			"Project {} ({}) created, detected language {}, resolving {} language(s) in background",
			project_id,
			name,
			primary_language,
			resolving.len()
		);

		Ok(UploadOutcome {
			project_id,
			detected_language: primary_language,
			resolving,
			status: "parsing",
		})
	}

	/// Queues a manual re-resolution of one language for an existing project.
	/// Accepts the usual synonyms (js/node/nodejs, cpp/c++, golang).
	/// Re-running is safe: components already recorded are not duplicated.
	pub async fn reparse_project(&self, project_id: i64, language: &str) -> Result<String> {
		let normalized = normalize_language(language);
		let project = self.active_project(project_id).await?;

		self.dispatcher.submit(ScanTask {
			file_path: project.file_path,
			language: normalized.clone(),
		})?;

		info!("Queued {} re-resolution for project {}", normalized, project_id);
		Ok(normalized)
	}

	/// Soft-deletes a project together with its inventory rows.
	pub async fn delete_project(&self, project_id: i64) -> Result<()> {
		let project = self.active_project(project_id).await?;
		project_repo::soft_delete_project(self.pool.clone(), project_id).await?;
		let removed = self.inventory.soft_delete_by_file_path(&project.file_path).await?;
		info!("Deleted project {} and {} inventory rows", project_id, removed);
		Ok(())
	}

	pub async fn update_project(
		&self,
		project_id: i64,
		name: String,
		description: Option<String>,
		risk_threshold: i64,
		file_path: Option<String>,
	) -> Result<()> {
		project_repo::update_project(self.pool.clone(), project_id, name, description, risk_threshold, file_path).await
	}

	pub async fn get_project(&self, project_id: i64) -> Result<Project> {
		self.active_project(project_id).await
	}

	pub async fn list_projects(&self, company_id: i64) -> Result<Vec<Project>> {
		project_repo::list_projects_by_company(self.pool.clone(), company_id).await
	}

	/// All recorded components of a project.
	pub async fn project_inventory(&self, project_id: i64) -> Result<Vec<InventoryEntry>> {
		let project = self.active_project(project_id).await?;
		self.inventory.list_by_file_path(&project.file_path).await
	}

	/// Recorded components of a project, restricted to one language.
	pub async fn project_inventory_by_language(&self, project_id: i64, language: &str) -> Result<Vec<InventoryEntry>> {
		let project = self.active_project(project_id).await?;
		let normalized = normalize_language(language);
		self.inventory.list_by_file_path_and_language(&project.file_path, &normalized).await
	}

	/// Produces (or returns the cached) SBOM file for a project.
	pub async fn export_sbom(&self, project_id: i64, format: &str, output_name: &str) -> Result<PathBuf> {
		let sbom_format = SbomFormat::parse(format)
			.ok_or_else(|| anyhow!("Unsupported SBOM format: {} (expected json, xml or spdx)", format))?;
		let project = self.active_project(project_id).await?;
		self.exporter.export(&project, sbom_format, output_name).await
	}

	/// Asks the parser service for the primary language when the local scan
	/// came up empty. The remote service is optional; any failure keeps the
	/// local "unknown" verdict.
	async fn consult_remote_detection(&self, detection: Detection, file_path: &str) -> Detection {
		if detection != Detection::Unknown {
			return detection;
		}
		match self.parser_client.detect_language(file_path).await {
			Ok(remote) => {
				let normalized = normalize_language(&remote);
				if parser_api::is_supported_language(&normalized) {
					Detection::Known(vec![normalized])
				} else {
					warn!("Remote detection reported unsupported language: {}", remote);
					Detection::Unknown
				}
			}
			Err(e) => {
				warn!("Remote language detection failed: {:#}", e);
				Detection::Unknown
			}
		}
	}

	fn submit_resolution_tasks(&self, file_path: &str, detection: &Detection) -> Vec<String> {
		let mut resolving = Vec::new();
		for detected in detection.languages() {
			let task = ScanTask {
				file_path: file_path.to_string(),
				language: detected.clone(),
			};
			match self.dispatcher.submit(task) {
				Ok(()) => resolving.push(detected.clone()),
				Err(e) => warn!("Skipping background resolution for {}: {}", detected, e),
			}
		}
		resolving
	}

	async fn active_project(&self, project_id: i64) -> Result<Project> {
		project_repo::get_project(self.pool.clone(), project_id)
			.await?
			.filter(|p| !p.is_deleted)
			.ok_or_else(|| anyhow!("Project not found or has been deleted: {}", project_id))
	}
}

/// Collapses the language synonyms accepted on the manual reparse interface
/// onto the parser route names.
pub fn normalize_language(language: &str) -> String {
	match language.to_lowercase().as_str() {
		"js" | "node" | "nodejs" => "javascript".to_string(),
		"cpp" | "c++" => "c".to_string(),
		"golang" => "go".to_string(),
		other => other.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::{connection, schema};
	use crate::repositories::company_repo;
	use crate::utils::parser_api::ParserApiClient;
	use std::io::Write;
	use tempfile::TempDir;
	use tokio::sync::broadcast;
	use zip::write::SimpleFileOptions;

	struct Fixture {
		_dir: TempDir,
		pool: Arc<SqlitePool>,
		service: ProjectService,
		company_id: i64,
	}

	async fn fixture() -> Fixture {
		let dir = TempDir::new().unwrap();
		let pool = Arc::new(connection::establish_pool(&dir.path().join("test.db")).unwrap());
		schema::create_tables(&pool.get().unwrap()).unwrap();

		let config = AppConfig {
			database_path: dir.path().join("test.db"),
			upload_dir: dir.path().join("upload"),
			parser_base_url: "http://127.0.0.1:1".to_string(),
			sbom_tool_path: PathBuf::from("/nonexistent/opensca-cli"),
			worker_count: 0,
			queue_capacity: 16,
		};

		let (shutdown_tx, _) = broadcast::channel(1);
		let client = ParserApiClient::new(config.parser_base_url.clone()).unwrap();
		// zero workers: tasks stay queued, nothing reaches the network in tests
		let dispatcher = Arc::new(ScanDispatcher::start(
			config.worker_count,
			config.queue_capacity,
			client.clone(),
			pool.clone(),
			&shutdown_tx,
		));
		let service = ProjectService::new(pool.clone(), config, dispatcher, client);
		let company_id = company_repo::ensure_company(pool.clone(), "acme").await.unwrap();

		Fixture { _dir: dir, pool, service, company_id }
	}

	fn python_project_zip() -> Vec<u8> {
		let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
		let options = SimpleFileOptions::default()
			.compression_method(zip::CompressionMethod::Stored);
		writer.start_file("a.py", options).unwrap();
		writer.write_all(b"import flask\n").unwrap();
		writer.start_file("requirements.txt", options).unwrap();
		writer.write_all(b"flask==2.3.0\n").unwrap();
		writer.start_file("b.py", options).unwrap();
		writer.write_all(b"import requests\n").unwrap();
		writer.finish().unwrap().into_inner()
	}

	#[tokio::test]
	async fn test_upload_detects_language_and_returns_immediately() {
		let fx = fixture().await;
		let data = python_project_zip();

		let outcome = fx.service
			.upload_project(&data, "demo.zip", "demo", None, 5, fx.company_id)
			.await
			.unwrap();

		assert_eq!(outcome.detected_language, "python");
		assert_eq!(outcome.status, "parsing");
		assert_eq!(outcome.resolving, vec!["python".to_string()]);

		let project = fx.service.get_project(outcome.project_id).await.unwrap();
		assert_eq!(project.language, "python");
		assert_eq!(project.risk_threshold, 5);
		assert!(std::path::Path::new(&project.file_path).join("a.py").exists());

		// background resolution has not run, the inventory is still empty
		assert!(fx.service.project_inventory(outcome.project_id).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_upload_with_size_strategy_company() {
		let fx = fixture().await;
		let mut company = crate::models::company::Company::new("sized".to_string());
		company.detect_strategy = "size".to_string();
		let company_id = company_repo::create_company(fx.pool.clone(), company).await.unwrap();

		let outcome = fx.service
			.upload_project(&python_project_zip(), "demo.zip", "sized-demo", None, 0, company_id)
			.await
			.unwrap();
		assert_eq!(outcome.detected_language, "python");
	}

	#[tokio::test]
	async fn test_upload_without_any_signature_is_unknown() {
		let fx = fixture().await;
		let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
		let options = SimpleFileOptions::default()
			.compression_method(zip::CompressionMethod::Stored);
		writer.start_file("readme.md", options).unwrap();
		writer.write_all(b"# docs only\n").unwrap();
		let data = writer.finish().unwrap().into_inner();

		// the remote detection service is unreachable, the local verdict stands
		let outcome = fx.service
			.upload_project(&data, "docs.zip", "docs", None, 0, fx.company_id)
			.await
			.unwrap();
		assert_eq!(outcome.detected_language, "unknown");
		assert!(outcome.resolving.is_empty());
	}

	#[tokio::test]
	async fn test_upload_rejects_missing_company() {
		let fx = fixture().await;
		let err = fx.service
			.upload_project(&python_project_zip(), "demo.zip", "demo", None, 0, 4242)
			.await
			.unwrap_err();
		assert!(err.to_string().contains("Company does not exist"));
	}

	#[tokio::test]
	async fn test_upload_rejects_duplicate_project_name() {
		let fx = fixture().await;
		let data = python_project_zip();

		fx.service.upload_project(&data, "demo.zip", "demo", None, 0, fx.company_id).await.unwrap();
		let err = fx.service
			.upload_project(&data, "demo.zip", "demo", None, 0, fx.company_id)
			.await
			.unwrap_err();
		assert!(err.to_string().contains("already exists"));
	}

	#[tokio::test]
	async fn test_upload_rejects_non_zip_payload() {
		let fx = fixture().await;
		let err = fx.service
			.upload_project(b"Rar!\x1a\x07\x00", "demo.rar", "demo", None, 0, fx.company_id)
			.await
			.unwrap_err();
		assert!(err.to_string().contains("RAR"));
	}

	#[tokio::test]
	async fn test_reparse_accepts_synonyms_and_checks_route() {
		let fx = fixture().await;
		let data = python_project_zip();
		let outcome = fx.service
			.upload_project(&data, "demo.zip", "demo", None, 0, fx.company_id)
			.await
			.unwrap();

		assert_eq!(fx.service.reparse_project(outcome.project_id, "nodejs").await.unwrap(), "javascript");
		assert_eq!(fx.service.reparse_project(outcome.project_id, "C++").await.unwrap(), "c");
		assert_eq!(fx.service.reparse_project(outcome.project_id, "golang").await.unwrap(), "go");

		let err = fx.service.reparse_project(outcome.project_id, "cobol").await.unwrap_err();
		assert!(err.to_string().contains("Unsupported language"));
	}

	#[tokio::test]
	async fn test_reparse_missing_project_fails() {
		let fx = fixture().await;
		let err = fx.service.reparse_project(4242, "java").await.unwrap_err();
		assert!(err.to_string().contains("not found"));
	}

	#[tokio::test]
	async fn test_delete_project_hides_inventory() {
		let fx = fixture().await;
		let data = python_project_zip();
		let outcome = fx.service
			.upload_project(&data, "demo.zip", "demo", None, 0, fx.company_id)
			.await
			.unwrap();

		let project = fx.service.get_project(outcome.project_id).await.unwrap();
		let repo = InventoryRepository::new(fx.pool.clone());
		repo.insert_if_absent(InventoryEntry::new(
			project.file_path.clone(),
			"flask".to_string(),
			Some("2.3.0".to_string()),
			"python".to_string(),
			"pip".to_string(),
		)).await.unwrap();

		fx.service.delete_project(outcome.project_id).await.unwrap();

		assert!(fx.service.get_project(outcome.project_id).await.is_err());
		assert!(repo.list_by_file_path(&project.file_path).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_export_sbom_falls_back_without_tool() {
		let fx = fixture().await;
		let data = python_project_zip();
		let outcome = fx.service
			.upload_project(&data, "demo.zip", "demo", None, 0, fx.company_id)
			.await
			.unwrap();

		let path = fx.service.export_sbom(outcome.project_id, "json", "bom").await.unwrap();
		let document: serde_json::Value =
			serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
		assert_eq!(document["bomFormat"], "CycloneDX");

		let err = fx.service.export_sbom(outcome.project_id, "yaml", "bom").await.unwrap_err();
		assert!(err.to_string().contains("Unsupported SBOM format"));
	}

	#[test]
	fn test_normalize_language_synonyms() {
		assert_eq!(normalize_language("js"), "javascript");
		assert_eq!(normalize_language("NodeJS"), "javascript");
		assert_eq!(normalize_language("node"), "javascript");
		assert_eq!(normalize_language("javascript"), "javascript");
		assert_eq!(normalize_language("cpp"), "c");
		assert_eq!(normalize_language("C++"), "c");
		assert_eq!(normalize_language("c"), "c");
		assert_eq!(normalize_language("golang"), "go");
		assert_eq!(normalize_language("GO"), "go");
		assert_eq!(normalize_language("java"), "java");
	}
}
