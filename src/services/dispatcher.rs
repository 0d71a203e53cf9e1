// src/services/dispatcher.rs

use std::sync::Arc;
use log::{debug, error, info};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use anyhow::Result;
use crate::db::connection::SqlitePool;
use crate::models::inventory::{InventoryEntry, ParsedDependency};
use crate::repositories::inventory_repo::InventoryRepository;
use crate::utils::parser_api::{self, ParserApiClient};

/// Submission failures the caller can report or retry on.
#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("Unsupported language: {language}. Supported languages: {supported}")]
	UnsupportedLanguage { language: String, supported: String },

	#[error("Dependency resolution queue is full, retry later")]
	QueueFull,

	#[error("Dependency resolution workers are shut down")]
	Closed,
}

/// One unit of background work: resolve the dependencies of one language of
/// one project.
#[derive(Debug, Clone)]
pub struct ScanTask {
	pub file_path: String,
	pub language: String,
}

/// Bounded worker pool for dependency resolution.
///
/// Submission is fire-and-forget: the caller returns as soon as the task is
/// queued. The backlog is bounded, a full queue rejects new submissions
/// instead of growing without limit. Workers swallow and log per-task
/// failures so one language's parser outage never affects another language
/// of the same project, nor the request that queued the task.
pub struct ScanDispatcher {
	tx: mpsc::Sender<ScanTask>,
	workers: Vec<JoinHandle<()>>,
}

impl ScanDispatcher {
	pub fn start(
		worker_count: usize,
		queue_capacity: usize,
		client: ParserApiClient,
		pool: Arc<SqlitePool>,
		shutdown: &broadcast::Sender<()>,
	) -> Self {
		let (tx, rx) = mpsc::channel(queue_capacity.max(1));
		let rx = Arc::new(Mutex::new(rx));

		let mut workers = Vec::with_capacity(worker_count);
		for worker_id in 0..worker_count {
			let rx = rx.clone();
			let client = client.clone();
			let pool = pool.clone();
			let shutdown_rx = shutdown.subscribe();
			workers.push(tokio::spawn(run_worker(worker_id, rx, client, pool, shutdown_rx)));
		}

		info!(
			"Dependency resolution pool started: {} workers, backlog capacity {}",
			worker_count, queue_capacity
		);
		Self { tx, workers }
	}

	/// Queues a resolution task. Validates the language has a parser route
	/// before accepting; a full backlog is rejected with a retryable error.
	pub fn submit(&self, task: ScanTask) -> Result<(), DispatchError> {
		if !parser_api::is_supported_language(&task.language) {
			return Err(DispatchError::UnsupportedLanguage {
				language: task.language,
				supported: parser_api::supported_languages().join(", "),
			});
		}

		match self.tx.try_send(task) {
			Ok(()) => Ok(()),
			Err(mpsc::error::TrySendError::Full(task)) => {
				error!(
					"Resolution queue full, rejecting task for language {} at {}",
					task.language, task.file_path
				);
				Err(DispatchError::QueueFull)
			}
			Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
		}
	}

	pub fn worker_count(&self) -> usize {
		self.workers.len()
	}
}

async fn run_worker(
	worker_id: usize,
	rx: Arc<Mutex<mpsc::Receiver<ScanTask>>>,
	client: ParserApiClient,
	pool: Arc<SqlitePool>,
	mut shutdown_rx: broadcast::Receiver<()>,
) {
	debug!("resolution-worker-{} started", worker_id);
	loop {
		// the lock only guards task pickup, resolution runs unlocked
		let task = {
			let mut guard = rx.lock().await;
			tokio::select! {
				task = guard.recv() => task,
				_ = shutdown_rx.recv() => {
					debug!("resolution-worker-{} received shutdown signal", worker_id);
					break;
				}
			}
		};

		let task = match task {
			Some(task) => task,
			None => break,
		};

		match resolve(&client, &pool, &task.file_path, &task.language).await {
			Ok(stored) => info!(
				"resolution-worker-{}: stored {} new {} components for {}",
				worker_id, stored, task.language, task.file_path
			),
			Err(e) => error!(
				"resolution-worker-{}: {} resolution failed for {}: {:#}",
				worker_id, task.language, task.file_path, e
			),
		}
	}
	debug!("resolution-worker-{} stopped", worker_id);
}

/// Fetches one language's dependency list from the parser service and stores
/// whatever is not yet recorded. Returns the count of newly stored
/// components; repeated calls against an unchanged parser response store
/// nothing new.
pub async fn resolve(
	client: &ParserApiClient,
	pool: &Arc<SqlitePool>,
	file_path: &str,
	language: &str,
) -> Result<usize> {
	let dependencies = client.parse_dependencies(file_path, language).await?;
	store_new_dependencies(pool, file_path, language, dependencies).await
}

/// Maps parsed dependencies into inventory rows, skipping components already
/// recorded for (file_path, name, version).
pub async fn store_new_dependencies(
	pool: &Arc<SqlitePool>,
	file_path: &str,
	language: &str,
	dependencies: Vec<ParsedDependency>,
) -> Result<usize> {
	let repository = InventoryRepository::new(pool.clone());
	let package_manager = parser_api::package_manager_for(language);
	let mut stored = 0;

	for dependency in dependencies {
		let entry = InventoryEntry::new(
			file_path.to_string(),
			dependency.name.clone(),
			dependency.version.clone(),
			language.to_string(),
			package_manager.to_string(),
		);

		match repository.insert_if_absent(entry).await {
			Ok(true) => stored += 1,
			Ok(false) => debug!(
				"Component {} {} already recorded for {}",
				dependency.name,
				dependency.version.as_deref().unwrap_or(""),
				file_path
			),
			Err(e) => error!(
				"Failed to store component {} for {}: {:#}",
				dependency.name, file_path, e
			),
		}
	}

	Ok(stored)
}
