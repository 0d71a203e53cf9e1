// src/main.rs

use anyhow::{Context, Result};
use component_inventory_db::config::AppConfig;
use component_inventory_db::db::connection::{self, SqlitePool};
use component_inventory_db::db::schema;
use component_inventory_db::repositories::company_repo;
use component_inventory_db::services::dispatcher::ScanDispatcher;
use component_inventory_db::services::project_service::ProjectService;
use component_inventory_db::utils::logger;
use component_inventory_db::utils::parser_api::ParserApiClient;
use log::{error, info};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{sleep, Duration};

const DEFAULT_COMPANY: &str = "default";

struct App {
	config: AppConfig,
	pool: Arc<SqlitePool>,
	service: ProjectService,
	shutdown_signal: tokio::sync::broadcast::Sender<()>,
}

impl App {
	async fn new() -> Result<Self> {
		logger::init();
		info!("Starting component inventory service");

		let config = AppConfig::from_env();
		let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
		let pool = Arc::new(
			connection::establish_pool(&config.database_path)
				.context("Failed to establish database connection pool")?,
		);

		let parser_client = ParserApiClient::new(config.parser_base_url.clone())
			.context("Failed to create parser service client")?;

		let dispatcher = Arc::new(ScanDispatcher::start(
			config.worker_count,
			config.queue_capacity,
			parser_client.clone(),
			pool.clone(),
			&shutdown_tx,
		));
		info!("Resolution pool ready with {} workers", dispatcher.worker_count());

		let service = ProjectService::new(pool.clone(), config.clone(), dispatcher, parser_client);

		Ok(App {
			config,
			pool,
			service,
			shutdown_signal: shutdown_tx,
		})
	}

	async fn init_database(&self) -> Result<()> {
		let conn = self.pool.get().context("Failed to get database connection")?;
		schema::create_tables(&conn).context("Failed to create database tables")?;
		info!("Database tables initialized successfully");
		Ok(())
	}

	/// Ingests an archive handed over on the command line:
	/// `component_inventory_db <archive.zip> [project-name]`.
	/// Dependency resolution continues in the background afterwards.
	async fn ingest_from_args(&self) -> Result<()> {
		let mut args = std::env::args().skip(1);
		let archive_path = match args.next() {
			Some(path) => path,
			None => {
				info!(
					"No archive given, waiting for work (upload root: {:?})",
					self.config.upload_dir
				);
				return Ok(());
			}
		};

		let project_name = args.next().unwrap_or_else(|| {
			Path::new(&archive_path)
				.file_stem()
				.map(|s| s.to_string_lossy().into_owned())
				.unwrap_or_else(|| "uploaded-project".to_string())
		});

		let data = std::fs::read(&archive_path)
			.with_context(|| format!("Failed to read archive {:?}", archive_path))?;

		let company_id = company_repo::ensure_company(self.pool.clone(), DEFAULT_COMPANY).await?;
		let outcome = self.service
			.upload_project(&data, &archive_path, &project_name, None, 0, company_id)
			.await?;

		info!(
			"Project {} created, detected language {}, {} resolution task(s) running in background",
			outcome.project_id,
			outcome.detected_language,
			outcome.resolving.len()
		);
		Ok(())
	}

	async fn run(&self) -> Result<()> {
		self.init_database().await?;

		if let Err(e) = self.ingest_from_args().await {
			error!("Ingestion failed: {:#}", e);
		}

		let mut shutdown_rx = self.shutdown_signal.subscribe();
		let shutdown_signal = self.shutdown_signal.clone();
		tokio::spawn(async move {
			match signal::ctrl_c().await {
				Ok(()) => {
					info!("Received Ctrl+C signal");
					let _ = shutdown_signal.send(());
				}
				Err(err) => {
					error!("Failed to listen for ctrl-c signal: {}", err);
				}
			}
		});

		let _ = shutdown_rx.recv().await;
		info!("Received shutdown signal, closing application");

		self.cleanup().await;
		Ok(())
	}

	async fn cleanup(&self) {
		info!("Cleaning up resources and stopping background tasks...");
		let _ = self.shutdown_signal.send(());
		sleep(Duration::from_secs(1)).await; // Give workers time to clean up
		info!("Cleanup completed");
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let app = App::new().await?;
	app.run().await
}
