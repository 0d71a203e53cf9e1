// src/utils/sbom.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::process::Command;
use uuid::Uuid;
use crate::db::connection::SqlitePool;
use crate::models::project::Project;
use crate::repositories::inventory_repo::InventoryRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbomFormat {
	Json,
	Xml,
	Spdx,
}

impl SbomFormat {
	pub fn parse(value: &str) -> Option<Self> {
		match value.to_lowercase().as_str() {
			"json" => Some(Self::Json),
			"xml" => Some(Self::Xml),
			"spdx" => Some(Self::Spdx),
			_ => None,
		}
	}

	pub fn extension(self) -> &'static str {
		match self {
			Self::Json => "json",
			Self::Xml => "xml",
			Self::Spdx => "spdx",
		}
	}
}

#[derive(Debug, Serialize)]
struct FallbackBom {
	#[serde(rename = "bomFormat")]
	bom_format: String,
	#[serde(rename = "specVersion")]
	spec_version: String,
	version: u32,
	#[serde(rename = "serialNumber")]
	serial_number: String,
	metadata: FallbackMetadata,
	components: Vec<FallbackComponent>,
}

#[derive(Debug, Serialize)]
struct FallbackMetadata {
	timestamp: String,
	tools: Vec<FallbackTool>,
}

#[derive(Debug, Serialize)]
struct FallbackTool {
	name: String,
	version: String,
}

#[derive(Debug, Serialize)]
struct FallbackComponent {
	#[serde(rename = "type")]
	component_type: String,
	name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	version: Option<String>,
	language: String,
	purl: String,
}

/// Produces a bill-of-materials file for a project.
///
/// The heavy lifting is done by an external CLI tool scanning the extracted
/// project tree. When the tool is missing, exits non-zero or leaves no
/// output behind, a minimal CycloneDX-style document is synthesized from the
/// recorded inventory instead, so the export stays available as long as the
/// database is reachable.
pub struct SbomExporter {
	tool_path: PathBuf,
	inventory: InventoryRepository,
}

impl SbomExporter {
	pub fn new(tool_path: PathBuf, pool: Arc<SqlitePool>) -> Self {
		Self {
			tool_path,
			inventory: InventoryRepository::new(pool),
		}
	}

	/// Returns the path of the SBOM file for (project, format, output name),
	/// generating it on first request. Generation is treated as expensive:
	/// an existing non-empty file is returned as-is.
	pub async fn export(&self, project: &Project, format: SbomFormat, output_name: &str) -> Result<PathBuf> {
		let sbom_dir = Path::new(&project.file_path).join("sbom");
		fs::create_dir_all(&sbom_dir)
			.with_context(|| format!("Failed to create SBOM directory {:?}", sbom_dir))?;

		let output_path = sbom_dir.join(format!("{}.{}", output_name, format.extension()));

		if is_non_empty_file(&output_path) {
			debug!("SBOM cache hit: {:?}", output_path);
			return Ok(output_path);
		}

		if self.run_tool(project, format, &output_path).await {
			info!("SBOM generated by external tool: {:?}", output_path);
			return Ok(output_path);
		}

		warn!(
			"SBOM tool unavailable or failed for project {:?}, falling back to inventory document",
			project.name
		);
		self.write_fallback_document(project, &output_path).await?;
		Ok(output_path)
	}

	/// Runs the external CLI tool. Returns whether it produced usable output.
	///
	/// The working directory is the project tree itself so the tool's
	/// relative-path scanning resolves against the right root.
	async fn run_tool(&self, project: &Project, format: SbomFormat, output_path: &Path) -> bool {
		let mut command = Command::new(&self.tool_path);
		command
			.arg("-path")
			.arg(&project.file_path)
			.arg("-out")
			.arg(output_path)
			.current_dir(&project.file_path);
		if format != SbomFormat::Json {
			command.arg("-format").arg(format.extension());
		}

		let output = match command.output().await {
			Ok(output) => output,
			Err(e) => {
				error!(
					"Failed to start SBOM tool {:?} (check the configured tool path): {}",
					self.tool_path, e
				);
				return false;
			}
		};

		let stdout = String::from_utf8_lossy(&output.stdout);
		let stderr = String::from_utf8_lossy(&output.stderr);
		if !stdout.trim().is_empty() {
			debug!("SBOM tool stdout: {}", stdout.trim());
		}
		if !stderr.trim().is_empty() {
			debug!("SBOM tool stderr: {}", stderr.trim());
		}

		if !output.status.success() {
			warn!("SBOM tool exited with {:?}", output.status.code());
			return false;
		}
		if !is_non_empty_file(output_path) {
			warn!("SBOM tool exited cleanly but produced no output at {:?}", output_path);
			return false;
		}
		true
	}

	/// Synthesizes a minimal CycloneDX document from the inventory rows.
	/// Component identifiers are best-effort purls with no version resolution
	/// beyond what the inventory recorded.
	async fn write_fallback_document(&self, project: &Project, output_path: &Path) -> Result<()> {
		let entries = self.inventory
			.list_by_file_path(&project.file_path)
			.await
			.context("Failed to load inventory for SBOM fallback")?;

		let components: Vec<FallbackComponent> = entries
			.into_iter()
			.map(|entry| {
				let manager = entry.package_manager.replace(' ', "-");
				let purl = match &entry.version {
					Some(version) => format!("pkg:{}/{}@{}", manager, entry.name, version),
					None => format!("pkg:{}/{}", manager, entry.name),
				};
				FallbackComponent {
					component_type: "library".to_string(),
					name: entry.name,
					version: entry.version,
					language: entry.language,
					purl,
				}
			})
			.collect();

		let bom = FallbackBom {
			bom_format: "CycloneDX".to_string(),
			spec_version: "1.4".to_string(),
			version: 1,
			serial_number: format!("urn:uuid:{}", Uuid::new_v4()),
			metadata: FallbackMetadata {
				timestamp: chrono::Utc::now().to_rfc3339(),
				tools: vec![FallbackTool {
					name: env!("CARGO_PKG_NAME").to_string(),
					version: env!("CARGO_PKG_VERSION").to_string(),
				}],
			},
			components,
		};

		let document = serde_json::to_string_pretty(&bom)
			.context("Failed to serialize fallback SBOM")?;
		fs::write(output_path, document)
			.with_context(|| format!("Failed to write fallback SBOM to {:?}", output_path))?;

		info!("Fallback SBOM written to {:?}", output_path);
		Ok(())
	}
}

fn is_non_empty_file(path: &Path) -> bool {
	fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}
