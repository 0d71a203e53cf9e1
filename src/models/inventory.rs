// src/models/inventory.rs

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One approved third-party component recorded for a project ("white-list" row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryEntry {
	pub id: Option<i64>,
	pub file_path: String,
	pub name: String,
	pub version: Option<String>,
	pub language: String,
	pub package_manager: String,
	pub is_deleted: bool,
	pub create_time: Option<NaiveDateTime>,
}

impl InventoryEntry {
	pub fn new(file_path: String, name: String, version: Option<String>, language: String, package_manager: String) -> Self {
		Self {
			id: None,
			file_path,
			name,
			version,
			language,
			package_manager,
			is_deleted: false,
			create_time: Some(chrono::Utc::now().naive_utc()),
		}
	}
}

/// Transient name/version pair decoded from a parser response.
/// Never persisted directly; always mapped into an [`InventoryEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDependency {
	pub name: String,
	pub version: Option<String>,
}
