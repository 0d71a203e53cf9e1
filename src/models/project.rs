// src/models/project.rs

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
	pub project_id: Option<i64>,
	pub company_id: i64,
	pub name: String,
	pub description: Option<String>,
	pub language: String,
	pub file_path: String,
	pub risk_threshold: i64,
	pub is_deleted: bool,
	pub create_time: Option<NaiveDateTime>,
}

impl Project {
	pub fn new(company_id: i64, name: String, language: String, file_path: String) -> Self {
		Self {
			project_id: None,
			company_id,
			name,
			description: None,
			language,
			file_path,
			risk_threshold: 0,
			is_deleted: false,
			create_time: Some(chrono::Utc::now().naive_utc()),
		}
	}
}
