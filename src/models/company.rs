// src/models/company.rs

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Detection tuning consumed by the external vulnerability-matching component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
	pub company_id: Option<i64>,
	pub name: String,
	pub detect_strategy: String,
	pub similarity_threshold: f64,
	pub max_detect_count: i64,
	pub create_time: Option<NaiveDateTime>,
}

impl Company {
	pub fn new(name: String) -> Self {
		Self {
			company_id: None,
			name,
			detect_strategy: "signature".to_string(),
			similarity_threshold: 0.75,
			max_detect_count: 50,
			create_time: Some(chrono::Utc::now().naive_utc()),
		}
	}
}
