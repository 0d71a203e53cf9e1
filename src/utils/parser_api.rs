// src/utils/parser_api.rs

use std::collections::HashMap;
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Duration;
use crate::models::inventory::ParsedDependency;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_IDLE_CONNECTIONS_PER_HOST: usize = 10;

lazy_static! {
	/// Parser service route per supported language.
	pub static ref LANGUAGE_PARSERS: HashMap<&'static str, &'static str> = {
		let mut routes = HashMap::new();
		routes.insert("java", "/parse/pom_parse");
		routes.insert("python", "/parse/python_parse");
		routes.insert("php", "/parse/php_parse");
		routes.insert("javascript", "/parse/javascript_parse");
		routes.insert("go", "/parse/go_parse");
		routes.insert("rust", "/parse/rust_parse");
		routes.insert("ruby", "/parse/ruby_parse");
		routes.insert("erlang", "/parse/erlang_parse");
		routes.insert("c", "/parse/c_parse");
		routes
	};

	/// Package manager label recorded on inventory rows per language.
	pub static ref PACKAGE_MANAGERS: HashMap<&'static str, &'static str> = {
		let mut managers = HashMap::new();
		managers.insert("java", "maven");
		managers.insert("python", "pip");
		managers.insert("php", "composer");
		managers.insert("javascript", "npm");
		managers.insert("go", "go mod");
		managers.insert("rust", "cargo");
		managers.insert("ruby", "gems");
		managers.insert("erlang", "rebar");
		managers.insert("c", "conan");
		managers
	};
}

pub fn package_manager_for(language: &str) -> &'static str {
	PACKAGE_MANAGERS.get(language).copied().unwrap_or("unknown")
}

pub fn is_supported_language(language: &str) -> bool {
	LANGUAGE_PARSERS.contains_key(language)
}

pub fn supported_languages() -> Vec<&'static str> {
	let mut languages: Vec<&'static str> = LANGUAGE_PARSERS.keys().copied().collect();
	languages.sort_unstable();
	languages
}

#[derive(Debug, Deserialize)]
struct LanguageDetectResponse {
	language: String,
}

/// Client for the external per-language dependency parser service.
///
/// The service may be slow or momentarily saturated, so every call is bounded
/// by a connect timeout and a total request timeout; connections are pooled
/// with a cap on idle connections per route.
#[derive(Clone)]
pub struct ParserApiClient {
	client: reqwest::Client,
	base_url: String,
}

impl ParserApiClient {
	pub fn new(base_url: String) -> Result<Self> {
		let mut headers = HeaderMap::new();
		headers.insert(
			USER_AGENT,
			HeaderValue::from_static("Component-Inventory-System/1.0"),
		);

		let client = reqwest::Client::builder()
			.default_headers(headers)
			.connect_timeout(CONNECT_TIMEOUT)
			.timeout(READ_TIMEOUT)
			.pool_max_idle_per_host(MAX_IDLE_CONNECTIONS_PER_HOST)
			.build()
			.context("Failed to create HTTP client")?;

		Ok(Self { client, base_url })
	}

	/// Asks the parser service for a project's primary language.
	pub async fn detect_language(&self, project_folder: &str) -> Result<String> {
		let url = format!("{}/parse/get_primary_language", self.base_url);
		debug!("Detecting language for {}", project_folder);

		let response = self.client
			.get(&url)
			.query(&[("project_folder", project_folder), ("use_optimized", "true")])
			.send()
			.await
			.context("Failed to send request to language detection service")?;

		if !response.status().is_success() {
			return Err(anyhow::anyhow!(
				"Language detection request failed with status: {}",
				response.status()
			));
		}

		let data = response
			.json::<LanguageDetectResponse>()
			.await
			.context("Failed to parse language detection response")?;

		info!("Detected language: {}", data.language);
		Ok(data.language)
	}

	/// Calls the language-specific parser route and decodes the returned
	/// dependency list.
	pub async fn parse_dependencies(&self, project_folder: &str, language: &str) -> Result<Vec<ParsedDependency>> {
		let route = LANGUAGE_PARSERS
			.get(language)
			.ok_or_else(|| anyhow::anyhow!("No parser route for language: {}", language))?;
		let url = format!("{}{}", self.base_url, route);

		let response = self.client
			.get(&url)
			.query(&[("project_folder", project_folder)])
			.send()
			.await
			.with_context(|| format!("Failed to reach {} parser", language))?;

		if !response.status().is_success() {
			return Err(anyhow::anyhow!(
				"{} parser request failed with status: {}",
				language,
				response.status()
			));
		}

		let body = response
			.text()
			.await
			.context("Failed to read parser response body")?;

		let dependencies = decode_parser_response(&body)
			.with_context(|| format!("Invalid response from {} parser", language))?;

		info!("Parsed {} dependencies for language {}", dependencies.len(), language);
		Ok(dependencies)
	}
}

/// Decodes a parser response body into dependency records.
///
/// Accepts either a bare JSON array of component objects or an envelope
/// object whose `obj` field holds the array. An empty body or a body that is
/// really a framework HTML error page is rejected so the caller can abort
/// just this language's resolution.
pub fn decode_parser_response(body: &str) -> Result<Vec<ParsedDependency>> {
	let trimmed = body.trim();
	if trimmed.is_empty() {
		return Err(anyhow::anyhow!("Parser returned an empty body"));
	}
	if looks_like_html_error_page(trimmed) {
		return Err(anyhow::anyhow!("Parser returned an HTML error page instead of JSON"));
	}

	let parsed: Value = serde_json::from_str(trimmed)
		.context("Parser response is not valid JSON")?;

	let items = match &parsed {
		Value::Array(items) => items.as_slice(),
		Value::Object(map) => match map.get("obj") {
			Some(Value::Array(items)) => items.as_slice(),
			_ => return Err(anyhow::anyhow!("Parser response object has no 'obj' array")),
		},
		_ => return Err(anyhow::anyhow!("Parser response is neither an array nor an envelope object")),
	};

	Ok(items.iter().filter_map(decode_component).collect())
}

/// Maps one component object to a dependency record.
///
/// Some parser backends fold `"name version"` into the name field; the first
/// space splits the two. An explicit `version` field wins when present.
fn decode_component(component: &Value) -> Option<ParsedDependency> {
	let raw_name = component.get("name")?.as_str()?.trim();
	if raw_name.is_empty() {
		return None;
	}

	let explicit_version = component
		.get("version")
		.and_then(Value::as_str)
		.map(str::trim)
		.filter(|v| !v.is_empty() && *v != "unknown");

	let (name, version) = match raw_name.split_once(' ') {
		Some((name, rest)) => (name.to_string(), Some(rest.trim().to_string())),
		None => (raw_name.to_string(), explicit_version.map(str::to_string)),
	};

	Some(ParsedDependency { name, version })
}

fn looks_like_html_error_page(body: &str) -> bool {
	let lower = body.get(..64).unwrap_or(body).to_lowercase();
	lower.starts_with("<!doctype") || lower.starts_with("<html")
}
