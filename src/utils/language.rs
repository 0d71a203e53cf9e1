// src/utils/language.rs

use std::collections::HashMap;
use std::path::Path;
use log::{debug, warn};
use walkdir::WalkDir;

/// Maximum directory depth inspected by the signature scan (root + 2 levels).
const SIGNATURE_SCAN_DEPTH: usize = 3;

/// Catch-all bucket for extensions with no language mapping.
pub const OTHER_BUCKET: &str = "Other";

/// Marker files and source extensions per language, in precedence order.
///
/// When markers for several languages are present the first match in this
/// table wins, so a mixed Java/C tree is reported as a Java project.
const LANGUAGE_SIGNATURES: &[(&str, &[&str], &[&str])] = &[
	// (language, marker file names (lowercase), source extensions)
	("java", &["pom.xml", "build.gradle", "build.gradle.kts"], &["java"]),
	("c", &["makefile", "cmakelists.txt", "conanfile.txt"], &["c", "h", "cpp", "hpp"]),
	("python", &["requirements.txt", "setup.py", "pyproject.toml", "pipfile"], &["py"]),
	("go", &["go.mod", "go.sum"], &["go"]),
	("rust", &["cargo.toml", "cargo.lock"], &["rs"]),
	("javascript", &["package.json", "yarn.lock", "pnpm-lock.yaml"], &["js", "ts", "jsx", "tsx"]),
	("php", &["composer.json", "composer.lock"], &["php"]),
	("ruby", &["gemfile", "gemfile.lock"], &["rb"]),
	("erlang", &["rebar.config", "rebar.lock"], &["erl", "hrl"]),
];

/// Extensions that are compilation artifacts, excluded from size weighting.
const IGNORED_EXTENSIONS: &[&str] = &["class", "o", "obj", "exe", "dll", "so", "a", "pyc", "jar"];

/// Outcome of a local language detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
	/// Primary language first, any further matched languages after it.
	Known(Vec<String>),
	Unknown,
}

impl Detection {
	pub fn primary(&self) -> Option<&str> {
		match self {
			Detection::Known(languages) => languages.first().map(String::as_str),
			Detection::Unknown => None,
		}
	}

	pub fn languages(&self) -> &[String] {
		match self {
			Detection::Known(languages) => languages,
			Detection::Unknown => &[],
		}
	}
}

/// Signature scan: walks the tree to a bounded depth looking for build
/// descriptors and source extensions. Returns every matched language in
/// precedence order; an empty or unreadable directory yields `Unknown`.
pub fn detect_by_signatures(project_path: &Path) -> Detection {
	if !project_path.is_dir() {
		warn!("Signature scan target is not a directory: {:?}", project_path);
		return Detection::Unknown;
	}

	let mut matched = vec![false; LANGUAGE_SIGNATURES.len()];

	for entry in WalkDir::new(project_path)
		.max_depth(SIGNATURE_SCAN_DEPTH)
		.follow_links(false)
		.into_iter()
		.filter_map(|e| e.ok())
	{
		if !entry.file_type().is_file() {
			continue;
		}
		let file_name = entry.file_name().to_string_lossy().to_lowercase();
		let extension = file_name.rsplit_once('.').map(|(_, ext)| ext.to_string());

		for (index, (language, markers, extensions)) in LANGUAGE_SIGNATURES.iter().enumerate() {
			if matched[index] {
				continue;
			}
			let marker_hit = markers.contains(&file_name.as_str());
			let extension_hit = extension
				.as_deref()
				.map(|ext| extensions.contains(&ext))
				.unwrap_or(false);
			if marker_hit || extension_hit {
				debug!("Signature file {:?} matched language {}", entry.path(), language);
				matched[index] = true;
			}
		}
	}

	let languages: Vec<String> = LANGUAGE_SIGNATURES
		.iter()
		.zip(matched)
		.filter(|(_, hit)| *hit)
		.map(|((language, _, _), _)| (*language).to_string())
		.collect();

	if languages.is_empty() {
		Detection::Unknown
	} else {
		Detection::Known(languages)
	}
}

/// Size-weighted scan: sums file sizes per language bucket and returns each
/// bucket's percentage share of the tracked total.
///
/// Known build artifacts are ignored. Extensions without a language mapping
/// land in the [`OTHER_BUCKET`]. An empty or unreadable tree returns an
/// empty map.
pub fn language_share_by_size(project_path: &Path) -> HashMap<String, f64> {
	let mut sizes: HashMap<String, u64> = HashMap::new();
	let mut total: u64 = 0;

	for entry in WalkDir::new(project_path)
		.follow_links(false)
		.into_iter()
		.filter_map(|e| e.ok())
	{
		if !entry.file_type().is_file() {
			continue;
		}
		let file_name = entry.file_name().to_string_lossy().to_lowercase();
		let extension = match file_name.rsplit_once('.') {
			Some((_, ext)) => ext.to_string(),
			None => String::new(),
		};
		if IGNORED_EXTENSIONS.contains(&extension.as_str()) {
			continue;
		}

		let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
		let bucket = language_for_extension(&extension);
		*sizes.entry(bucket.to_string()).or_insert(0) += size;
		total += size;
	}

	if total == 0 {
		return HashMap::new();
	}

	sizes
		.into_iter()
		.map(|(language, size)| (language, size as f64 * 100.0 / total as f64))
		.collect()
}

/// Primary language according to the size-weighted strategy.
///
/// When exactly two buckets exist and one of them is the catch-all, the other
/// bucket is the primary. Otherwise the largest non-catch-all bucket wins,
/// and a tree with nothing but unclassified files is `Unknown`.
pub fn detect_by_size(project_path: &Path) -> Detection {
	let shares = language_share_by_size(project_path);
	if shares.is_empty() {
		return Detection::Unknown;
	}

	if shares.len() == 2 && shares.contains_key(OTHER_BUCKET) {
		if let Some(language) = shares.keys().find(|k| k.as_str() != OTHER_BUCKET) {
			return Detection::Known(vec![language.clone()]);
		}
	}

	let mut ranked: Vec<(&String, &f64)> = shares
		.iter()
		.filter(|(language, _)| language.as_str() != OTHER_BUCKET)
		.collect();
	ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));

	match ranked.first() {
		Some((language, _)) => Detection::Known(vec![(*language).clone()]),
		None => Detection::Unknown,
	}
}

fn language_for_extension(extension: &str) -> &'static str {
	LANGUAGE_SIGNATURES
		.iter()
		.find(|(_, _, extensions)| extensions.contains(&extension))
		.map(|(language, _, _)| *language)
		.unwrap_or(OTHER_BUCKET)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	#[test]
	fn test_python_project_is_sole_language() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("a.py"), "import flask\n").unwrap();
		fs::write(dir.path().join("requirements.txt"), "flask==2.3.0\n").unwrap();
		fs::write(dir.path().join("b.py"), "import requests\n").unwrap();

		let shares = language_share_by_size(dir.path());
		assert_eq!(shares.len(), 2);
		assert!(shares.contains_key("python"));
		assert!(shares.contains_key(OTHER_BUCKET));

		assert_eq!(detect_by_size(dir.path()), Detection::Known(vec!["python".to_string()]));
	}

	#[test]
	fn test_signature_scan_precedence_java_over_c() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
		fs::write(dir.path().join("main.c"), "int main(){}").unwrap();

		let detection = detect_by_signatures(dir.path());
		assert_eq!(detection.primary(), Some("java"));
		assert_eq!(detection.languages(), &["java".to_string(), "c".to_string()]);
	}

	#[test]
	fn test_signature_scan_depth_is_bounded() {
		let dir = TempDir::new().unwrap();
		let deep = dir.path().join("a/b/c/d");
		fs::create_dir_all(&deep).unwrap();
		fs::write(deep.join("go.mod"), "module example.com/deep\n").unwrap();

		// go.mod sits four levels down, beyond the bounded walk
		assert_eq!(detect_by_signatures(dir.path()), Detection::Unknown);
	}

	#[test]
	fn test_empty_directory_is_unknown() {
		let dir = TempDir::new().unwrap();
		assert_eq!(detect_by_signatures(dir.path()), Detection::Unknown);
		assert_eq!(detect_by_size(dir.path()), Detection::Unknown);
	}

	#[test]
	fn test_missing_directory_is_unknown() {
		let path = Path::new("/nonexistent/for/detection/test");
		assert_eq!(detect_by_signatures(path), Detection::Unknown);
		assert_eq!(detect_by_size(path), Detection::Unknown);
	}

	#[test]
	fn test_build_artifacts_are_ignored() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("main.py"), "x = 1\n").unwrap();
		fs::write(dir.path().join("huge.class"), vec![0u8; 64 * 1024]).unwrap();

		let shares = language_share_by_size(dir.path());
		assert_eq!(shares.len(), 1);
		assert!(shares.get("python").copied().unwrap_or(0.0) > 99.9);
	}

	#[test]
	fn test_only_unclassified_files_is_unknown() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("readme.md"), "# docs\n").unwrap();
		assert_eq!(detect_by_size(dir.path()), Detection::Unknown);
	}
}
