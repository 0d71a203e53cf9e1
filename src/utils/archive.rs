// src/utils/archive.rs

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use anyhow::{Context, Result, Error};
use encoding_rs::GBK;
use log::{debug, info, warn};
use thiserror::Error;
use uuid::Uuid;
use zip::ZipArchive;

/// Errors the caller can act on directly, reported synchronously on upload.
#[derive(Debug, Error)]
pub enum ArchiveError {
	#[error("Uploaded file is empty or too small to be an archive")]
	EmptyUpload,

	#[error("Detected a {0} archive. Only ZIP is supported, please repackage the project as a ZIP file and upload again")]
	UnsupportedFormat(&'static str),

	#[error("Unknown file format or corrupted archive. Make sure the upload is a valid ZIP file")]
	UnknownFormat,

	#[error("Archive extraction failed: {0:#}")]
	Extraction(Error),
}

/// How archive entry names are decoded during an extraction attempt.
///
/// ZIP predates mandatory Unicode names; archives produced by legacy tools
/// commonly store names in a regional codepage. GBK is tried first, then
/// strict UTF-8, then whatever the zip library itself decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameDecoder {
	Gbk,
	Utf8,
	LibraryDefault,
}

/// Unpacks an uploaded archive into a fresh, uniquely named directory under
/// `upload_root` and returns that directory's absolute path.
///
/// The upload is kept in memory for the whole operation; a temporary copy of
/// the raw archive is materialized next to the destination and discarded
/// best-effort once extraction finishes. Entries that would resolve outside
/// the destination directory are skipped, never written.
///
/// # Arguments
///
/// * `data` - The raw uploaded bytes.
/// * `original_name` - The client-supplied filename, used for logging only.
/// * `upload_root` - The configured root under which projects are unpacked.
///
/// # Returns
///
/// * `Result<PathBuf, ArchiveError>` - Absolute path of the extracted tree.
pub fn extract_upload(data: &[u8], original_name: &str, upload_root: &Path) -> Result<PathBuf, ArchiveError> {
	sniff_format(data)?;

	fs::create_dir_all(upload_root)
		.with_context(|| format!("Failed to create upload root {:?}", upload_root))
		.map_err(ArchiveError::Extraction)?;

	let unique_name = Uuid::new_v4().to_string();
	let dest_dir = upload_root.join(&unique_name);
	fs::create_dir_all(&dest_dir)
		.with_context(|| format!("Failed to create extraction directory {:?}", dest_dir))
		.map_err(ArchiveError::Extraction)?;

	info!(
		"Extracting upload {:?} ({} bytes) into {:?}",
		original_name,
		data.len(),
		dest_dir
	);

	let temp_archive = upload_root.join(format!("{}.zip", unique_name));
	if let Err(e) = fs::write(&temp_archive, data) {
		warn!("Failed to materialize temporary archive {:?}: {}", temp_archive, e);
	}

	let result = run_extraction_attempts(data, &dest_dir);

	discard_temp_archive(&temp_archive);

	match result {
		Ok(()) => {
			let dest_dir = dest_dir.canonicalize().unwrap_or(dest_dir);
			Ok(dest_dir)
		}
		Err(e) => {
			let _ = fs::remove_dir_all(&dest_dir);
			Err(ArchiveError::Extraction(e))
		}
	}
}

/// Checks the first bytes of the upload against known archive magic numbers.
///
/// ZIP starts with `PK`. 7z and RAR are recognized explicitly so the caller
/// gets an actionable message naming the unsupported format instead of a
/// generic parse failure.
fn sniff_format(data: &[u8]) -> Result<(), ArchiveError> {
	if data.len() < 4 {
		return Err(ArchiveError::EmptyUpload);
	}
	if data.starts_with(b"PK") {
		return Ok(());
	}
	if data.starts_with(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
		return Err(ArchiveError::UnsupportedFormat("7z"));
	}
	if data.starts_with(b"Rar!") {
		return Err(ArchiveError::UnsupportedFormat("RAR"));
	}
	Err(ArchiveError::UnknownFormat)
}

/// Drives the extraction attempt chain.
///
/// Every attempt restarts from the original byte buffer against an emptied
/// destination, so a half-extracted tree from a failed decoding never leaks
/// into the next attempt. The final fallback is a streaming reader that does
/// not need the central directory.
fn run_extraction_attempts(data: &[u8], dest_dir: &Path) -> Result<()> {
	let decoders = [NameDecoder::Gbk, NameDecoder::Utf8, NameDecoder::LibraryDefault];
	let mut last_error: Option<Error> = None;

	for decoder in decoders {
		reset_destination(dest_dir)?;
		match extract_central_directory(data, dest_dir, decoder) {
			Ok((files, dirs)) => {
				info!(
					"Extraction finished with {:?} names: {} files, {} directories",
					decoder, files, dirs
				);
				return Ok(());
			}
			Err(e) => {
				warn!("Extraction attempt with {:?} names failed: {:#}", decoder, e);
				last_error = Some(e);
			}
		}
	}

	reset_destination(dest_dir)?;
	match extract_streaming(data, dest_dir) {
		Ok((files, dirs)) => {
			info!("Streaming extraction finished: {} files, {} directories", files, dirs);
			Ok(())
		}
		Err(e) => {
			warn!("Streaming extraction failed: {:#}", e);
			Err(last_error.unwrap_or(e))
		}
	}
}

/// Extracts via the central directory, decoding entry names with `decoder`.
fn extract_central_directory(data: &[u8], dest_dir: &Path, decoder: NameDecoder) -> Result<(usize, usize)> {
	let mut archive = ZipArchive::new(Cursor::new(data))
		.context("Failed to read ZIP central directory")?;

	let mut files = 0usize;
	let mut dirs = 0usize;

	for index in 0..archive.len() {
		let mut entry = archive
			.by_index(index)
			.with_context(|| format!("Failed to open archive entry {}", index))?;

		let name = match decoder {
			NameDecoder::LibraryDefault => entry.name().to_string(),
			_ => decode_entry_name(entry.name_raw(), decoder)
				.with_context(|| format!("Failed to decode name of archive entry {}", index))?,
		};

		write_entry(&mut entry, &name, dest_dir, &mut files, &mut dirs)?;
	}

	Ok((files, dirs))
}

/// Last-resort extraction using the sequential local-header reader.
///
/// Works on archives whose central directory is unreadable, at the cost of
/// missing metadata. Names come from the library's own decoding.
fn extract_streaming(data: &[u8], dest_dir: &Path) -> Result<(usize, usize)> {
	let mut cursor = Cursor::new(data);
	let mut files = 0usize;
	let mut dirs = 0usize;

	while let Some(mut entry) = zip::read::read_zipfile_from_stream(&mut cursor)
		.context("Failed to read next streamed archive entry")?
	{
		let name = entry.name().to_string();
		write_entry(&mut entry, &name, dest_dir, &mut files, &mut dirs)?;
	}

	Ok((files, dirs))
}

/// Decodes a raw entry name, failing the attempt on malformed byte sequences.
fn decode_entry_name(raw: &[u8], decoder: NameDecoder) -> Result<String> {
	match decoder {
		NameDecoder::Gbk => {
			let (decoded, _, had_errors) = GBK.decode(raw);
			if had_errors {
				Err(anyhow::anyhow!("Entry name is not valid GBK"))
			} else {
				Ok(decoded.into_owned())
			}
		}
		NameDecoder::Utf8 => std::str::from_utf8(raw)
			.map(str::to_string)
			.context("Entry name is not valid UTF-8"),
		NameDecoder::LibraryDefault => unreachable!("library names are taken from the entry directly"),
	}
}

/// Materializes one archive entry below `dest_dir`.
///
/// Entries resolving outside the destination are skipped (zip-slip defense).
/// A file whose target already exists gets a `_N` counter suffix before the
/// extension so that duplicate names inside one archive never clobber each
/// other.
fn write_entry<R: Read>(
	reader: &mut R,
	raw_name: &str,
	dest_dir: &Path,
	files: &mut usize,
	dirs: &mut usize,
) -> Result<()> {
	let is_dir = raw_name.ends_with('/') || raw_name.ends_with('\\');
	let normalized = raw_name.replace('\\', "/");

	let relative = match sanitize_entry_path(&normalized) {
		Some(p) => p,
		None => {
			warn!("Skipping archive entry with unsafe path: {:?}", raw_name);
			return Ok(());
		}
	};
	if relative.as_os_str().is_empty() {
		return Ok(());
	}

	let out_path = dest_dir.join(&relative);
	if !out_path.starts_with(dest_dir) {
		warn!("Skipping archive entry escaping destination: {:?}", raw_name);
		return Ok(());
	}

	if is_dir {
		fs::create_dir_all(&out_path)
			.with_context(|| format!("Failed to create directory {:?}", out_path))?;
		*dirs += 1;
		return Ok(());
	}

	if let Some(parent) = out_path.parent() {
		fs::create_dir_all(parent)
			.with_context(|| format!("Failed to create parent directory {:?}", parent))?;
	}

	let out_path = unique_destination(out_path);
	let mut out_file = File::create(&out_path)
		.with_context(|| format!("Failed to create file {:?}", out_path))?;
	let written = io::copy(reader, &mut out_file)
		.with_context(|| format!("Failed to write file {:?}", out_path))?;
	out_file
		.flush()
		.with_context(|| format!("Failed to flush file {:?}", out_path))?;

	debug!("Wrote {:?} ({} bytes)", out_path, written);
	*files += 1;
	Ok(())
}

/// Resolves an entry name into a path that is guaranteed to stay below the
/// extraction directory.
///
/// `.` components are dropped, `..` pops the accumulated path and fails when
/// it would climb above the destination. Absolute paths and drive prefixes
/// are rejected outright.
fn sanitize_entry_path(name: &str) -> Option<PathBuf> {
	let mut result = PathBuf::new();
	for component in Path::new(name).components() {
		match component {
			Component::Normal(part) => result.push(part),
			Component::CurDir => {}
			Component::ParentDir => {
				if !result.pop() {
					return None;
				}
			}
			Component::RootDir | Component::Prefix(_) => return None,
		}
	}
	Some(result)
}

/// Generates a non-colliding destination by appending `_1`, `_2`, ... before
/// the file extension.
fn unique_destination(path: PathBuf) -> PathBuf {
	if !path.exists() {
		return path;
	}

	let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
	let stem = path
		.file_stem()
		.map(|s| s.to_string_lossy().into_owned())
		.unwrap_or_default();
	let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

	let mut counter = 1;
	loop {
		let candidate_name = match &extension {
			Some(ext) => format!("{}_{}.{}", stem, counter, ext),
			None => format!("{}_{}", stem, counter),
		};
		let candidate = parent.join(candidate_name);
		if !candidate.exists() {
			return candidate;
		}
		counter += 1;
	}
}

/// Empties the destination directory between extraction attempts.
fn reset_destination(dest_dir: &Path) -> Result<()> {
	if dest_dir.exists() {
		fs::remove_dir_all(dest_dir)
			.with_context(|| format!("Failed to clear extraction directory {:?}", dest_dir))?;
	}
	fs::create_dir_all(dest_dir)
		.with_context(|| format!("Failed to recreate extraction directory {:?}", dest_dir))?;
	Ok(())
}

/// Removes the materialized archive copy. Deletion is best-effort: a held
/// handle only downgrades to a warning, the file is picked up by the next
/// cleanup of the upload root.
fn discard_temp_archive(temp_archive: &Path) {
	if !temp_archive.exists() {
		return;
	}
	if let Err(e) = fs::remove_file(temp_archive) {
		warn!(
			"Failed to delete temporary archive {:?}, leaving it for deferred cleanup: {}",
			temp_archive, e
		);
	}
}
