// ---------------------------------------------------------------------------
// Snapshot persistence — gzipped JSON index file
// ---------------------------------------------------------------------------
//
// The association data is a plain map of integer counters, so the snapshot
// is JSON all the way down: `index.gz` holds gzipped
// `{ "version": 1, "items": { "<id>": { "<peer>": score, ... }, ... } }`.
// A plain `index.json` written by hand or by an older tool is also accepted
// on load.
// ---------------------------------------------------------------------------

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PersistenceError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Corruption: {0}")]
	Corruption(String),
	#[error("Serialization: {0}")]
	Serialization(String),
}

// ---------------------------------------------------------------------------
// Snapshot payload
// ---------------------------------------------------------------------------

pub const SNAPSHOT_VERSION: u32 = 1;

/// The full association map: item id → (peer id → co-purchase count).
pub type SnapshotItems = HashMap<String, HashMap<String, u64>>;

/// On-disk JSON structure for the index file.
#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
	version: u32,
	items: SnapshotItems,
}

// ---------------------------------------------------------------------------
// Gzip compress / decompress
// ---------------------------------------------------------------------------

/// Gzip-compress a byte slice (level 6).
pub fn compress(data: &[u8]) -> Result<Vec<u8>, PersistenceError> {
	let mut encoder = GzEncoder::new(data, Compression::new(6));
	let mut compressed = Vec::new();
	encoder
		.read_to_end(&mut compressed)
		.map_err(PersistenceError::Io)?;
	Ok(compressed)
}

/// Gunzip-decompress a byte slice.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, PersistenceError> {
	let mut decoder = GzDecoder::new(data);
	let mut decompressed = Vec::new();
	decoder
		.read_to_end(&mut decompressed)
		.map_err(PersistenceError::Io)?;
	Ok(decompressed)
}

/// Check if data starts with gzip magic bytes (0x1f, 0x8b).
pub fn is_gzipped(data: &[u8]) -> bool {
	data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

/// Save the association map to a directory as a gzipped index file.
pub fn save_to_directory(dir: &str, items: &SnapshotItems) -> Result<(), PersistenceError> {
	std::fs::create_dir_all(dir).map_err(PersistenceError::Io)?;

	let index = IndexFile {
		version: SNAPSHOT_VERSION,
		items: items.clone(),
	};

	let json = serde_json::to_string(&index).map_err(|e| {
		PersistenceError::Serialization(format!("Failed to serialize index: {}", e))
	})?;

	let compressed = compress(json.as_bytes())?;

	let path = std::path::Path::new(dir).join("index.gz");
	std::fs::write(&path, &compressed).map_err(PersistenceError::Io)?;

	Ok(())
}

/// Load the association map from a directory. Reads `index.gz` (gzipped) or
/// `index.json` (plain). A missing index file is an empty store.
pub fn load_from_directory(dir: &str) -> Result<SnapshotItems, PersistenceError> {
	let dir_path = std::path::Path::new(dir);

	let gz_path = dir_path.join("index.gz");
	let json_path = dir_path.join("index.json");

	let raw_bytes = if gz_path.exists() {
		std::fs::read(&gz_path).map_err(PersistenceError::Io)?
	} else if json_path.exists() {
		std::fs::read(&json_path).map_err(PersistenceError::Io)?
	} else {
		return Ok(SnapshotItems::new());
	};

	let json_bytes = if is_gzipped(&raw_bytes) {
		decompress(&raw_bytes)?
	} else {
		raw_bytes
	};

	let json_str = std::str::from_utf8(&json_bytes)
		.map_err(|e| PersistenceError::Corruption(format!("Invalid UTF-8 in index: {}", e)))?;

	let index: IndexFile = serde_json::from_str(json_str)
		.map_err(|e| PersistenceError::Corruption(format!("Invalid index JSON: {}", e)))?;

	if index.version != SNAPSHOT_VERSION {
		return Err(PersistenceError::Corruption(format!(
			"Unsupported index version: {}",
			index.version
		)));
	}

	Ok(index.items)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
