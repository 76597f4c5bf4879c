//! File-backed tile record store.
//!
//! Layout inside the store directory:
//! ```text
//! tiles.meta.json   - schema version, tile count, payload hash
//! tiles.cbor.zst    - CBOR+zstd compressed tile records
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use terrastream_common::TileRecord;

const TILE_SCHEMA_VERSION: u32 = 1;
const META_FILE: &str = "tiles.meta.json";
const PAYLOAD_FILE: &str = "tiles.cbor.zst";

/// Errors from file-backed persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("store holds no saved records")]
    NotInitialized,
}

/// Metadata stored in tiles.meta.json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMeta {
    pub schema_version: u32,
    pub tile_count: usize,
    /// Hash of the compressed payload. `None` until the first save.
    pub sha256: Option<String>,
}

/// Directory holding one versioned, hash-checked set of tile records.
#[derive(Debug)]
pub struct TileStore {
    root: PathBuf,
    meta: TileMeta,
}

impl TileStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let meta_path = root.join(META_FILE);
        let meta = if meta_path.exists() {
            let meta: TileMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.schema_version != TILE_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: TILE_SCHEMA_VERSION,
                });
            }
            meta
        } else {
            let meta = TileMeta {
                schema_version: TILE_SCHEMA_VERSION,
                tile_count: 0,
                sha256: None,
            };
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            meta
        };
        tracing::debug!(root = %root.display(), tiles = meta.tile_count, "opened tile store");

        Ok(Self { root, meta })
    }

    /// Replace the stored records.
    pub fn save(&mut self, records: &[TileRecord]) -> Result<(), StoreError> {
        let cbor_bytes = cbor_serialize(records)?;
        let compressed = zstd_compress(&cbor_bytes)?;
        let hash = sha256_hex(&compressed);

        std::fs::write(self.root.join(PAYLOAD_FILE), &compressed)?;

        self.meta.tile_count = records.len();
        self.meta.sha256 = Some(hash);
        self.save_meta()?;
        tracing::info!(tiles = records.len(), bytes = compressed.len(), "saved tile records");
        Ok(())
    }

    /// Load the stored records, failing closed on any hash or count mismatch.
    pub fn load(&self) -> Result<Vec<TileRecord>, StoreError> {
        let compressed = self.read_verified()?;
        let cbor_bytes = zstd_decompress(&compressed)?;
        let records: Vec<TileRecord> = cbor_deserialize(&cbor_bytes)?;
        if records.len() != self.meta.tile_count {
            return Err(StoreError::IntegrityMismatch {
                expected: format!("{} tiles", self.meta.tile_count),
                actual: format!("{} tiles", records.len()),
            });
        }
        Ok(records)
    }

    /// Check the payload against the recorded hash. A store that was never
    /// saved to is trivially intact.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        if self.meta.sha256.is_none() {
            return Ok(());
        }
        self.read_verified().map(|_| ())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &TileMeta {
        &self.meta
    }

    fn read_verified(&self) -> Result<Vec<u8>, StoreError> {
        let expected = self.meta.sha256.as_ref().ok_or(StoreError::NotInitialized)?;
        let data = std::fs::read(self.root.join(PAYLOAD_FILE))?;
        let actual = sha256_hex(&data);
        if &actual != expected {
            tracing::warn!(%expected, %actual, "tile payload hash mismatch");
            return Err(StoreError::IntegrityMismatch {
                expected: expected.clone(),
                actual,
            });
        }
        Ok(data)
    }

    fn save_meta(&self) -> Result<(), StoreError> {
        let path = self.root.join(META_FILE);
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.meta)?;
        Ok(())
    }
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
