use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// File name of the serialized record list inside a face database directory.
pub const MANIFEST_FILE: &str = "face_encodings.json";

/// One accepted image: where its copy lives and the embedding of its face.
///
/// `path` is relative to the face database directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub path: PathBuf,
    pub embedding: Vec<f32>,
}

impl FaceRecord {
    /// Location of the stored image for the database at `db_dir`.
    pub fn resolve(&self, db_dir: &Path) -> PathBuf {
        db_dir.join(&self.path)
    }
}

pub fn manifest_path(db_dir: &Path) -> PathBuf {
    db_dir.join(MANIFEST_FILE)
}

/// Persist `records` in order as the manifest of `db_dir`.
pub fn write_manifest(db_dir: &Path, records: &[FaceRecord]) -> Result<PathBuf> {
    let path = manifest_path(db_dir);
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer(&mut writer, records)?;
    writer.flush()?;
    Ok(path)
}

/// Load the manifest of `db_dir`, preserving record order.
pub fn read_manifest(db_dir: &Path) -> Result<Vec<FaceRecord>> {
    let path = manifest_path(db_dir);
    if !path.is_file() {
        return Err(PipelineError::not_found(path, "face database manifest is missing"));
    }
    let reader = BufReader::new(File::open(&path)?);
    Ok(serde_json::from_reader(reader)?)
}
