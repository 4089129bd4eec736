use crate::core::dbscan::{Dbscan, Label};
use crate::core::manifest::{read_manifest, FaceRecord};
use crate::error::{PipelineError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_EPS: f32 = 0.41;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// Neighbourhood radius in embedding space.
    pub eps: f32,
    /// Neighbours (self included) a face needs to seed a cluster.
    pub min_samples: usize,
    /// Worker threads for the neighbourhood search, all cores when unset.
    pub jobs: Option<usize>,
    /// Also materialize the noise group as directory `-1`.
    pub write_noise: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            eps: DEFAULT_EPS,
            min_samples: 2,
            jobs: None,
            write_noise: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterSummary {
    /// Distinct clusters, noise excluded.
    pub unique_faces: usize,
    pub result_dir: PathBuf,
    /// One label per manifest record, in manifest order.
    pub labels: Vec<Label>,
}

/// Directory the grouper writes for the database at `db_dir`:
/// `result_<name>` next to it.
pub fn result_dir_for(db_dir: &Path) -> PathBuf {
    let name = db_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let result_name = format!("result_{}", name);
    match db_dir.parent() {
        Some(parent) => parent.join(result_name),
        None => PathBuf::from(result_name),
    }
}

/// Cluster the embeddings of a face database and copy each group's images
/// into its own label directory.
///
/// Record paths are resolved against `db_dir`, so the database can be
/// clustered from any working directory or after being moved.
pub fn cluster_faces(db_dir: &Path, options: &ClusterOptions) -> Result<ClusterSummary> {
    let dbscan = Dbscan::new(options.eps, options.min_samples);
    dbscan.validate()?;
    if !db_dir.is_dir() {
        return Err(PipelineError::not_found(db_dir, "face database not found"));
    }
    let records = read_manifest(db_dir)?;
    let embeddings = collect_embeddings(&records)?;

    let labels = dbscan.fit(&embeddings, options.jobs)?;
    let groups = group_by_label(&labels);
    let unique_faces = groups.keys().filter(|l| !l.is_noise()).count();
    info!(
        "Clustered {} face(s) into {} unique face(s)",
        records.len(),
        unique_faces
    );

    let sources: Vec<PathBuf> = records.iter().map(|r| r.resolve(db_dir)).collect();
    if let Some(missing) = sources.iter().find(|p| !p.is_file()) {
        return Err(PipelineError::not_found(missing, "stored face image is missing"));
    }

    let result_dir = result_dir_for(db_dir);
    if result_dir.exists() {
        return Err(PipelineError::OutputExists { path: result_dir });
    }
    fs::create_dir_all(&result_dir)?;

    for (label, members) in &groups {
        if label.is_noise() && !options.write_noise {
            debug!("Leaving {} noise image(s) out of the results", members.len());
            continue;
        }
        let label_dir = result_dir.join(label.to_string());
        fs::create_dir(&label_dir)?;
        for (ctr, &idx) in members.iter().enumerate() {
            fs::copy(&sources[idx], label_dir.join(format!("{}.jpg", ctr)))?;
        }
        debug!("Label {}: {} image(s)", label, members.len());
    }
    info!("Clusters stored in {}", result_dir.display());

    Ok(ClusterSummary {
        unique_faces,
        result_dir,
        labels,
    })
}

fn collect_embeddings(records: &[FaceRecord]) -> Result<Vec<Vec<f32>>> {
    let Some(first) = records.first() else {
        return Ok(Vec::new());
    };
    let expected = first.embedding.len();
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            if record.embedding.len() != expected {
                return Err(PipelineError::DimensionMismatch {
                    index,
                    expected,
                    found: record.embedding.len(),
                });
            }
            Ok(record.embedding.clone())
        })
        .collect()
}

/// Member indices per label, labels ascending, members in manifest order.
fn group_by_label(labels: &[Label]) -> BTreeMap<Label, Vec<usize>> {
    let mut groups: BTreeMap<Label, Vec<usize>> = BTreeMap::new();
    for (idx, label) in labels.iter().enumerate() {
        groups.entry(*label).or_default().push(idx);
    }
    groups
}
