use crate::core::sharpness::blur_score_from_path;
use crate::error::{PipelineError, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq)]
pub struct BestImage {
    pub path: PathBuf,
    pub score: f64,
}

/// Sharpest member of one cluster, if any member scored above zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPick {
    pub label: usize,
    pub best: Option<BestImage>,
}

/// Pick the sharpest image of every cluster directory under `result_dir`.
///
/// Clusters are the subdirectories named by a non-negative integer, in
/// ascending order; the noise group is never considered. Ties keep the
/// earliest listed image and files that cannot be scored are skipped.
pub fn select_best_images(result_dir: &Path) -> Result<Vec<ClusterPick>> {
    if !result_dir.is_dir() {
        return Err(PipelineError::not_found(result_dir, "result directory not found"));
    }

    let mut picks = Vec::new();
    for (label, dir) in cluster_dirs(result_dir)? {
        let mut best: Option<BestImage> = None;
        for file in cluster_files(&dir)? {
            let score = match blur_score_from_path(&file) {
                Ok(score) => score,
                Err(e) => {
                    warn!("Skipping {} while picking best image: {}", file.display(), e);
                    continue;
                }
            };
            let best_score = best.as_ref().map_or(0.0, |b| b.score);
            if score > best_score {
                best = Some(BestImage { path: file, score });
            }
        }

        match &best {
            Some(pick) => debug!("Cluster {}: best {} ({:.2})", label, pick.path.display(), pick.score),
            None => debug!("Cluster {}: no usable image", label),
        }
        picks.push(ClusterPick { label, best });
    }
    Ok(picks)
}

/// Copy every pick to `<dest>/<label>.jpg`, returning the written paths.
pub fn export_best_images(picks: &[ClusterPick], dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;
    let mut written = Vec::new();
    for pick in picks {
        if let Some(best) = &pick.best {
            let target = dest.join(format!("{}.jpg", pick.label));
            fs::copy(&best.path, &target)?;
            written.push(target);
        }
    }
    Ok(written)
}

fn cluster_dirs(result_dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(result_dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(label) = entry.file_name().to_str().and_then(|n| n.parse::<usize>().ok()) {
            dirs.push((label, entry.into_path()));
        }
    }
    dirs.sort_by_key(|(label, _)| *label);
    Ok(dirs)
}

/// Files of a cluster ordered by numeric stem, then by name.
fn cluster_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort_by_key(|path| {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(u64::MAX);
        (stem, path.file_name().map(|n| n.to_os_string()))
    });
    Ok(files)
}
