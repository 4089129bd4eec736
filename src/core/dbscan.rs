use crate::error::{PipelineError, Result};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::collections::VecDeque;
use std::fmt;

/// Cluster assignment of one embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    Noise,
    Cluster(usize),
}

impl Label {
    pub fn is_noise(&self) -> bool {
        matches!(self, Label::Noise)
    }
}

/// Directory name of the label: `-1` for noise, the cluster id otherwise.
impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Noise => write!(f, "-1"),
            Label::Cluster(id) => write!(f, "{}", id),
        }
    }
}

/// Density-based clustering over Euclidean distance.
#[derive(Debug, Clone)]
pub struct Dbscan {
    pub eps: f32,
    pub min_samples: usize,
}

impl Dbscan {
    pub fn new(eps: f32, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    /// `eps` must be finite and positive, `min_samples` at least 1.
    pub fn validate(&self) -> Result<()> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(PipelineError::InvalidParameter {
                name: "eps",
                message: format!("must be a finite value above 0, got {}", self.eps),
            });
        }
        if self.min_samples == 0 {
            return Err(PipelineError::InvalidParameter {
                name: "min_samples",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Label every point. `jobs` sizes the pool used for the neighbourhood
    /// queries; `None` uses every available core.
    ///
    /// Cluster ids are dense and numbered in order of discovery, so the result
    /// only depends on the input order and parameters. Neighbourhoods are
    /// recomputed on demand rather than stored, keeping memory linear in the
    /// number of points at the cost of a second distance pass over core points.
    pub fn fit(&self, points: &[Vec<f32>], jobs: Option<usize>) -> Result<Vec<Label>> {
        self.validate()?;
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let threads = jobs.filter(|&n| n > 0).unwrap_or_else(num_cpus::get);
        let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
        Ok(pool.install(|| {
            let core: Vec<bool> = (0..points.len())
                .into_par_iter()
                .map(|i| self.neighbour_count(points, i) >= self.min_samples)
                .collect();
            self.expand(points, &core)
        }))
    }

    // Includes `idx` itself
    fn neighbour_count(&self, points: &[Vec<f32>], idx: usize) -> usize {
        let eps_sq = self.eps * self.eps;
        points
            .iter()
            .filter(|other| squared_distance(&points[idx], other) <= eps_sq)
            .count()
    }

    // Includes `idx` itself, ascending
    fn region_query(&self, points: &[Vec<f32>], idx: usize) -> Vec<usize> {
        let eps_sq = self.eps * self.eps;
        points
            .par_iter()
            .enumerate()
            .filter(|(_, other)| squared_distance(&points[idx], other) <= eps_sq)
            .map(|(i, _)| i)
            .collect()
    }

    fn expand(&self, points: &[Vec<f32>], core: &[bool]) -> Vec<Label> {
        let mut labels: Vec<Option<Label>> = vec![None; points.len()];
        let mut next_cluster = 0;

        for start in 0..points.len() {
            if labels[start].is_some() || !core[start] {
                continue;
            }

            let cluster = Label::Cluster(next_cluster);
            next_cluster += 1;
            labels[start] = Some(cluster);

            // Points are labelled when queued, so each enters the queue once
            let mut queue = VecDeque::from([start]);
            while let Some(point) = queue.pop_front() {
                if !core[point] {
                    continue;
                }
                for neighbour in self.region_query(points, point) {
                    if labels[neighbour].is_none() {
                        labels[neighbour] = Some(cluster);
                        queue.push_back(neighbour);
                    }
                }
            }
        }

        labels
            .into_iter()
            .map(|label| label.unwrap_or(Label::Noise))
            .collect()
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
