//! Clustering strategies and the quality metric used to choose between them
//!
//! All strategies work on cosine distance, the same geometry the incremental
//! classifier uses, so a rebuilt partition is directly comparable with the
//! clusters it replaces.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::similarity::{cosine_distance, mean_vector};

/// Cluster label per point; `None` marks noise
pub type Labels = Vec<Option<usize>>;

/// A way of partitioning a set of embeddings
///
/// `distances` holds the pairwise cosine distances of `points`.
pub trait ClusteringStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn partition(&self, points: &[Vec<f32>], distances: &DistanceMatrix) -> Labels;
}

/// Internal quality of a partition; higher is better
pub trait QualityScorer: Send + Sync {
    fn score(&self, distances: &DistanceMatrix, labels: &Labels) -> f32;
}

/// Symmetric pairwise cosine distances, computed once per rebuild
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    rows: Vec<Vec<f32>>,
}

impl DistanceMatrix {
    pub fn between(points: &[Vec<f32>]) -> Self {
        let n = points.len();
        let mut rows = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = cosine_distance(&points[i], &points[j]);
                rows[i][j] = d;
                rows[j][i] = d;
            }
        }
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.rows[i][j]
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.rows[i]
    }
}

/// The partition a strategy produced, with its quality
#[derive(Debug, Clone)]
pub struct Partition {
    pub strategy: &'static str,
    pub labels: Labels,
    pub quality: f32,
}

/// Run every strategy and keep the best-scoring partition
///
/// Ties go to the strategy listed first.
pub fn select_partition(
    strategies: &[Box<dyn ClusteringStrategy>],
    scorer: &dyn QualityScorer,
    points: &[Vec<f32>],
) -> Option<Partition> {
    if strategies.is_empty() {
        return None;
    }

    let distances = DistanceMatrix::between(points);
    let mut best: Option<Partition> = None;
    for strategy in strategies {
        let labels = strategy.partition(points, &distances);
        let quality = scorer.score(&distances, &labels);
        tracing::debug!("Strategy {} scored {:.3}", strategy.name(), quality);
        if best.as_ref().map_or(true, |b| quality > b.quality) {
            best = Some(Partition {
                strategy: strategy.name(),
                labels,
                quality,
            });
        }
    }
    best
}

/// k-means++ over cosine distance with an adaptive cluster count
#[derive(Debug, Clone)]
pub struct KMeansStrategy {
    pub max_clusters: usize,
    pub iterations: usize,
    pub restarts: usize,
    pub seed: u64,
}

impl KMeansStrategy {
    pub fn new(max_clusters: usize, iterations: usize, seed: u64) -> Self {
        Self {
            max_clusters,
            iterations,
            restarts: 4,
            seed,
        }
    }

    /// `k ≈ sqrt(n / 2)`, clamped to `[2, max_clusters]` and never above `n`
    pub fn adaptive_k(&self, n: usize) -> usize {
        let k = ((n as f64 / 2.0).sqrt().round() as usize).clamp(2, self.max_clusters.max(2));
        k.min(n)
    }

    fn seed_centroids(&self, points: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
        let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];

        while centroids.len() < k {
            let weights: Vec<f64> = points
                .iter()
                .map(|p| {
                    let d = centroids
                        .iter()
                        .map(|c| cosine_distance(p, c))
                        .fold(f32::MAX, f32::min)
                        .max(0.0) as f64;
                    d * d
                })
                .collect();
            let total: f64 = weights.iter().sum();
            if total <= 0.0 {
                // Every remaining point coincides with a centroid
                break;
            }

            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            centroids.push(points[chosen].clone());
        }
        centroids
    }

    fn run(&self, points: &[Vec<f32>], k: usize, rng: &mut StdRng) -> (Vec<usize>, f32) {
        let mut centroids = self.seed_centroids(points, k, rng);
        let mut assignments = vec![usize::MAX; points.len()];

        for _ in 0..self.iterations.max(1) {
            let mut changed = false;
            for (i, point) in points.iter().enumerate() {
                let nearest = nearest_centroid(point, &centroids);
                if assignments[i] != nearest {
                    assignments[i] = nearest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            for (c, centroid) in centroids.iter_mut().enumerate() {
                let members = points
                    .iter()
                    .zip(&assignments)
                    .filter(|(_, a)| **a == c)
                    .map(|(p, _)| p.as_slice());
                // Keep old centroid if cluster is empty
                if let Some(mean) = mean_vector(members) {
                    *centroid = mean;
                }
            }
        }

        let inertia = points
            .iter()
            .zip(&assignments)
            .map(|(p, &a)| cosine_distance(p, &centroids[a]))
            .sum();
        (assignments, inertia)
    }
}

fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::MAX;
    for (c, centroid) in centroids.iter().enumerate() {
        let dist = cosine_distance(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = c;
        }
    }
    best
}

impl ClusteringStrategy for KMeansStrategy {
    fn name(&self) -> &'static str {
        "kmeans"
    }

    fn partition(&self, points: &[Vec<f32>], _distances: &DistanceMatrix) -> Labels {
        match points.len() {
            0 => return Vec::new(),
            1 => return vec![Some(0)],
            _ => {}
        }

        let k = self.adaptive_k(points.len());
        let mut best: Option<(Vec<usize>, f32)> = None;
        for restart in 0..self.restarts.max(1) {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(restart as u64));
            let (assignments, inertia) = self.run(points, k, &mut rng);
            if best.as_ref().map_or(true, |(_, b)| inertia < *b) {
                best = Some((assignments, inertia));
            }
        }

        best.map(|(assignments, _)| assignments.into_iter().map(Some).collect())
            .unwrap_or_default()
    }
}

/// DBSCAN over cosine distance
///
/// `eps` is not configured: it is the median distance from each point to its
/// `min_points`-th nearest neighbor, so the density threshold follows the data.
#[derive(Debug, Clone)]
pub struct DensityStrategy {
    pub min_points: usize,
}

impl DensityStrategy {
    pub fn new(min_points: usize) -> Self {
        Self {
            min_points: min_points.max(2),
        }
    }

    pub fn estimate_eps(&self, distances: &DistanceMatrix) -> f32 {
        let n = distances.len();
        if n < 2 {
            return 0.0;
        }
        let k = self.min_points.min(n - 1);
        let mut kth: Vec<f32> = (0..n)
            .map(|i| {
                let mut others: Vec<f32> = distances
                    .row(i)
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, d)| *d)
                    .collect();
                others.sort_by(|a, b| a.total_cmp(b));
                others[k - 1]
            })
            .collect();
        kth.sort_by(|a, b| a.total_cmp(b));
        kth[kth.len() / 2]
    }
}

impl ClusteringStrategy for DensityStrategy {
    fn name(&self) -> &'static str {
        "density"
    }

    fn partition(&self, points: &[Vec<f32>], distances: &DistanceMatrix) -> Labels {
        let n = points.len();
        let eps = self.estimate_eps(distances) + f32::EPSILON;

        let neighbors = |i: usize| -> Vec<usize> {
            (0..n).filter(|&j| distances.get(i, j) <= eps).collect()
        };

        let mut labels: Labels = vec![None; n];
        let mut visited = vec![false; n];
        let mut next_label = 0;

        for i in 0..n {
            if visited[i] {
                continue;
            }
            visited[i] = true;
            let seeds = neighbors(i);
            if seeds.len() < self.min_points {
                continue;
            }

            let label = next_label;
            next_label += 1;
            labels[i] = Some(label);

            let mut queue = seeds;
            while let Some(j) = queue.pop() {
                if labels[j].is_none() {
                    labels[j] = Some(label);
                }
                if visited[j] {
                    continue;
                }
                visited[j] = true;
                let expansion = neighbors(j);
                if expansion.len() >= self.min_points {
                    queue.extend(
                        expansion
                            .into_iter()
                            .filter(|&x| !visited[x] || labels[x].is_none()),
                    );
                }
            }
        }
        labels
    }
}

/// Mean silhouette over cosine distance, weighted by the share of points that
/// were assigned to a cluster
///
/// Partitions with fewer than two clusters cannot be assessed and score -1.
#[derive(Debug, Clone, Default)]
pub struct SilhouetteScorer;

impl QualityScorer for SilhouetteScorer {
    fn score(&self, distances: &DistanceMatrix, labels: &Labels) -> f32 {
        let mut cluster_ids: Vec<usize> = labels.iter().flatten().copied().collect();
        cluster_ids.sort_unstable();
        cluster_ids.dedup();
        if cluster_ids.len() < 2 || distances.is_empty() {
            return -1.0;
        }

        let labeled: Vec<usize> = (0..distances.len()).filter(|&i| labels[i].is_some()).collect();

        let mean_distance_to = |i: usize, cluster: usize| -> Option<f32> {
            let others: Vec<f32> = labeled
                .iter()
                .filter(|&&j| j != i && labels[j] == Some(cluster))
                .map(|&j| distances.get(i, j))
                .collect();
            if others.is_empty() {
                None
            } else {
                Some(others.iter().sum::<f32>() / others.len() as f32)
            }
        };

        let mut total = 0.0;
        for &i in &labeled {
            let Some(own) = labels[i] else { continue };
            let Some(a) = mean_distance_to(i, own) else {
                // Singleton clusters contribute 0
                continue;
            };
            let b = cluster_ids
                .iter()
                .filter(|&&c| c != own)
                .filter_map(|&c| mean_distance_to(i, c))
                .fold(f32::MAX, f32::min);
            let denom = a.max(b);
            if denom > 0.0 {
                total += (b - a) / denom;
            }
        }

        let coverage = labeled.len() as f32 / distances.len() as f32;
        (total / labeled.len() as f32) * coverage
    }
}
