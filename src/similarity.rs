//! Vector math shared by the deduplicator, clusterer and prioritizer

/// Compute cosine similarity between two vectors
///
/// Mismatched lengths and zero vectors compare as 0.0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cosine distance in [0, 2]
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Element-wise mean of a set of equally sized vectors
pub fn mean_vector<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum: Option<Vec<f32>> = None;
    let mut count = 0usize;

    for v in vectors {
        match sum.as_mut() {
            None => sum = Some(v.to_vec()),
            Some(acc) => {
                if acc.len() != v.len() {
                    continue;
                }
                for (a, x) in acc.iter_mut().zip(v) {
                    *a += x;
                }
            }
        }
        count += 1;
    }

    let mut sum = sum?;
    for a in sum.iter_mut() {
        *a /= count as f32;
    }
    Some(sum)
}

/// Fold one more sample into a running mean that currently covers `count` samples
///
/// Equivalent to an exponential average with weight `1 / (count + 1)`, so the
/// result stays the exact mean of every sample folded in.
pub fn fold_into_mean(mean: &mut Vec<f32>, sample: &[f32], count: usize) {
    if mean.is_empty() || count == 0 {
        *mean = sample.to_vec();
        return;
    }
    if mean.len() != sample.len() {
        return;
    }
    let weight = 1.0 / (count as f32 + 1.0);
    for (m, s) in mean.iter_mut().zip(sample) {
        *m += (s - *m) * weight;
    }
}
