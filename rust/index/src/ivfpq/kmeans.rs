use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use tome_distance::euclidean_distance_scalar;

/// Lloyd's algorithm over flattened row-major vectors. The coarse
/// quantizer and each PQ codebook train through this.
pub struct KMeans {
    pub k: usize,
    pub dimension: usize,
    pub max_iterations: usize,
    rng: StdRng,
}

impl KMeans {
    pub fn new(k: usize, dimension: usize, seed: u64) -> Self {
        KMeans {
            k,
            dimension,
            max_iterations: 20,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns `k * dimension` flattened centroids. When there are fewer
    /// samples than centers, surplus centers duplicate random samples so
    /// the codebook shape stays fixed.
    pub fn train(&mut self, samples: &[f32]) -> Vec<f32> {
        assert_eq!(samples.len() % self.dimension, 0, "ragged sample buffer");
        let n = samples.len() / self.dimension;
        let dim = self.dimension;
        if n == 0 {
            return vec![0.0; self.k * dim];
        }

        let mut centroids = self.init_centers(samples, n);
        let mut assignments = vec![0u32; n];

        for _ in 0..self.max_iterations {
            let mut moved = false;
            for i in 0..n {
                let vector = &samples[i * dim..(i + 1) * dim];
                let best = self.nearest_center(&centroids, vector);
                if assignments[i] != best {
                    assignments[i] = best;
                    moved = true;
                }
            }

            let mut sums = vec![0.0f64; self.k * dim];
            let mut counts = vec![0usize; self.k];
            for i in 0..n {
                let center = assignments[i] as usize;
                counts[center] += 1;
                for d in 0..dim {
                    sums[center * dim + d] += samples[i * dim + d] as f64;
                }
            }
            for center in 0..self.k {
                if counts[center] == 0 {
                    // Reseed dead centers from a random sample.
                    let pick = self.rng.gen_range(0..n);
                    centroids[center * dim..(center + 1) * dim]
                        .copy_from_slice(&samples[pick * dim..(pick + 1) * dim]);
                    continue;
                }
                for d in 0..dim {
                    centroids[center * dim + d] = (sums[center * dim + d] / counts[center] as f64) as f32;
                }
            }

            if !moved {
                break;
            }
        }
        centroids
    }

    fn init_centers(&mut self, samples: &[f32], n: usize) -> Vec<f32> {
        let dim = self.dimension;
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut self.rng);
        let mut centroids = Vec::with_capacity(self.k * dim);
        for center in 0..self.k {
            let pick = order[center % n];
            centroids.extend_from_slice(&samples[pick * dim..(pick + 1) * dim]);
        }
        centroids
    }

    pub fn nearest_center(&self, centroids: &[f32], vector: &[f32]) -> u32 {
        nearest_center(centroids, vector, self.dimension)
    }
}

/// Index of the centroid (flattened, `dimension`-strided) closest to
/// `vector` by squared euclidean distance.
pub fn nearest_center(centroids: &[f32], vector: &[f32], dimension: usize) -> u32 {
    let mut best = 0u32;
    let mut best_distance = f32::INFINITY;
    for (center, chunk) in centroids.chunks_exact(dimension).enumerate() {
        let distance = euclidean_distance_scalar(chunk, vector);
        if distance < best_distance {
            best_distance = distance;
            best = center as u32;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separable_clusters_are_recovered() {
        // Two tight blobs around (0,0) and (10,10).
        let mut samples = Vec::new();
        for i in 0..20 {
            let jitter = (i % 5) as f32 * 0.01;
            samples.extend_from_slice(&[jitter, jitter]);
            samples.extend_from_slice(&[10.0 + jitter, 10.0 + jitter]);
        }
        let mut kmeans = KMeans::new(2, 2, 1);
        let centroids = kmeans.train(&samples);
        let a = nearest_center(&centroids, &[0.0, 0.0], 2);
        let b = nearest_center(&centroids, &[10.0, 10.0], 2);
        assert_ne!(a, b);
    }

    #[test]
    fn more_centers_than_samples_still_fills_codebook() {
        let samples = vec![1.0, 2.0, 3.0, 4.0];
        let mut kmeans = KMeans::new(8, 2, 1);
        let centroids = kmeans.train(&samples);
        assert_eq!(centroids.len(), 16);
    }

    #[test]
    fn empty_input_yields_zero_centroids() {
        let mut kmeans = KMeans::new(4, 8, 1);
        assert_eq!(kmeans.train(&[]), vec![0.0; 32]);
    }
}
