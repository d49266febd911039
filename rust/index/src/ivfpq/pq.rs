use serde::{Deserialize, Serialize};

use tome_distance::euclidean_distance_scalar;

use crate::ivfpq::kmeans::{nearest_center, KMeans};

pub const CODEBOOK_SIZE: usize = 256;

/// Product quantizer: the vector is split into `num_sub_quantizers`
/// sub-vectors, each encoded as the index of the nearest of 256
/// sub-centroids. One byte per sub-quantizer per vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductQuantizer {
    pub num_sub_quantizers: usize,
    pub sub_dimension: usize,
    /// `num_sub_quantizers * 256 * sub_dimension` flattened codewords.
    pub codebooks: Vec<f32>,
}

impl ProductQuantizer {
    pub fn dimension(&self) -> usize {
        self.num_sub_quantizers * self.sub_dimension
    }

    /// Train one 256-entry codebook per sub-quantizer on the sample set.
    pub fn train(samples: &[f32], dimension: usize, num_sub_quantizers: usize, seed: u64) -> Self {
        assert_eq!(
            dimension % num_sub_quantizers,
            0,
            "dimension must divide evenly into sub-quantizers"
        );
        let sub_dimension = dimension / num_sub_quantizers;
        let n = samples.len() / dimension.max(1);
        let mut codebooks = Vec::with_capacity(num_sub_quantizers * CODEBOOK_SIZE * sub_dimension);
        for m in 0..num_sub_quantizers {
            let mut sub_samples = Vec::with_capacity(n * sub_dimension);
            for i in 0..n {
                let start = i * dimension + m * sub_dimension;
                sub_samples.extend_from_slice(&samples[start..start + sub_dimension]);
            }
            let mut kmeans = KMeans::new(CODEBOOK_SIZE, sub_dimension, seed.wrapping_add(m as u64));
            codebooks.extend(kmeans.train(&sub_samples));
        }
        ProductQuantizer {
            num_sub_quantizers,
            sub_dimension,
            codebooks,
        }
    }

    fn codebook(&self, m: usize) -> &[f32] {
        let stride = CODEBOOK_SIZE * self.sub_dimension;
        &self.codebooks[m * stride..(m + 1) * stride]
    }

    /// `num_sub_quantizers` bytes of codes for one vector.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        (0..self.num_sub_quantizers)
            .map(|m| {
                let sub = &vector[m * self.sub_dimension..(m + 1) * self.sub_dimension];
                nearest_center(self.codebook(m), sub, self.sub_dimension) as u8
            })
            .collect()
    }

    /// Asymmetric distance tables: for each sub-quantizer, the squared
    /// euclidean distance from the query's sub-vector to each of the 256
    /// codewords. Flattened `num_sub_quantizers * 256`.
    pub fn distance_tables(&self, query: &[f32]) -> Vec<f32> {
        let mut tables = Vec::with_capacity(self.num_sub_quantizers * CODEBOOK_SIZE);
        for m in 0..self.num_sub_quantizers {
            let sub = &query[m * self.sub_dimension..(m + 1) * self.sub_dimension];
            let codebook = self.codebook(m);
            for code in 0..CODEBOOK_SIZE {
                let codeword = &codebook[code * self.sub_dimension..(code + 1) * self.sub_dimension];
                tables.push(euclidean_distance_scalar(codeword, sub));
            }
        }
        tables
    }

    /// Approximate squared distance: sum of table entries at the vector's
    /// codes.
    pub fn adc(&self, codes: &[u8], tables: &[f32]) -> f32 {
        codes
            .iter()
            .enumerate()
            .map(|(m, &code)| tables[m * CODEBOOK_SIZE + code as usize])
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_flat(n: usize, dimension: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * dimension).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn codebook_shape_is_fixed() {
        let samples = random_flat(500, 32, 5);
        let pq = ProductQuantizer::train(&samples, 32, 8, 0);
        assert_eq!(pq.sub_dimension, 4);
        assert_eq!(pq.codebooks.len(), 8 * 256 * 4);
        assert_eq!(pq.encode(&samples[..32]).len(), 8);
    }

    #[test]
    fn adc_approximates_true_distance_ordering() {
        let dimension = 16;
        let samples = random_flat(1000, dimension, 9);
        let pq = ProductQuantizer::train(&samples, dimension, 4, 0);
        let query: Vec<f32> = samples[..dimension].to_vec();
        let tables = pq.distance_tables(&query);

        // The encoded query should be closer (by ADC) than a random far
        // vector on average across many trials.
        let mut wins = 0;
        for i in 1..200 {
            let near = &samples[..dimension];
            let far = &samples[i * dimension..(i + 1) * dimension];
            let near_adc = pq.adc(&pq.encode(near), &tables);
            let far_adc = pq.adc(&pq.encode(far), &tables);
            if near_adc <= far_adc {
                wins += 1;
            }
        }
        assert!(wins > 180, "ADC ranked the true vector first only {wins}/199 times");
    }
}
