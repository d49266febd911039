//! Inverted-file product-quantization index for very large vector sets.
//!
//! A coarse k-means quantizer routes vectors to `num_partitions`
//! partitions; within a partition each vector is a `num_sub_quantizers`-
//! byte PQ code. Search probes the `nprobe` nearest partitions with
//! asymmetric distance tables and optionally re-ranks with exact
//! distances when full embeddings are resident.

pub mod file;
mod kmeans;
mod pq;

pub use file::{
    FileRangeReader, RangeReader, VectorFileError, VectorFileMetadata, VectorFileReader,
    VectorFileRecord, VectorFileWriter,
};
pub use kmeans::KMeans;
pub use pq::{ProductQuantizer, CODEBOOK_SIZE};

use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_error::{ErrorCodes, TomeError};

use kmeans::nearest_center;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IvfPqConfig {
    pub dimension: usize,
    #[serde(default = "IvfPqConfig::default_num_partitions")]
    pub num_partitions: usize,
    #[serde(default = "IvfPqConfig::default_num_sub_quantizers")]
    pub num_sub_quantizers: usize,
    /// Only 8 is supported: one byte per sub-quantizer per vector.
    #[serde(default = "IvfPqConfig::default_bits_per_code")]
    pub bits_per_code: u8,
    #[serde(default = "IvfPqConfig::default_training_sample_size")]
    pub training_sample_size: usize,
    #[serde(default)]
    pub random_seed: u64,
}

impl IvfPqConfig {
    pub fn new(dimension: usize) -> Self {
        IvfPqConfig {
            dimension,
            num_partitions: Self::default_num_partitions(),
            num_sub_quantizers: Self::default_num_sub_quantizers(),
            bits_per_code: Self::default_bits_per_code(),
            training_sample_size: Self::default_training_sample_size(),
            random_seed: 0,
        }
    }

    fn default_num_partitions() -> usize {
        256
    }

    fn default_num_sub_quantizers() -> usize {
        16
    }

    fn default_bits_per_code() -> u8 {
        8
    }

    fn default_training_sample_size() -> usize {
        50_000
    }

    pub fn default_nprobe(&self) -> usize {
        (self.num_partitions / 8).max(10)
    }
}

#[derive(Error, Debug)]
pub enum IvfPqError {
    #[error("unsupported bits_per_code {0}; only 8 is supported")]
    UnsupportedBits(u8),
    #[error("dimension {dimension} is not divisible by {num_sub_quantizers} sub-quantizers")]
    IndivisibleDimension {
        dimension: usize,
        num_sub_quantizers: usize,
    },
    #[error("query dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl TomeError for IvfPqError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// The trained quantization payload; exactly what the optional IVF-PQ
/// file section serializes.
#[derive(Clone, Debug, PartialEq)]
pub struct IvfPqData {
    pub dimension: usize,
    /// `num_partitions * dimension` coarse centroids.
    pub centroids: Vec<f32>,
    pub quantizer: ProductQuantizer,
    /// Coarse assignment per vector, in original row order.
    pub assignments: Vec<u32>,
    /// `row_count * num_sub_quantizers` codes, in original row order.
    pub pq_codes: Vec<u8>,
    /// `num_partitions + 1` non-decreasing offsets into `sorted_ids`.
    pub partition_offsets: Vec<u32>,
    /// Row ids permuted so each partition is contiguous.
    pub sorted_ids: Vec<u32>,
}

impl IvfPqData {
    pub fn num_partitions(&self) -> usize {
        self.partition_offsets.len().saturating_sub(1)
    }

    pub fn row_count(&self) -> usize {
        self.sorted_ids.len()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IvfPqSearchParams {
    pub nprobe: Option<usize>,
    /// Re-rank the top candidates with exact distances when embeddings
    /// are available.
    pub rerank: bool,
}

pub struct IvfPqIndex {
    config: IvfPqConfig,
    data: IvfPqData,
    /// Full vectors, row-major, kept only when the caller wants exact
    /// re-ranking.
    embeddings: Option<Vec<f32>>,
}

impl IvfPqIndex {
    /// Train the coarse quantizer and PQ codebooks on (a sample of) the
    /// vector set, then encode every vector.
    pub fn build(config: IvfPqConfig, vectors: &[f32]) -> Result<Self, IvfPqError> {
        if config.bits_per_code != 8 {
            return Err(IvfPqError::UnsupportedBits(config.bits_per_code));
        }
        if config.dimension % config.num_sub_quantizers != 0 {
            return Err(IvfPqError::IndivisibleDimension {
                dimension: config.dimension,
                num_sub_quantizers: config.num_sub_quantizers,
            });
        }
        let dim = config.dimension;
        let n = vectors.len() / dim.max(1);
        let sample_rows = n.min(config.training_sample_size);
        let sample = &vectors[..sample_rows * dim];

        let mut coarse = KMeans::new(config.num_partitions, dim, config.random_seed);
        let centroids = coarse.train(sample);
        let quantizer =
            ProductQuantizer::train(sample, dim, config.num_sub_quantizers, config.random_seed);

        let mut assignments = Vec::with_capacity(n);
        let mut pq_codes = Vec::with_capacity(n * config.num_sub_quantizers);
        for row in 0..n {
            let vector = &vectors[row * dim..(row + 1) * dim];
            assignments.push(nearest_center(&centroids, vector, dim));
            pq_codes.extend(quantizer.encode(vector));
        }

        let (partition_offsets, sorted_ids) =
            partition_sort(&assignments, config.num_partitions);

        Ok(IvfPqIndex {
            config,
            data: IvfPqData {
                dimension: dim,
                centroids,
                quantizer,
                assignments,
                pq_codes,
                partition_offsets,
                sorted_ids,
            },
            embeddings: Some(vectors.to_vec()),
        })
    }

    /// Assemble from a previously trained payload (the file reader path).
    pub fn from_data(config: IvfPqConfig, data: IvfPqData, embeddings: Option<Vec<f32>>) -> Self {
        IvfPqIndex {
            config,
            data,
            embeddings,
        }
    }

    pub fn data(&self) -> &IvfPqData {
        &self.data
    }

    pub fn config(&self) -> &IvfPqConfig {
        &self.config
    }

    /// Top-k rows by approximate (ADC) distance, ascending. Probes the
    /// `nprobe` partitions whose centroids are nearest the query, gathers
    /// `2k` candidates, then optionally re-ranks exactly.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        params: IvfPqSearchParams,
    ) -> Result<Vec<(u32, f32)>, IvfPqError> {
        let dim = self.config.dimension;
        if query.len() != dim {
            return Err(IvfPqError::DimensionMismatch {
                expected: dim,
                got: query.len(),
            });
        }
        let nprobe = params
            .nprobe
            .unwrap_or_else(|| self.config.default_nprobe())
            .min(self.data.num_partitions())
            .max(1);

        // Coarse: distance to every centroid, keep the nprobe closest.
        let mut centroid_distances: Vec<(f32, usize)> = self
            .data
            .centroids
            .chunks_exact(dim)
            .enumerate()
            .map(|(p, c)| (tome_distance::euclidean_distance_scalar(c, query), p))
            .collect();
        centroid_distances.sort_by(|a, b| a.0.total_cmp(&b.0));
        centroid_distances.truncate(nprobe);

        let tables = self.data.quantizer.distance_tables(query);
        let m = self.config.num_sub_quantizers;
        let budget = (2 * k).max(1);
        // Max-heap keeps the worst of the best `2k` on top.
        let mut heap: BinaryHeap<RowCandidate> = BinaryHeap::with_capacity(budget + 1);
        for &(_, partition) in &centroid_distances {
            let start = self.data.partition_offsets[partition] as usize;
            let end = self.data.partition_offsets[partition + 1] as usize;
            for &row in &self.data.sorted_ids[start..end] {
                let codes = &self.data.pq_codes[row as usize * m..(row as usize + 1) * m];
                let distance = self.data.quantizer.adc(codes, &tables);
                heap.push(RowCandidate { distance, row });
                if heap.len() > budget {
                    heap.pop();
                }
            }
        }

        let mut candidates: Vec<(u32, f32)> =
            heap.into_iter().map(|c| (c.row, c.distance)).collect();
        if params.rerank {
            if let Some(embeddings) = &self.embeddings {
                for (row, distance) in &mut candidates {
                    let vector = &embeddings[*row as usize * dim..(*row as usize + 1) * dim];
                    *distance = tome_distance::euclidean_distance_scalar(vector, query);
                }
            }
        }
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
        candidates.truncate(k);
        Ok(candidates)
    }
}

/// Stable partition sort: offsets delimit each partition's rows inside the
/// returned permutation.
fn partition_sort(assignments: &[u32], num_partitions: usize) -> (Vec<u32>, Vec<u32>) {
    let mut counts = vec![0u32; num_partitions];
    for &a in assignments {
        counts[a as usize] += 1;
    }
    let mut offsets = vec![0u32; num_partitions + 1];
    for p in 0..num_partitions {
        offsets[p + 1] = offsets[p] + counts[p];
    }
    let mut cursor = offsets[..num_partitions].to_vec();
    let mut sorted_ids = vec![0u32; assignments.len()];
    for (row, &a) in assignments.iter().enumerate() {
        sorted_ids[cursor[a as usize] as usize] = row as u32;
        cursor[a as usize] += 1;
    }
    (offsets, sorted_ids)
}

struct RowCandidate {
    distance: f32,
    row: u32,
}

impl PartialEq for RowCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.row == other.row
    }
}

impl Eq for RowCandidate {}

impl PartialOrd for RowCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.row.cmp(&other.row))
    }
}
