//! Hierarchical navigable small world graph over dense vectors.
//!
//! Nodes live in an entry- and byte-bounded LRU; adjacency lists hold node
//! ids, never pointers, so an eviction mid-search is a dead end rather
//! than a dangling reference. Insertions are totally ordered (the index is
//! `&mut` for writes); searches only touch the internally-locked store.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tome_cache::{CacheConfig, LruBoundedCache, LruCacheConfig, Weighted};
use tome_distance::DistanceFunction;
use tome_error::{ErrorCodes, TomeError};
use tome_types::ArticleType;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HnswIndexConfig {
    pub dimension: usize,
    /// Max connections added per layer per node; degree is pruned back to
    /// `2m` when backlinks push past it.
    #[serde(default = "HnswIndexConfig::default_m")]
    pub m: usize,
    #[serde(default = "HnswIndexConfig::default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "HnswIndexConfig::default_ef_search")]
    pub ef_search: usize,
    #[serde(default)]
    pub distance_function: DistanceFunction,
    /// Node store bounds; `max_bytes` uses the per-node byte accounting.
    #[serde(default = "HnswIndexConfig::default_cache")]
    pub cache: CacheConfig,
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl HnswIndexConfig {
    pub fn new(dimension: usize) -> Self {
        HnswIndexConfig {
            dimension,
            m: Self::default_m(),
            ef_construction: Self::default_ef_construction(),
            ef_search: Self::default_ef_search(),
            distance_function: DistanceFunction::default(),
            cache: Self::default_cache(),
            random_seed: None,
        }
    }

    fn default_m() -> usize {
        16
    }

    fn default_ef_construction() -> usize {
        200
    }

    fn default_ef_search() -> usize {
        50
    }

    fn default_cache() -> CacheConfig {
        CacheConfig::Lru(LruCacheConfig {
            max_entries: 100_000,
            max_bytes: None,
        })
    }
}

#[derive(Error, Debug)]
pub enum HnswError {
    #[error("vector dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("document not found: {0}")]
    DocNotFound(String),
}

impl TomeError for HnswError {
    fn code(&self) -> ErrorCodes {
        match self {
            HnswError::DimensionMismatch { .. } => ErrorCodes::InvalidArgument,
            HnswError::DocNotFound(_) => ErrorCodes::NotFound,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HnswNode {
    pub id: u32,
    pub doc_id: String,
    pub vector: Vec<f32>,
    pub article_type: Option<ArticleType>,
    /// `connections[layer]` for `layer` in `0..=max_layer`.
    pub connections: Vec<Vec<u32>>,
    pub max_layer: u8,
}

impl Weighted for HnswNode {
    fn weight(&self) -> usize {
        let edges: usize = self.connections.iter().map(|l| l.len() * 4).sum();
        8 * self.vector.len() + 2 * self.doc_id.len() + edges + 64
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchMatch {
    pub doc_id: String,
    pub score: f32,
    pub article_type: Option<ArticleType>,
}

#[derive(Clone, Debug, Default)]
pub struct SearchOptions {
    pub ef_search: Option<usize>,
    pub article_type: Option<ArticleType>,
    pub min_score: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HybridStrategy {
    Auto,
    PreFilter,
    PostFilter,
}

/// Over-fetch factor for post-filter hybrid searches.
const POST_FILTER_MULTIPLIER: usize = 4;

pub type EvictionCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Candidate ordered by distance; `BinaryHeap` is a max-heap, so `Reverse`
/// semantics are encoded by flipping the comparison where needed.
#[derive(PartialEq)]
struct Candidate {
    distance: f32,
    id: u32,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

pub struct HnswIndex {
    config: HnswIndexConfig,
    store: LruBoundedCache<u32, HnswNode>,
    /// Ids believed to be in the graph; pruned as eviction notices drain.
    live_ids: HashSet<u32>,
    doc_to_id: HashMap<String, u32>,
    entry_point: Option<(u32, u8)>,
    next_id: u32,
    rng: StdRng,
    level_norm: f64,
    pending_evictions: Arc<Mutex<Vec<(u32, String)>>>,
    eviction_callback: Option<EvictionCallback>,
}

impl HnswIndex {
    pub fn new(config: HnswIndexConfig) -> Self {
        let store = LruBoundedCache::new(&config.cache);
        let pending_evictions: Arc<Mutex<Vec<(u32, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = pending_evictions.clone();
        store.set_eviction_listener(Arc::new(move |_, node: &HnswNode| {
            sink.lock().push((node.id, node.doc_id.clone()));
        }));
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let level_norm = 1.0 / (config.m.max(2) as f64).ln();
        HnswIndex {
            config,
            store,
            live_ids: HashSet::new(),
            doc_to_id: HashMap::new(),
            entry_point: None,
            next_id: 0,
            rng,
            level_norm,
            pending_evictions,
            eviction_callback: None,
        }
    }

    pub fn set_eviction_callback(&mut self, callback: EvictionCallback) {
        self.eviction_callback = Some(callback);
    }

    pub fn len(&self) -> usize {
        self.doc_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_to_id.is_empty()
    }

    pub fn config(&self) -> &HnswIndexConfig {
        &self.config
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.doc_to_id.contains_key(doc_id)
    }

    /// Classic HNSW layer draw: `floor(-ln(u) / ln(M))`.
    fn random_layer(&mut self) -> u8 {
        let uniform: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        ((-uniform.ln()) * self.level_norm).floor().min(31.0) as u8
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.config.distance_function.distance(a, b)
    }

    /// Fold queued eviction notices into the bookkeeping before mutating.
    fn drain_evictions(&mut self) {
        let drained: Vec<(u32, String)> = std::mem::take(&mut *self.pending_evictions.lock());
        if drained.is_empty() {
            return;
        }
        let entry = self.entry_point.map(|(e, _)| e);
        let mut entry_evicted = false;
        for (id, doc_id) in drained {
            self.live_ids.remove(&id);
            self.doc_to_id.remove(&doc_id);
            entry_evicted |= entry == Some(id);
            if let Some(callback) = &self.eviction_callback {
                callback(&doc_id);
            }
        }
        if entry_evicted {
            self.entry_point = self
                .live_ids
                .iter()
                .filter_map(|&candidate| {
                    self.store
                        .get(&candidate)
                        .map(|n| (candidate, n.max_layer))
                })
                .max_by_key(|&(_, layer)| layer);
        }
    }

    pub fn insert(
        &mut self,
        doc_id: impl Into<String>,
        vector: Vec<f32>,
        article_type: Option<ArticleType>,
    ) -> Result<u32, HnswError> {
        if vector.len() != self.config.dimension {
            return Err(HnswError::DimensionMismatch {
                expected: self.config.dimension,
                got: vector.len(),
            });
        }
        self.drain_evictions();
        let doc_id = doc_id.into();
        if let Some(&existing) = self.doc_to_id.get(&doc_id) {
            self.remove_id(existing);
        }

        let id = self.next_id;
        self.next_id += 1;
        let level = self.random_layer();
        let mut node = HnswNode {
            id,
            doc_id: doc_id.clone(),
            vector,
            article_type,
            connections: vec![Vec::new(); level as usize + 1],
            max_layer: level,
        };

        let Some((entry_id, entry_layer)) = self.entry_point else {
            self.store.insert(id, node);
            self.live_ids.insert(id);
            self.doc_to_id.insert(doc_id, id);
            self.entry_point = Some((id, level));
            return Ok(id);
        };

        // Greedy descent through the layers above the node's level.
        let mut current = entry_id;
        for layer in ((level + 1)..=entry_layer).rev() {
            current = self.greedy_closest(&node.vector, current, layer);
        }

        // The half-built node becomes resident before any linking: a
        // neighbor pushed past its degree cap ranks prune candidates by
        // vector, and the new id must compete like any other resident.
        // Nothing references the new id at the layers still being
        // searched, so it cannot select itself. The final adjacency
        // overwrites this copy below.
        self.store.insert(id, node.clone());

        // Beam search and diverse neighbor selection on the shared layers.
        for layer in (0..=level.min(entry_layer)).rev() {
            let candidates =
                self.search_layer(&node.vector, &[current], self.config.ef_construction, layer);
            let selected = self.select_neighbors(&node.vector, &candidates, self.config.m);
            for &neighbor_id in &selected {
                self.link(neighbor_id, id, layer);
            }
            if let Some(&closest) = selected.first() {
                current = closest;
            }
            node.connections[layer as usize] = selected;
        }

        self.store.insert(id, node);
        self.live_ids.insert(id);
        self.doc_to_id.insert(doc_id, id);
        if level > entry_layer {
            self.entry_point = Some((id, level));
        }
        Ok(id)
    }

    /// Add `new_id` to `neighbor_id`'s adjacency at `layer`, pruning the
    /// neighbor back to `2m` with the diversity heuristic when needed.
    fn link(&mut self, neighbor_id: u32, new_id: u32, layer: u8) {
        let Some(mut neighbor) = self.store.get(&neighbor_id) else {
            return;
        };
        if neighbor.connections.len() <= layer as usize {
            return;
        }
        if !neighbor.connections[layer as usize].contains(&new_id) {
            neighbor.connections[layer as usize].push(new_id);
        }
        let max_degree = 2 * self.config.m;
        if neighbor.connections[layer as usize].len() > max_degree {
            let candidates: Vec<Candidate> = neighbor.connections[layer as usize]
                .iter()
                .filter_map(|&id| {
                    self.store.get(&id).map(|n| Candidate {
                        distance: self.distance(&neighbor.vector, &n.vector),
                        id,
                    })
                })
                .collect();
            let mut sorted = candidates;
            sorted.sort();
            let pruned = self.select_neighbors(&neighbor.vector, &sorted, max_degree);
            neighbor.connections[layer as usize] = pruned;
        }
        self.store.insert(neighbor_id, neighbor);
    }

    /// Move greedily toward the query until no neighbor at `layer` is
    /// closer. Missing (evicted) neighbors are dead ends.
    fn greedy_closest(&self, query: &[f32], start: u32, layer: u8) -> u32 {
        let mut current = start;
        let Some(mut current_distance) = self
            .store
            .get(&current)
            .map(|n| self.distance(query, &n.vector))
        else {
            return current;
        };
        loop {
            let Some(node) = self.store.get(&current) else {
                return current;
            };
            let neighbors = match node.connections.get(layer as usize) {
                Some(list) => list.clone(),
                None => return current,
            };
            let mut improved = false;
            for neighbor_id in neighbors {
                if let Some(neighbor) = self.store.get(&neighbor_id) {
                    let distance = self.distance(query, &neighbor.vector);
                    if distance < current_distance {
                        current = neighbor_id;
                        current_distance = distance;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search at one layer. Returns up to `ef` candidates sorted by
    /// ascending distance.
    fn search_layer(&self, query: &[f32], entries: &[u32], ef: usize, layer: u8) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        // Min-heap of frontier candidates via reversed ordering.
        let mut frontier: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();
        // Max-heap of the best `ef` results; the root is the worst kept.
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &entry in entries {
            if !visited.insert(entry) {
                continue;
            }
            if let Some(node) = self.store.get(&entry) {
                let distance = self.distance(query, &node.vector);
                frontier.push(std::cmp::Reverse(Candidate { distance, id: entry }));
                results.push(Candidate { distance, id: entry });
            }
        }

        while let Some(std::cmp::Reverse(candidate)) = frontier.pop() {
            let worst = results.peek().map(|c| c.distance).unwrap_or(f32::INFINITY);
            if results.len() >= ef && candidate.distance > worst {
                break;
            }
            let Some(node) = self.store.get(&candidate.id) else {
                continue;
            };
            let Some(neighbors) = node.connections.get(layer as usize) else {
                continue;
            };
            for &neighbor_id in neighbors {
                if !visited.insert(neighbor_id) {
                    continue;
                }
                let Some(neighbor) = self.store.get(&neighbor_id) else {
                    continue;
                };
                let distance = self.distance(query, &neighbor.vector);
                let worst = results.peek().map(|c| c.distance).unwrap_or(f32::INFINITY);
                if results.len() < ef || distance < worst {
                    frontier.push(std::cmp::Reverse(Candidate {
                        distance,
                        id: neighbor_id,
                    }));
                    results.push(Candidate {
                        distance,
                        id: neighbor_id,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut sorted = results.into_vec();
        sorted.sort();
        sorted
    }

    /// Diversity heuristic: take candidates in ascending distance order,
    /// skipping any that sit closer to an already-selected neighbor than
    /// to the query.
    fn select_neighbors(&self, query: &[f32], candidates: &[Candidate], m: usize) -> Vec<u32> {
        let mut selected: Vec<(u32, Vec<f32>)> = Vec::with_capacity(m);
        for candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let Some(node) = self.store.get(&candidate.id) else {
                continue;
            };
            let diverse = selected.iter().all(|(_, chosen_vector)| {
                self.distance(&node.vector, chosen_vector) > candidate.distance
            });
            if diverse {
                selected.push((candidate.id, node.vector));
            }
        }
        selected.into_iter().map(|(id, _)| id).collect()
    }

    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchMatch>, HnswError> {
        if query.len() != self.config.dimension {
            return Err(HnswError::DimensionMismatch {
                expected: self.config.dimension,
                got: query.len(),
            });
        }
        let Some((entry_id, entry_layer)) = self.entry_point else {
            return Ok(Vec::new());
        };
        let ef = options.ef_search.unwrap_or(self.config.ef_search).max(k);
        let mut current = entry_id;
        for layer in (1..=entry_layer).rev() {
            current = self.greedy_closest(query, current, layer);
        }
        let candidates = self.search_layer(query, &[current], ef, 0);
        Ok(self.rank(query, candidates.iter().map(|c| c.id), k, options))
    }

    /// Hybrid search against an externally-supplied candidate set.
    pub fn search_hybrid(
        &self,
        query: &[f32],
        k: usize,
        candidates: &HashSet<String>,
        strategy: HybridStrategy,
        options: &SearchOptions,
    ) -> Result<Vec<SearchMatch>, HnswError> {
        let strategy = match strategy {
            HybridStrategy::Auto => {
                let selectivity = candidates.len() as f64 / self.len().max(1) as f64;
                if candidates.len() < 2 * k || selectivity < 0.3 {
                    HybridStrategy::PreFilter
                } else {
                    HybridStrategy::PostFilter
                }
            }
            other => other,
        };
        match strategy {
            HybridStrategy::PreFilter => {
                // Brute-force over the candidate set only.
                let ids = candidates.iter().filter_map(|doc| self.doc_to_id.get(doc));
                Ok(self.rank(query, ids.copied().collect::<Vec<_>>(), k, options))
            }
            HybridStrategy::PostFilter => {
                let overfetched = self.search(query, k * POST_FILTER_MULTIPLIER, options)?;
                Ok(overfetched
                    .into_iter()
                    .filter(|m| candidates.contains(&m.doc_id))
                    .take(k)
                    .collect())
            }
            HybridStrategy::Auto => unreachable!("auto resolved above"),
        }
    }

    fn rank(
        &self,
        query: &[f32],
        ids: impl IntoIterator<Item = u32>,
        k: usize,
        options: &SearchOptions,
    ) -> Vec<SearchMatch> {
        let mut matches: Vec<(f32, SearchMatch)> = ids
            .into_iter()
            .filter_map(|id| self.store.get(&id))
            .filter(|node| match options.article_type {
                Some(wanted) => node.article_type == Some(wanted),
                None => true,
            })
            .map(|node| {
                let distance = self.distance(query, &node.vector);
                let score = self.config.distance_function.score(distance);
                (
                    distance,
                    SearchMatch {
                        doc_id: node.doc_id,
                        score,
                        article_type: node.article_type,
                    },
                )
            })
            .filter(|(_, m)| options.min_score.map(|min| m.score >= min).unwrap_or(true))
            .collect();
        matches.sort_by(|a, b| a.0.total_cmp(&b.0));
        matches.into_iter().take(k).map(|(_, m)| m).collect()
    }

    pub fn delete(&mut self, doc_id: &str) -> Result<(), HnswError> {
        self.drain_evictions();
        let Some(&id) = self.doc_to_id.get(doc_id) else {
            return Err(HnswError::DocNotFound(doc_id.to_string()));
        };
        self.remove_id(id);
        Ok(())
    }

    /// Scrub `id` from every resident adjacency list, drop the node, and
    /// re-seat the entry point if it was the deleted node.
    fn remove_id(&mut self, id: u32) {
        let doc_id = self.store.get(&id).map(|n| n.doc_id);
        let others: Vec<u32> = self.live_ids.iter().copied().filter(|&o| o != id).collect();
        for other_id in others {
            let Some(mut other) = self.store.get(&other_id) else {
                continue;
            };
            let mut touched = false;
            for list in &mut other.connections {
                if let Some(pos) = list.iter().position(|&n| n == id) {
                    list.remove(pos);
                    touched = true;
                }
            }
            if touched {
                self.store.insert(other_id, other);
            }
        }
        self.store.remove(&id);
        self.live_ids.remove(&id);
        if let Some(doc_id) = doc_id {
            self.doc_to_id.remove(&doc_id);
        } else {
            self.doc_to_id.retain(|_, &mut v| v != id);
        }

        if self.entry_point.map(|(e, _)| e) == Some(id) {
            self.entry_point = self
                .live_ids
                .iter()
                .filter_map(|&candidate| {
                    self.store
                        .get(&candidate)
                        .map(|n| (candidate, n.max_layer))
                })
                .max_by_key(|&(_, layer)| layer);
        }
    }

    /// Every adjacency entry of every resident node, for integrity checks.
    pub fn referenced_ids(&self) -> HashSet<u32> {
        let mut referenced = HashSet::new();
        for &id in &self.live_ids {
            if let Some(node) = self.store.get(&id) {
                for list in &node.connections {
                    referenced.extend(list.iter().copied());
                }
            }
        }
        referenced
    }
}
