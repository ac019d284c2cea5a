//! HNSW graph over the index vectors (cosine distance).
use hnsw_rs::prelude::*;

const MAX_NB_CONNECTION: usize = 24;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 64;
const DEFAULT_MAX_ELEMENTS: usize = 100_000;
/// Up to this many points the search beam covers the whole graph.
const FULL_BEAM_LIMIT: usize = 1024;

pub(crate) struct AnnGraph {
    hnsw: Hnsw<'static, f32, DistCosine>,
    len: usize,
}

// SAFETY: the graph owns all of its data (built with `Hnsw::new`, never loaded
// from borrowed files) and hnsw_rs guards its internals with locks.
unsafe impl Send for AnnGraph {}
unsafe impl Sync for AnnGraph {}

impl AnnGraph {
    pub(crate) fn new(expected: usize) -> Self {
        let hnsw = Hnsw::<f32, DistCosine>::new(
            MAX_NB_CONNECTION,
            expected.max(DEFAULT_MAX_ELEMENTS),
            MAX_LAYER,
            EF_CONSTRUCTION,
            DistCosine,
        );
        Self { hnsw, len: 0 }
    }

    /// Insert `vector` under data id `id` (the record's position).
    pub(crate) fn insert(&mut self, id: usize, vector: &[f32]) {
        self.hnsw.insert_slice((vector, id));
        self.len += 1;
    }

    pub(crate) fn len(&self) -> usize { self.len }

    /// Up to `k` `(id, distance)` pairs by ascending distance, ties by id.
    pub(crate) fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || self.len == 0 {
            return Vec::new();
        }
        let ef = EF_SEARCH.max(k * 2).max(self.len.min(FULL_BEAM_LIMIT));
        // take the whole beam so equal distances are cut by id, not by graph order
        let wanted = ef.min(self.len).max(k);
        let mut results: Vec<(usize, f32)> = self
            .hnsw
            .search(query, wanted, ef)
            .into_iter()
            .map(|n| (n.d_id, n.distance))
            .collect();
        results.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        results.truncate(k);
        results
    }
}
