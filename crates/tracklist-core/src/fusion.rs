//! Result fusion for hybrid search.
//!
//! Two strategies merge independently ranked lists (lexical first, dense
//! second) into one ranking:
//!
//! - [`WeightedFusion`]: linear per-list weights on the raw scores. BM25 scores
//!   are unbounded and inner products sit roughly in [-1, 1], so the weights are
//!   a manual calibration knob, not a normalization.
//! - [`RrfFusion`]: reciprocal rank fusion, `1 / (k + rank)`, which ignores raw
//!   scores entirely.
//!
//! Items with exactly equal fused scores keep first-seen order across the
//! input lists (stable sort).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracklistError};

pub const WEIGHTED: &str = "weighted";
pub const RRF: &str = "rrf";

pub const DEFAULT_SPARSE_WEIGHT: f64 = 0.3;
pub const DEFAULT_DENSE_WEIGHT: f64 = 0.7;
pub const DEFAULT_RRF_K: f64 = 60.0;

/// One entry of a ranked list: record id and its score in that list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RankedHit {
    pub id: i64,
    pub score: f64,
}

impl RankedHit {
    pub fn new(id: i64, score: f64) -> Self {
        Self { id, score }
    }
}

/// Merge several best-first ranked lists into one best-first list.
pub trait Fusion: Send + Sync {
    fn name(&self) -> &'static str;

    /// `lists` are ordered like the sub-requests that produced them.
    fn fuse(&self, lists: &[&[RankedHit]], limit: usize) -> Result<Vec<RankedHit>>;
}

/// Caller-tunable fusion parameters. Only the fields relevant to the chosen
/// strategy are read.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    pub sparse_weight: f64,
    pub dense_weight: f64,
    pub k: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            sparse_weight: DEFAULT_SPARSE_WEIGHT,
            dense_weight: DEFAULT_DENSE_WEIGHT,
            k: DEFAULT_RRF_K,
        }
    }
}

/// Accumulates per-id scores while remembering first-seen order.
#[derive(Default)]
struct Accumulator {
    order: Vec<RankedHit>,
    position: HashMap<i64, usize>,
}

impl Accumulator {
    fn add(&mut self, id: i64, contribution: f64) {
        match self.position.get(&id) {
            Some(&idx) => self.order[idx].score += contribution,
            None => {
                self.position.insert(id, self.order.len());
                self.order.push(RankedHit::new(id, contribution));
            }
        }
    }

    fn finish(mut self, limit: usize) -> Vec<RankedHit> {
        // sort_by is stable: equal scores keep first-seen order.
        self.order.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.order.truncate(limit);
        self.order
    }
}

// =============================================================================
// Weighted sum
// =============================================================================

/// Weighted sum of raw scores, one weight per input list.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightedFusion {
    weights: Vec<f64>,
}

impl WeightedFusion {
    /// Weights align with the input lists. Each must be finite and non-negative.
    pub fn new(weights: Vec<f64>) -> Result<Self> {
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(TracklistError::Config(format!(
                "fusion weight {} must be finite and non-negative",
                bad
            )));
        }
        Ok(Self { weights })
    }

    /// Weights for the `[lexical, dense]` request order.
    pub fn lexical_dense(sparse_weight: f64, dense_weight: f64) -> Result<Self> {
        Self::new(vec![sparse_weight, dense_weight])
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

impl Fusion for WeightedFusion {
    fn name(&self) -> &'static str {
        WEIGHTED
    }

    fn fuse(&self, lists: &[&[RankedHit]], limit: usize) -> Result<Vec<RankedHit>> {
        if lists.len() != self.weights.len() {
            return Err(TracklistError::Config(format!(
                "weighted fusion has {} weights for {} result lists",
                self.weights.len(),
                lists.len()
            )));
        }

        let mut acc = Accumulator::default();
        for (list, weight) in lists.iter().zip(&self.weights) {
            for hit in list.iter() {
                acc.add(hit.id, hit.score * weight);
            }
        }
        Ok(acc.finish(limit))
    }
}

// =============================================================================
// Reciprocal rank fusion
// =============================================================================

/// Reciprocal rank fusion: `sum over lists of 1 / (k + rank)`, rank 1-based.
#[derive(Clone, Debug, PartialEq)]
pub struct RrfFusion {
    k: f64,
}

impl RrfFusion {
    pub fn new(k: f64) -> Result<Self> {
        if !k.is_finite() || k <= 0.0 {
            return Err(TracklistError::Config(format!(
                "RRF k must be a positive number, got {}",
                k
            )));
        }
        Ok(Self { k })
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    /// Contribution of an item at 1-based `rank` in one list.
    pub fn contribution(&self, rank: usize) -> f64 {
        1.0 / (self.k + rank as f64)
    }
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self { k: DEFAULT_RRF_K }
    }
}

impl Fusion for RrfFusion {
    fn name(&self) -> &'static str {
        RRF
    }

    fn fuse(&self, lists: &[&[RankedHit]], limit: usize) -> Result<Vec<RankedHit>> {
        let mut acc = Accumulator::default();
        for list in lists {
            for (idx, hit) in list.iter().enumerate() {
                acc.add(hit.id, self.contribution(idx + 1));
            }
        }
        Ok(acc.finish(limit))
    }
}

// =============================================================================
// Selection by name
// =============================================================================

/// A fusion strategy chosen by name.
#[derive(Clone, Debug, PartialEq)]
pub enum FusionStrategy {
    Weighted(WeightedFusion),
    Rrf(RrfFusion),
}

impl FusionStrategy {
    /// Resolve `name` (case-insensitive) with `params`.
    ///
    /// Unknown names fail with `UnsupportedStrategy`.
    pub fn from_name(name: &str, params: &FusionParams) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            WEIGHTED => Ok(FusionStrategy::Weighted(WeightedFusion::lexical_dense(
                params.sparse_weight,
                params.dense_weight,
            )?)),
            RRF => Ok(FusionStrategy::Rrf(RrfFusion::new(params.k)?)),
            _ => Err(TracklistError::UnsupportedStrategy(name.to_string())),
        }
    }
}

impl Fusion for FusionStrategy {
    fn name(&self) -> &'static str {
        match self {
            FusionStrategy::Weighted(f) => f.name(),
            FusionStrategy::Rrf(f) => f.name(),
        }
    }

    fn fuse(&self, lists: &[&[RankedHit]], limit: usize) -> Result<Vec<RankedHit>> {
        match self {
            FusionStrategy::Weighted(f) => f.fuse(lists, limit),
            FusionStrategy::Rrf(f) => f.fuse(lists, limit),
        }
    }
}
