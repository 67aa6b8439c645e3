//! Multi-tier similarity matcher feeding pack delta selection.
//!
//! Pairwise Levenshtein over every object would be O(n²) in the expensive
//! metric; instead each candidate pair runs through three tiers, cheapest
//! first:
//!
//! 1. length ratio — skip when `|len(a) − len(b)| / max(len) > τ₁`;
//! 2. 64-bit SimHash over token shingles — skip when Hamming distance > τ₂;
//! 3. normalized edit similarity `1 − lev(a, b) / max(len)` — keep when ≥ τ₃.
//!
//! For each object the accepted match with the smallest edit distance
//! becomes its delta base candidate, ties broken by the smaller hash. Only
//! one hop is formed: a chosen base is never itself deltified.

use std::collections::{HashMap, HashSet};
use std::hash::Hasher;

use ahash::AHasher;
use rayon::prelude::*;
use tracing::debug;

use crate::config::SimilarityConfig;
use crate::hash::ObjectHash;

/// Tokens per shingle for the SimHash feature set.
const SHINGLE_TOKENS: usize = 3;

/// 64-bit SimHash over token shingles. Whitespace-separated tokens are
/// grouped into overlapping triples; each shingle votes its hash bits into
/// a weight vector whose signs form the fingerprint.
pub fn simhash(data: &[u8]) -> u64 {
    let tokens: Vec<&[u8]> = data
        .split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    let mut weights = [0i64; 64];

    let mut vote = |shingle: &[&[u8]]| {
        let mut hasher = AHasher::default();
        for token in shingle {
            hasher.write(token);
            hasher.write_u8(0);
        }
        let h = hasher.finish();
        for (bit, weight) in weights.iter_mut().enumerate() {
            if h >> bit & 1 == 1 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    };

    if tokens.len() < SHINGLE_TOKENS {
        if !tokens.is_empty() {
            vote(&tokens);
        }
    } else {
        for shingle in tokens.windows(SHINGLE_TOKENS) {
            vote(shingle);
        }
    }

    let mut fingerprint = 0u64;
    for (bit, weight) in weights.iter().enumerate() {
        if *weight > 0 {
            fingerprint |= 1 << bit;
        }
    }
    fingerprint
}

/// Levenshtein distance, two-row DP.
pub fn edit_distance(a: &[u8], b: &[u8]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// One candidate object: identity, payload, and precomputed fingerprint.
struct Candidate<'a> {
    hash: ObjectHash,
    data: &'a [u8],
    simhash: u64,
}

/// An accepted pairing produced by the tier cascade.
#[derive(Debug, Clone, Copy)]
struct Accepted {
    base: ObjectHash,
    distance: usize,
}

/// Multi-tier matcher configured from `similarity.{tau1,tau2,tau3}`.
pub struct SimilarityMatcher {
    tau1: f64,
    tau2: u32,
    tau3: f64,
}

impl SimilarityMatcher {
    pub fn new(config: &SimilarityConfig) -> SimilarityMatcher {
        SimilarityMatcher {
            tau1: config.tau1,
            tau2: config.tau2,
            tau3: config.tau3,
        }
    }

    /// Run the cascade on one pair; `Some(distance)` when all tiers pass.
    fn accept(&self, a: &Candidate, b: &Candidate) -> Option<usize> {
        let max_len = a.data.len().max(b.data.len());
        if max_len == 0 {
            return None;
        }
        let diff = a.data.len().abs_diff(b.data.len());
        if diff as f64 / max_len as f64 > self.tau1 {
            return None;
        }
        if (a.simhash ^ b.simhash).count_ones() > self.tau2 {
            return None;
        }
        let distance = edit_distance(a.data, b.data);
        let similarity = 1.0 - distance as f64 / max_len as f64;
        (similarity >= self.tau3).then_some(distance)
    }

    /// Select one delta base candidate per object. The scan over objects
    /// fans out across worker threads; the single-hop constraint is applied
    /// in a deterministic sequential pass afterwards.
    pub fn build_groups(
        &self,
        objects: &[(ObjectHash, Vec<u8>)],
    ) -> HashMap<ObjectHash, ObjectHash> {
        if objects.len() < 2 {
            return HashMap::new();
        }
        let candidates: Vec<Candidate> = objects
            .iter()
            .map(|(hash, data)| Candidate {
                hash: *hash,
                data,
                simhash: simhash(data),
            })
            .collect();

        let best: Vec<(ObjectHash, Accepted)> = candidates
            .par_iter()
            .filter_map(|target| {
                let mut best: Option<Accepted> = None;
                for other in &candidates {
                    if other.hash == target.hash {
                        continue;
                    }
                    if let Some(distance) = self.accept(target, other) {
                        let better = match best {
                            None => true,
                            Some(current) => {
                                distance < current.distance
                                    || (distance == current.distance && other.hash < current.base)
                            }
                        };
                        if better {
                            best = Some(Accepted {
                                base: other.hash,
                                distance,
                            });
                        }
                    }
                }
                best.map(|accepted| (target.hash, accepted))
            })
            .collect();

        // One hop only: a kept base stays FULL, processed in hash order so
        // the outcome is independent of thread scheduling.
        let mut ranked = best;
        ranked.sort_by(|a, b| a.0.cmp(&b.0));
        let mut groups = HashMap::new();
        let mut deltified: HashSet<ObjectHash> = HashSet::new();
        let mut used_as_base: HashSet<ObjectHash> = HashSet::new();
        for (target, accepted) in ranked {
            if deltified.contains(&accepted.base) || used_as_base.contains(&target) {
                continue;
            }
            groups.insert(target, accepted.base);
            deltified.insert(target);
            used_as_base.insert(accepted.base);
        }
        debug!(objects = objects.len(), pairs = groups.len(), "similarity groups built");
        groups
    }
}
