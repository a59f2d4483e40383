//! Descriptor matching with Lowe's ratio test.


use rayon::prelude::*;

use super::config::MatchConfig;
use super::features::{FeatureSet, descriptor_distance};

/// One accepted pairing between a reference and a candidate feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub reference_index: usize,
    pub candidate_index: usize,
    /// Descriptor distance; smaller is better.
    pub distance: f32,
}

/// Correspondences for one (reference, candidate) pair, ordered by candidate index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchSet {
    matches: Vec<Correspondence>,
}

impl MatchSet {
    #[inline]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Correspondence] {
        &self.matches
    }

    pub fn iter(&self) -> impl Iterator<Item = &Correspondence> {
        self.matches.iter()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Matcher {
    config: MatchConfig,
}

impl Matcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    /// Matches every candidate feature against the reference set.
    ///
    /// A candidate is kept when its nearest reference descriptor is within
    /// `max_distance` and closer than `ratio` times the second nearest. Each
    /// reference feature ends up in at most one correspondence.
    pub fn match_features(&self, reference: &FeatureSet, candidate: &FeatureSet) -> MatchSet {
        if reference.is_empty() || candidate.is_empty() {
            return MatchSet::default();
        }
        if reference.descriptor_len() != candidate.descriptor_len() {
            tracing::warn!(
                reference = reference.descriptor_len(),
                candidate = candidate.descriptor_len(),
                "descriptor lengths differ, nothing to match"
            );
            return MatchSet::default();
        }

        let accepted: Vec<Option<Correspondence>> = (0..candidate.len())
            .into_par_iter()
            .map(|ci| self.best_match(reference, candidate.descriptor(ci), ci))
            .collect();

        // Keep one correspondence per reference feature: smallest distance,
        // then lowest candidate index.
        let mut by_reference: Vec<Option<Correspondence>> = vec![None; reference.len()];
        for c in accepted.into_iter().flatten() {
            let slot = &mut by_reference[c.reference_index];
            match slot {
                Some(existing) if existing.distance <= c.distance => {}
                _ => *slot = Some(c),
            }
        }

        let mut matches: Vec<Correspondence> = by_reference.into_iter().flatten().collect();
        matches.sort_by_key(|c| c.candidate_index);

        tracing::debug!(
            reference = reference.len(),
            candidate = candidate.len(),
            matches = matches.len(),
            "matched features"
        );
        MatchSet { matches }
    }

    fn best_match(
        &self,
        reference: &FeatureSet,
        descriptor: &[f32],
        candidate_index: usize,
    ) -> Option<Correspondence> {
        let (distance, reference_index, second) = nearest_two(reference, descriptor);
        if distance > self.config.max_distance {
            return None;
        }
        if second.is_finite() && distance >= self.config.ratio * second {
            return None;
        }
        Some(Correspondence {
            reference_index,
            candidate_index,
            distance,
        })
    }
}

/// Nearest distance, its reference index and the second-nearest distance.
/// Strict comparison keeps the lower reference index on ties.
fn nearest_two(reference: &FeatureSet, descriptor: &[f32]) -> (f32, usize, f32) {
    let mut nearest = (f32::INFINITY, usize::MAX);
    let mut second = f32::INFINITY;
    for ri in 0..reference.len() {
        let d = descriptor_distance(reference.descriptor(ri), descriptor);
        if d < nearest.0 {
            second = nearest.0;
            nearest = (d, ri);
        } else if d < second {
            second = d;
        }
    }
    (nearest.0, nearest.1, second)
}
