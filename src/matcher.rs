use crate::identity::Identity;
use facereg_vision::Descriptor;
use std::fmt;

/// Default largest Euclidean distance accepted as a match.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Label shown when nothing is close enough.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched { name: String, distance: f32 },
    Unknown,
}

impl MatchOutcome {
    pub fn name(&self) -> Option<&str> {
        match self {
            MatchOutcome::Matched { name, .. } => Some(name),
            MatchOutcome::Unknown => None,
        }
    }
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or(UNKNOWN_LABEL))
    }
}

/// Index and distance of the nearest candidate. The first of several equally
/// near candidates wins. Candidates of a different dimensionality are skipped.
pub fn nearest(query: &Descriptor, candidates: &[Identity]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let Some(distance) = query.distance(&candidate.descriptor) else {
            log::warn!(
                "skipping {}: descriptor has {} dimensions, query has {}",
                candidate.name,
                candidate.descriptor.len(),
                query.len()
            );
            continue;
        };
        if !distance.is_finite() {
            log::warn!("skipping {}: distance is not finite", candidate.name);
            continue;
        }
        match best {
            Some((_, d)) if d <= distance => {}
            _ => best = Some((i, distance)),
        }
    }
    best
}

/// Match `query` against `candidates`; anything farther than `threshold` is
/// unknown.
pub fn match_descriptor(
    query: &Descriptor,
    candidates: &[Identity],
    threshold: f32,
) -> MatchOutcome {
    if candidates.is_empty() {
        return MatchOutcome::Unknown;
    }
    match nearest(query, candidates) {
        Some((idx, distance)) if distance <= threshold => {
            log::debug!(
                "nearest identity {} at {:.3} (threshold {:.3})",
                candidates[idx].name,
                distance,
                threshold
            );
            MatchOutcome::Matched {
                name: candidates[idx].name.clone(),
                distance,
            }
        }
        Some((_, distance)) => {
            log::debug!("nearest distance {:.3} above threshold {:.3}", distance, threshold);
            MatchOutcome::Unknown
        }
        None => MatchOutcome::Unknown,
    }
}
