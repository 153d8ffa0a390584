//! Successor selection for released resources.
//!
//! When an owner with subscribers gives a resource back, its super owner
//! appoints one of those subscribers as the new owner. Which one is a
//! pluggable policy; any matching closure works.

use holdfast_types::config::TransferPolicyKind;
use holdfast_types::peer::PeerId;
use holdfast_wire::ResourcePath;

/// Picks the next owner of `resource` among `candidates`.
///
/// Candidates arrive in the order the departing owner registered them and
/// never include the departing owner. Returning `None` or a peer outside
/// the candidate list falls back to the first candidate.
pub trait TransferPolicy: Send {
    fn select(&self, resource: &ResourcePath, candidates: &[PeerId]) -> Option<PeerId>;
}

impl<F> TransferPolicy for F
where
    F: Fn(&ResourcePath, &[PeerId]) -> Option<PeerId> + Send,
{
    fn select(&self, resource: &ResourcePath, candidates: &[PeerId]) -> Option<PeerId> {
        self(resource, candidates)
    }
}

pub fn first_registered(_resource: &ResourcePath, candidates: &[PeerId]) -> Option<PeerId> {
    candidates.first().copied()
}

pub fn lowest_peer_id(_resource: &ResourcePath, candidates: &[PeerId]) -> Option<PeerId> {
    candidates.iter().min().copied()
}

/// The built-in policy named in configuration.
pub fn from_kind(kind: TransferPolicyKind) -> Box<dyn TransferPolicy> {
    match kind {
        TransferPolicyKind::FirstRegistered => Box::new(first_registered),
        TransferPolicyKind::LowestPeerId => Box::new(lowest_peer_id),
    }
}

/// Apply `policy`, falling back to the first candidate when it declines or
/// names a peer that is not a candidate.
pub(crate) fn choose(
    policy: &dyn TransferPolicy,
    resource: &ResourcePath,
    candidates: &[PeerId],
) -> Option<PeerId> {
    match policy.select(resource, candidates) {
        Some(peer) if candidates.contains(&peer) => Some(peer),
        _ => candidates.first().copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> ResourcePath {
        ResourcePath::root("lobby").child("SU")
    }

    #[test]
    fn test_builtin_policies() {
        let candidates = [PeerId(9), PeerId(3), PeerId(5)];
        let first = from_kind(TransferPolicyKind::FirstRegistered);
        let lowest = from_kind(TransferPolicyKind::LowestPeerId);
        assert_eq!(first.select(&world(), &candidates), Some(PeerId(9)));
        assert_eq!(lowest.select(&world(), &candidates), Some(PeerId(3)));
        assert_eq!(first.select(&world(), &[]), None);
    }

    #[test]
    fn test_closure_policy() {
        let last = |_: &ResourcePath, candidates: &[PeerId]| candidates.last().copied();
        assert_eq!(
            choose(&last, &world(), &[PeerId(1), PeerId(2)]),
            Some(PeerId(2))
        );
    }

    #[test]
    fn test_choose_rejects_non_candidates() {
        let rogue = |_: &ResourcePath, _: &[PeerId]| Some(PeerId(42));
        assert_eq!(
            choose(&rogue, &world(), &[PeerId(7), PeerId(8)]),
            Some(PeerId(7))
        );
        let declines = |_: &ResourcePath, _: &[PeerId]| -> Option<PeerId> { None };
        assert_eq!(choose(&declines, &world(), &[PeerId(7)]), Some(PeerId(7)));
        assert_eq!(choose(&declines, &world(), &[]), None);
    }
}
