//! Segment aliasing.
//!
//! Some segments have no depth feed of their own and mirror another segment's
//! book: margin and cross-margin trade against the spot book. Every snapshot
//! install and diff applied to a nominal segment is replicated into each
//! enabled alias.

use crate::types::Segment;

/// Nominal segment -> segments that mirror its book
const ALIASES: &[(Segment, &[Segment])] = &[(Segment::Spot, &[Segment::Margin, Segment::CrossMargin])];

/// Alias segments mirroring `segment`, enabled or not
pub fn aliases_of(segment: Segment) -> &'static [Segment] {
    ALIASES
        .iter()
        .find(|(nominal, _)| *nominal == segment)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

/// The nominal segment followed by every alias present in `enabled`.
pub fn fan_out(segment: Segment, enabled: &[Segment]) -> impl Iterator<Item = Segment> + '_ {
    std::iter::once(segment).chain(
        aliases_of(segment)
            .iter()
            .copied()
            .filter(move |alias| enabled.contains(alias)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_fans_out_to_enabled_aliases() {
        let enabled = [Segment::Spot, Segment::CrossMargin];
        let targets: Vec<_> = fan_out(Segment::Spot, &enabled).collect();
        assert_eq!(targets, vec![Segment::Spot, Segment::CrossMargin]);

        let enabled = [Segment::Spot, Segment::Margin, Segment::CrossMargin];
        let targets: Vec<_> = fan_out(Segment::Spot, &enabled).collect();
        assert_eq!(
            targets,
            vec![Segment::Spot, Segment::Margin, Segment::CrossMargin]
        );
    }

    #[test]
    fn test_no_aliases_without_enablement() {
        let targets: Vec<_> = fan_out(Segment::Spot, &[Segment::Spot]).collect();
        assert_eq!(targets, vec![Segment::Spot]);
    }

    #[test]
    fn test_futures_never_alias() {
        assert!(aliases_of(Segment::LinearFutures).is_empty());
        let all = Segment::ALL;
        let targets: Vec<_> = fan_out(Segment::InverseFutures, &all).collect();
        assert_eq!(targets, vec![Segment::InverseFutures]);
    }

    #[test]
    fn test_alias_is_not_nominal() {
        assert!(aliases_of(Segment::Margin).is_empty());
    }
}
