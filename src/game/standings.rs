//! Final standings from ownership counts

use crate::store::OwnershipCount;
use crate::ws::protocol::StandingEntry;

/// Rank players by descending tile count.
///
/// The sort is stable: players with equal counts keep the store's scan
/// order. Ranks are sequential (1, 2, 3, ...) even across ties.
pub fn rank(counts: Vec<OwnershipCount>) -> Vec<StandingEntry> {
    let mut counts = counts;
    counts.sort_by(|a, b| b.count.cmp(&a.count));

    counts
        .into_iter()
        .enumerate()
        .map(|(i, c)| StandingEntry {
            user_id: c.player.id,
            name: c.player.name,
            color: c.player.color,
            count: c.count,
            rank: i as u32 + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Player;

    fn count(id: &str, count: usize) -> OwnershipCount {
        OwnershipCount {
            player: Player {
                id: id.to_string(),
                name: id.to_uppercase(),
                color: "#123456".to_string(),
            },
            count,
        }
    }

    #[test]
    fn sorts_descending_and_keeps_scan_order_on_ties() {
        let ranked = rank(vec![
            count("a", 1),
            count("b", 5),
            count("c", 0),
            count("d", 1),
        ]);

        let order: Vec<(&str, usize, u32)> = ranked
            .iter()
            .map(|e| (e.user_id.as_str(), e.count, e.rank))
            .collect();
        assert_eq!(
            order,
            vec![("b", 5, 1), ("a", 1, 2), ("d", 1, 3), ("c", 0, 4)]
        );
        assert_eq!(ranked[0].name, "B");
    }

    #[test]
    fn empty_input_gives_empty_standings() {
        assert!(rank(Vec::new()).is_empty());
    }
}
