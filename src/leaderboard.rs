//! Leaderboard ranking over a stats snapshot.

use crate::stats::RarityCounts;

/// How many users the leaderboard shows.
pub const LEADERBOARD_SIZE: usize = 10;

/// Order users by mythic, then legendary, epic, rare and common counts, all
/// descending, and keep the top [`LEADERBOARD_SIZE`].
///
/// The sort is stable: users with identical counters keep their snapshot
/// order.
pub fn rank<I>(snapshot: I) -> Vec<(String, RarityCounts)>
where
    I: IntoIterator<Item = (String, RarityCounts)>,
{
    let mut ranked: Vec<(String, RarityCounts)> = snapshot.into_iter().collect();
    ranked.sort_by(|(_, a), (_, b)| b.rank_key().cmp(&a.rank_key()));
    ranked.truncate(LEADERBOARD_SIZE);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mythic(n: u64) -> RarityCounts {
        RarityCounts {
            mythic: n,
            ..Default::default()
        }
    }

    #[test]
    fn higher_mythic_ranks_first() {
        let ranked = rank(vec![("A".to_string(), mythic(1)), ("B".to_string(), mythic(2))]);
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    #[test]
    fn rarer_tier_beats_many_common() {
        let lots_of_common = RarityCounts {
            common: 500,
            rare: 40,
            epic: 10,
            ..Default::default()
        };
        let one_legendary = RarityCounts {
            legendary: 1,
            ..Default::default()
        };
        let ranked = rank(vec![
            ("grinder".to_string(), lots_of_common),
            ("lucky".to_string(), one_legendary),
        ]);
        assert_eq!(ranked[0].0, "lucky");
    }

    #[test]
    fn ties_keep_snapshot_order() {
        let same = RarityCounts {
            epic: 1,
            rare: 2,
            ..Default::default()
        };
        let ranked = rank(vec![
            ("first".to_string(), same),
            ("top".to_string(), mythic(1)),
            ("second".to_string(), same),
            ("third".to_string(), same),
        ]);
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["top", "first", "second", "third"]);
    }

    #[test]
    fn truncates_to_ten() {
        let snapshot: Vec<_> = (0..15).map(|i| (format!("u{i}"), mythic(i))).collect();
        let ranked = rank(snapshot);
        assert_eq!(ranked.len(), LEADERBOARD_SIZE);
        assert_eq!(ranked[0].0, "u14");
        assert_eq!(ranked[9].0, "u5");
    }

    #[test]
    fn empty_snapshot_ranks_empty() {
        assert!(rank(Vec::new()).is_empty());
    }
}
