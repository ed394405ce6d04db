//! Weighted blessing table and the reward draw.
//!
//! A draw happens in two steps: first a fixed-odds roll decides whether the
//! user gets the [`BadOutcome`], then a cumulative-sum walk over the
//! [`Blessing`] table picks a rarity. The walk never comes back empty: if the
//! table's probabilities fall short of 1.0 the last (rarest) tier wins.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Probability of drawing the bad outcome, checked before any blessing.
pub const BAD_OUTCOME_CHANCE: f64 = 0.10;

/// How far the probability sum may drift from 1.0 before we call the table
/// misconfigured.
pub const PROBABILITY_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Rarity
// ---------------------------------------------------------------------------

/// Blessing tiers, from most to least common.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
    Mythic,
}

impl Rarity {
    /// All tiers in declaration order.
    pub const ALL: [Rarity; 5] = [
        Rarity::Common,
        Rarity::Rare,
        Rarity::Epic,
        Rarity::Legendary,
        Rarity::Mythic,
    ];

    /// Lowercase key used in the stats file.
    pub fn as_str(self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
            Rarity::Mythic => "mythic",
        }
    }

    /// Capitalised name for display.
    pub fn label(self) -> &'static str {
        match self {
            Rarity::Common => "Common",
            Rarity::Rare => "Rare",
            Rarity::Epic => "Epic",
            Rarity::Legendary => "Legendary",
            Rarity::Mythic => "Mythic",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Table entries
// ---------------------------------------------------------------------------

/// One weighted tier of the blessing table.
#[derive(Debug, Clone, PartialEq)]
pub struct Blessing {
    pub rarity: Rarity,
    pub probability: f64,
    /// RGB embed colour.
    pub color: u32,
    pub text: String,
    /// Image path, relative to the configured image directory.
    pub image: String,
}

impl Blessing {
    pub fn new(
        rarity: Rarity,
        probability: f64,
        color: u32,
        text: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            rarity,
            probability,
            color,
            text: text.into(),
            image: image.into(),
        }
    }
}

/// The un-ranked misfortune result. Never recorded in the stats.
#[derive(Debug, Clone, PartialEq)]
pub struct BadOutcome {
    pub text: String,
    pub image: String,
    pub color: u32,
}

impl Default for BadOutcome {
    fn default() -> Self {
        Self {
            text: "Alas, Myra's mischief has befallen you. Beware the shadows and misfortune \
                   lurking ahead."
                .to_string(),
            image: "images/badluck.jpg".to_string(),
            color: 0x95A5A6,
        }
    }
}

/// Result of a single draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome<'a> {
    Bad(&'a BadOutcome),
    Blessing(&'a Blessing),
}

/// The stock table: common through mythic, summing to 1.0.
pub fn default_blessings() -> Vec<Blessing> {
    vec![
        Blessing::new(
            Rarity::Common,
            0.45,
            0x2ECC71,
            "Myra shines her radiant gaze upon you; your tavern ticket pulls are destined to \
             reveal mightier heroes. Epic energies surge through this blessing!",
            "images/Blessings1.jpg",
        ),
        Blessing::new(
            Rarity::Rare,
            0.33,
            0x3498DB,
            "You have been blessed — the treasures within your gold chests now gleam with \
             greater fortune.",
            "images/Blessings2.jpg",
        ),
        Blessing::new(
            Rarity::Epic,
            0.14,
            0x9B59B6,
            "You have earned Myra's favor; your next summon holds the promise of exceptional \
             fortune.",
            "images/Blessings3.jpg",
        ),
        Blessing::new(
            Rarity::Legendary,
            0.06,
            0xF1C40F,
            "The legendary blessing of Myra surrounds you; may your journey be extraordinary!",
            "images/Blessings3.jpg",
        ),
        Blessing::new(
            Rarity::Mythic,
            0.02,
            0xE74C3C,
            "A mythic blessing descends upon you, a rare gift of immeasurable power!",
            "images/Blessings3.jpg",
        ),
    ]
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BlessingTableError {
    #[error("blessing table is empty")]
    Empty,
    #[error("blessing {rarity} has probability {value}, expected a value in (0, 1]")]
    OutOfRange { rarity: Rarity, value: f64 },
    #[error("blessing {0} appears more than once")]
    Duplicate(Rarity),
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Draws outcomes from a validated blessing table.
#[derive(Debug, Clone)]
pub struct RewardSelector {
    blessings: Vec<Blessing>,
    bad: BadOutcome,
}

impl RewardSelector {
    /// Build a selector over `blessings`.
    ///
    /// # Errors
    /// * [`BlessingTableError::Empty`] if there are no tiers.
    /// * [`BlessingTableError::OutOfRange`] if a probability is not in (0, 1].
    /// * [`BlessingTableError::Duplicate`] if a rarity is listed twice.
    ///
    /// A table whose probabilities do not sum to 1.0 is accepted with a
    /// warning; draws that overshoot the sum land on the last tier.
    pub fn new(blessings: Vec<Blessing>, bad: BadOutcome) -> Result<Self, BlessingTableError> {
        if blessings.is_empty() {
            return Err(BlessingTableError::Empty);
        }
        for (i, b) in blessings.iter().enumerate() {
            if !b.probability.is_finite() || b.probability <= 0.0 || b.probability > 1.0 {
                return Err(BlessingTableError::OutOfRange {
                    rarity: b.rarity,
                    value: b.probability,
                });
            }
            if blessings[..i].iter().any(|prev| prev.rarity == b.rarity) {
                return Err(BlessingTableError::Duplicate(b.rarity));
            }
        }

        let selector = Self { blessings, bad };
        if !selector.is_normalized() {
            warn!(
                total = selector.total_probability(),
                "blessing probabilities do not sum to 1.0; overflow draws fall back to the last tier"
            );
        }
        Ok(selector)
    }

    pub fn blessings(&self) -> &[Blessing] {
        &self.blessings
    }

    pub fn bad_outcome(&self) -> &BadOutcome {
        &self.bad
    }

    pub fn total_probability(&self) -> f64 {
        self.blessings.iter().map(|b| b.probability).sum()
    }

    /// Whether the tier probabilities sum to 1.0 within [`PROBABILITY_TOLERANCE`].
    pub fn is_normalized(&self) -> bool {
        (self.total_probability() - 1.0).abs() <= PROBABILITY_TOLERANCE
    }

    /// Draw one outcome using two uniform values from `rng`.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Outcome<'_> {
        let r1: f64 = rng.gen();
        if r1 < BAD_OUTCOME_CHANCE {
            return Outcome::Bad(&self.bad);
        }
        let r2: f64 = rng.gen();
        Outcome::Blessing(self.pick(r2))
    }

    /// Deterministic form of [`draw`](Self::draw) for explicit roll values.
    pub fn select(&self, r1: f64, r2: f64) -> Outcome<'_> {
        if r1 < BAD_OUTCOME_CHANCE {
            Outcome::Bad(&self.bad)
        } else {
            Outcome::Blessing(self.pick(r2))
        }
    }

    /// First tier whose cumulative probability reaches `roll`, else the last.
    pub fn pick(&self, roll: f64) -> &Blessing {
        let mut cumulative = 0.0;
        for b in &self.blessings {
            cumulative += b.probability;
            if roll <= cumulative {
                return b;
            }
        }
        // `new` rejects empty tables.
        &self.blessings[self.blessings.len() - 1]
    }
}

impl Default for RewardSelector {
    fn default() -> Self {
        Self {
            blessings: default_blessings(),
            bad: BadOutcome::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn short_table() -> Vec<Blessing> {
        vec![
            Blessing::new(Rarity::Common, 0.50, 0, "c", "c.jpg"),
            Blessing::new(Rarity::Rare, 0.30, 0, "r", "r.jpg"),
            Blessing::new(Rarity::Epic, 0.17, 0, "e", "e.jpg"),
        ]
    }

    #[test]
    fn default_table_is_normalized() {
        let selector = RewardSelector::new(default_blessings(), BadOutcome::default()).unwrap();
        assert!(selector.is_normalized());
        assert_eq!(selector.blessings().len(), 5);
        assert_eq!(selector.blessings().last().unwrap().rarity, Rarity::Mythic);
    }

    #[test]
    fn rejects_empty_table() {
        let err = RewardSelector::new(Vec::new(), BadOutcome::default()).unwrap_err();
        assert!(matches!(err, BlessingTableError::Empty));
    }

    #[test]
    fn rejects_zero_and_nan_probabilities() {
        for bad in [0.0, -0.1, 1.5, f64::NAN] {
            let table = vec![Blessing::new(Rarity::Common, bad, 0, "", "")];
            assert!(matches!(
                RewardSelector::new(table, BadOutcome::default()),
                Err(BlessingTableError::OutOfRange { .. })
            ));
        }
    }

    #[test]
    fn rejects_duplicate_rarity() {
        let table = vec![
            Blessing::new(Rarity::Rare, 0.5, 0, "", ""),
            Blessing::new(Rarity::Rare, 0.5, 0, "", ""),
        ];
        assert!(matches!(
            RewardSelector::new(table, BadOutcome::default()),
            Err(BlessingTableError::Duplicate(Rarity::Rare))
        ));
    }

    #[test]
    fn low_first_roll_is_bad_outcome() {
        let selector = RewardSelector::default();
        assert!(matches!(selector.select(0.0, 0.5), Outcome::Bad(_)));
        assert!(matches!(selector.select(0.0999, 0.5), Outcome::Bad(_)));
        assert!(matches!(selector.select(0.10, 0.5), Outcome::Blessing(_)));
    }

    #[test]
    fn pick_walks_cumulative_sum() {
        let selector = RewardSelector::default();
        assert_eq!(selector.pick(0.0).rarity, Rarity::Common);
        assert_eq!(selector.pick(0.45).rarity, Rarity::Common);
        assert_eq!(selector.pick(0.46).rarity, Rarity::Rare);
        assert_eq!(selector.pick(0.77).rarity, Rarity::Rare);
        assert_eq!(selector.pick(0.90).rarity, Rarity::Epic);
        assert_eq!(selector.pick(0.97).rarity, Rarity::Legendary);
        assert_eq!(selector.pick(0.999).rarity, Rarity::Mythic);
    }

    #[test]
    fn short_table_falls_back_to_last_tier() {
        // Sums to 0.97.
        let selector = RewardSelector::new(short_table(), BadOutcome::default()).unwrap();
        assert!(!selector.is_normalized());
        for roll in [0.971, 0.98, 0.999_999] {
            assert_eq!(selector.pick(roll).rarity, Rarity::Epic);
        }
        match selector.select(0.5, 0.99) {
            Outcome::Blessing(b) => assert_eq!(b.rarity, Rarity::Epic),
            Outcome::Bad(_) => panic!("expected a blessing"),
        }
    }

    #[test]
    fn draws_stay_inside_declared_outcomes() {
        let selector = RewardSelector::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            match selector.draw(&mut rng) {
                Outcome::Bad(bad) => assert_eq!(bad, selector.bad_outcome()),
                Outcome::Blessing(b) => assert!(selector.blessings().contains(b)),
            }
        }
    }

    #[test]
    fn draw_frequencies_converge() {
        let selector = RewardSelector::default();
        let mut rng = StdRng::seed_from_u64(0xB1E55);
        let n = 200_000;
        let mut bad = 0u32;
        let mut hist: HashMap<Rarity, u32> = HashMap::new();
        for _ in 0..n {
            match selector.draw(&mut rng) {
                Outcome::Bad(_) => bad += 1,
                Outcome::Blessing(b) => *hist.entry(b.rarity).or_insert(0) += 1,
            }
        }

        let bad_freq = bad as f64 / n as f64;
        assert!((bad_freq - BAD_OUTCOME_CHANCE).abs() < 0.01, "bad = {bad_freq}");

        let good = (n - bad) as f64;
        for b in selector.blessings() {
            let freq = *hist.get(&b.rarity).unwrap_or(&0) as f64 / good;
            assert!(
                (freq - b.probability).abs() < 0.01,
                "{} expected {} got {}",
                b.rarity,
                b.probability,
                freq
            );
        }
    }

    #[test]
    fn rarity_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Rarity::Legendary).unwrap(), "\"legendary\"");
        let parsed: Rarity = serde_json::from_str("\"mythic\"").unwrap();
        assert_eq!(parsed, Rarity::Mythic);
        assert_eq!(Rarity::Epic.label(), "Epic");
    }
}
