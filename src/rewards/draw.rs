//! Weighted point draw.

use rand::Rng;
use std::ops::RangeInclusive;

/// Percentage weight and point range per tier. Weights sum to 100.
pub const TIERS: [(u32, RangeInclusive<i64>); 4] = [
    (50, 1..=100),
    (30, 101..=500),
    (15, 501..=800),
    (5, 801..=1000),
];

/// Pick a tier by weight, then a uniform value inside it.
pub fn draw_points<R: Rng + ?Sized>(rng: &mut R) -> i64 {
    let roll = rng.gen_range(0..100u32);
    let mut cumulative = 0;
    for (weight, range) in &TIERS {
        cumulative += weight;
        if roll < cumulative {
            return rng.gen_range(range.clone());
        }
    }
    // Unreachable while the weights sum to 100.
    rng.gen_range(TIERS[0].1.clone())
}
