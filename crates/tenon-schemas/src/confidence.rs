use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence in basis points, `0..=10_000` (10_000 == 1.0).
///
/// Integer so scoring stays bit-for-bit reproducible across platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Confidence(u16);

impl Confidence {
    pub const MAX_BPS: u16 = 10_000;
    pub const ZERO: Confidence = Confidence(0);
    pub const FULL: Confidence = Confidence(Self::MAX_BPS);

    /// Saturating constructor: anything above 10_000 clamps to 1.0.
    pub fn from_bps(bps: u32) -> Self {
        Confidence(bps.min(Self::MAX_BPS as u32) as u16)
    }

    /// `numerator / denominator` in basis points, rounded down. Zero denominator is zero.
    pub fn ratio(numerator: u64, denominator: u64) -> Self {
        if denominator == 0 {
            return Self::ZERO;
        }
        let bps = numerator.saturating_mul(Self::MAX_BPS as u64) / denominator;
        Self::from_bps(bps.min(Self::MAX_BPS as u64) as u32)
    }

    pub fn bps(self) -> u16 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl TryFrom<u16> for Confidence {
    type Error = String;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        if v > Self::MAX_BPS {
            return Err(format!("confidence {v} bps exceeds {}", Self::MAX_BPS));
        }
        Ok(Confidence(v))
    }
}

impl From<Confidence> for u16 {
    fn from(c: Confidence) -> u16 {
        c.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}", self.0 / Self::MAX_BPS, self.0 % Self::MAX_BPS)
    }
}
