//! Instrument identity.
//!
//! An [`InstrumentKey`] names exactly one tracked book. The same pair on two
//! segments is two books: a spot book is never merged with a futures book.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Trading context of an instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Spot market
    Spot,
    /// Isolated margin (shares the spot book)
    Margin,
    /// Cross margin (shares the spot book)
    CrossMargin,
    /// Linear (stablecoin margined) perpetual futures
    LinearFutures,
    /// Inverse (coin margined) perpetual futures
    InverseFutures,
    /// Options
    Options,
}

impl Segment {
    /// All segments, in declaration order
    pub const ALL: [Segment; 6] = [
        Segment::Spot,
        Segment::Margin,
        Segment::CrossMargin,
        Segment::LinearFutures,
        Segment::InverseFutures,
        Segment::Options,
    ];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Spot => "spot",
            Segment::Margin => "margin",
            Segment::CrossMargin => "cross_margin",
            Segment::LinearFutures => "linear_futures",
            Segment::InverseFutures => "inverse_futures",
            Segment::Options => "options",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Segment::ALL
            .iter()
            .copied()
            .find(|segment| segment.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown market segment: {}", s)))
    }
}

/// Identity of one tracked order book: symbol pair plus market segment.
///
/// # Example
///
/// ```rust
/// use depth_sync::types::{InstrumentKey, Segment};
///
/// let key = InstrumentKey::new("btc", "usdt", Segment::Spot);
/// assert_eq!(key.symbol(), "BTCUSDT");
/// assert_eq!(key.to_string(), "BTC-USDT/spot");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentKey {
    base: String,
    quote: String,
    segment: Segment,
}

impl InstrumentKey {
    /// Create a key. Symbols are normalized to upper case.
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>, segment: Segment) -> Self {
        Self {
            base: base.as_ref().to_ascii_uppercase(),
            quote: quote.as_ref().to_ascii_uppercase(),
            segment,
        }
    }

    /// Base asset symbol
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Quote asset symbol
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Market segment
    pub fn segment(&self) -> Segment {
        self.segment
    }

    /// The same pair on another segment
    #[must_use]
    pub fn with_segment(&self, segment: Segment) -> Self {
        Self {
            base: self.base.clone(),
            quote: self.quote.clone(),
            segment,
        }
    }

    /// Exchange symbol as used by the REST depth endpoint and the diff stream.
    ///
    /// Inverse perpetuals carry a `_PERP` suffix; options use a dashed form.
    pub fn symbol(&self) -> String {
        match self.segment {
            Segment::InverseFutures => format!("{}{}_PERP", self.base, self.quote),
            Segment::Options => format!("{}-{}", self.base, self.quote),
            _ => format!("{}{}", self.base, self.quote),
        }
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}/{}", self.base, self.quote, self.segment)
    }
}
