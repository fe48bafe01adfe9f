use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// One OHLCV bar. `time` is the bar open time in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl PriceField {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "o" => Some(Self::Open),
            "high" | "h" => Some(Self::High),
            "low" | "l" => Some(Self::Low),
            "close" | "c" | "price" | "last" => Some(Self::Close),
            "volume" | "v" | "vol" => Some(Self::Volume),
            _ => None,
        }
    }
}

impl Candle {
    pub fn field(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
            PriceField::Volume => self.volume,
        }
    }
}

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

/// A bar duration. Displays in exchange notation (`1m`, `4h`, `1d`, `1w`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    secs: u64,
}

const MINUTE: u64 = 60;
const HOUR: u64 = 3_600;
const DAY: u64 = 86_400;
const WEEK: u64 = 604_800;

impl Timeframe {
    pub fn from_secs(secs: u64) -> Option<Self> {
        (secs >= MINUTE && secs % MINUTE == 0).then_some(Self { secs })
    }

    /// Accepts `<n><unit>` with unit `m`, `h`, `d` or `w` (hours, days and
    /// weeks case-insensitive). A bare number is read as minutes.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (num, unit) = s.split_at(split);
        let n: u64 = if num.is_empty() { 1 } else { num.parse().ok()? };
        if n == 0 {
            return None;
        }
        let unit_secs = match unit {
            "" | "m" | "min" => MINUTE,
            "h" | "H" => HOUR,
            "d" | "D" => DAY,
            "w" | "W" => WEEK,
            _ => return None,
        };
        Self::from_secs(n.checked_mul(unit_secs)?)
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    /// Absolute bar number of the bar opening at `time`.
    pub fn bar_index(&self, time: i64) -> i64 {
        time.div_euclid(self.secs as i64)
    }

    pub fn is_multiple_of(&self, other: &Timeframe) -> bool {
        self.secs % other.secs == 0
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.secs;
        if s % WEEK == 0 {
            write!(f, "{}w", s / WEEK)
        } else if s % DAY == 0 {
            write!(f, "{}d", s / DAY)
        } else if s % HOUR == 0 {
            write!(f, "{}h", s / HOUR)
        } else {
            write!(f, "{}m", s / MINUTE)
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid timeframe `{value}`"))
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}
