use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

use super::models::Candle;

// ---------------------------------------------------------------------------
// IndicatorSpec: (name, params) identity used for deduplication
// ---------------------------------------------------------------------------

/// An indicator request: canonical (upper-case) name plus numeric params.
///
/// Two specs are equal when the name and every parameter are bit-identical,
/// which is what lets the scheduler compute each distinct request once per
/// group no matter how many conditions ask for it.
#[derive(Debug, Clone)]
pub struct IndicatorSpec {
    pub name: String,
    pub params: BTreeMap<String, f64>,
}

impl IndicatorSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_ascii_uppercase(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: f64) -> Self {
        self.params.insert(key.to_ascii_lowercase(), value);
        self
    }

    pub fn param(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).copied().unwrap_or(default)
    }

    pub fn period(&self, default: usize) -> usize {
        let p = self.param("period", default as f64);
        if p.is_finite() && p >= 1.0 {
            p as usize
        } else {
            default
        }
    }
}

impl PartialEq for IndicatorSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.to_bits() == vb.to_bits())
    }
}

impl Eq for IndicatorSpec {}

impl Hash for IndicatorSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        for (k, v) in &self.params {
            k.hash(state);
            v.to_bits().hash(state);
        }
    }
}

impl fmt::Display for IndicatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, "({})", params.join(","))?;
        }
        Ok(())
    }
}

/// Named component values of one indicator for the last row.
/// Column names follow whatever convention the engine uses.
pub type IndicatorColumns = HashMap<String, f64>;

/// The indicator computation collaborator.
pub trait IndicatorEngine: Send + Sync {
    /// Returns `None` for unknown indicators or insufficient data.
    fn compute(&self, candles: &[Candle], spec: &IndicatorSpec) -> Option<IndicatorColumns>;
}

// ---------------------------------------------------------------------------
// BuiltinIndicators
// ---------------------------------------------------------------------------

/// Small built-in indicator set. Column naming deliberately mixes the
/// conventions seen upstream (`RSI`, `MACD_Signal`, `BB_Upper`, `fast_ma`).
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinIndicators;

impl IndicatorEngine for BuiltinIndicators {
    fn compute(&self, candles: &[Candle], spec: &IndicatorSpec) -> Option<IndicatorColumns> {
        if candles.is_empty() {
            return None;
        }
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let name = spec.name.as_str();
        let mut out = IndicatorColumns::new();

        match name {
            "SMA" | "MA" => {
                out.insert(name.into(), sma(&closes, spec.period(20)));
            }
            "EMA" => {
                out.insert(name.into(), ema(&closes, spec.period(20)));
            }
            "RSI" => {
                out.insert(name.into(), rsi(&closes, spec.period(14)));
            }
            "MACD" => {
                let fast = spec.param("fast", 12.0).max(1.0) as usize;
                let slow = spec.param("slow", 26.0).max(1.0) as usize;
                let signal = spec.param("signal", 9.0).max(1.0) as usize;
                let fast_series = ema_series(&closes, fast);
                let slow_series = ema_series(&closes, slow);
                let macd_series: Vec<f64> = fast_series
                    .iter()
                    .zip(&slow_series)
                    .map(|(f, s)| f - s)
                    .collect();
                let macd_line = *macd_series.last()?;
                let signal_line = ema(&macd_series, signal);
                out.insert("MACD_MACD".into(), macd_line);
                out.insert("MACD_Signal".into(), signal_line);
                out.insert("MACD_Histogram".into(), macd_line - signal_line);
            }
            "BB" | "BBANDS" | "BOLLINGER" => {
                let period = spec.period(20);
                let mult = spec.param("std", spec.param("stddev", 2.0));
                let middle = sma(&closes, period);
                let sd = stddev(&closes, period);
                out.insert(format!("{name}_Upper"), middle + mult * sd);
                out.insert(format!("{name}_Middle"), middle);
                out.insert(format!("{name}_Lower"), middle - mult * sd);
            }
            "ATR" => {
                out.insert(name.into(), atr(candles, spec.period(14)));
            }
            "VWAP" => {
                out.insert(name.into(), vwap(candles));
            }
            "MA_CROSS" => {
                let fast = spec.param("fast", 9.0).max(1.0) as usize;
                let slow = spec.param("slow", 21.0).max(1.0) as usize;
                out.insert("fast_ma".into(), sma(&closes, fast));
                out.insert("slow_ma".into(), sma(&closes, slow));
            }
            "HAMMER" | "DOJI" | "BULLISH_ENGULFING" | "BEARISH_ENGULFING" => {
                let hit = detect_pattern(name, candles)?;
                out.insert(name.into(), if hit { 1.0 } else { 0.0 });
            }
            _ => return None,
        }
        Some(out)
    }
}

pub fn sma(values: &[f64], period: usize) -> f64 {
    if values.is_empty() || period == 0 {
        return 0.0;
    }
    let n = values.len().min(period);
    let sum: f64 = values[values.len() - n..].iter().sum();
    sum / n as f64
}

pub fn ema(values: &[f64], period: usize) -> f64 {
    ema_series(values, period).last().copied().unwrap_or(0.0)
}

pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut result = values[0];
    out.push(result);
    for v in &values[1..] {
        result = v * k + result * (1.0 - k);
        out.push(result);
    }
    out
}

pub fn rsi(values: &[f64], period: usize) -> f64 {
    if values.len() < 2 || period == 0 {
        return 50.0;
    }
    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let n = changes.len().min(period);
    let recent = &changes[changes.len() - n..];
    let avg_gain: f64 = recent.iter().filter(|&&c| c > 0.0).sum::<f64>() / n as f64;
    let avg_loss: f64 = recent
        .iter()
        .filter(|&&c| c < 0.0)
        .map(|c| c.abs())
        .sum::<f64>()
        / n as f64;
    if avg_loss < f64::EPSILON {
        return 100.0;
    }
    if avg_gain < f64::EPSILON {
        return 0.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

fn stddev(values: &[f64], period: usize) -> f64 {
    if values.is_empty() || period == 0 {
        return 0.0;
    }
    let n = values.len().min(period);
    let window = &values[values.len() - n..];
    let mean = window.iter().sum::<f64>() / n as f64;
    let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    var.sqrt()
}

fn atr(candles: &[Candle], period: usize) -> f64 {
    let trs: Vec<f64> = candles
        .iter()
        .enumerate()
        .map(|(i, c)| match i.checked_sub(1).map(|p| candles[p].close) {
            Some(prev_close) => (c.high - c.low)
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs()),
            None => c.high - c.low,
        })
        .collect();
    sma(&trs, period)
}

fn vwap(candles: &[Candle]) -> f64 {
    let mut sum_pv = 0.0;
    let mut sum_v = 0.0;
    for c in candles {
        let typical = (c.high + c.low + c.close) / 3.0;
        sum_pv += typical * c.volume;
        sum_v += c.volume;
    }
    if sum_v > 0.0 {
        sum_pv / sum_v
    } else {
        0.0
    }
}

fn detect_pattern(name: &str, candles: &[Candle]) -> Option<bool> {
    let last = candles.last()?;
    let body = (last.close - last.open).abs();
    let range = last.high - last.low;
    if range <= 0.0 {
        return Some(false);
    }
    let hit = match name {
        "DOJI" => body <= range * 0.1,
        "HAMMER" => {
            let lower_wick = last.open.min(last.close) - last.low;
            let upper_wick = last.high - last.open.max(last.close);
            body > 0.0 && lower_wick >= body * 2.0 && upper_wick <= body
        }
        "BULLISH_ENGULFING" | "BEARISH_ENGULFING" => {
            let prev = candles.get(candles.len().checked_sub(2)?)?;
            let engulfs = last.open.min(last.close) <= prev.open.min(prev.close)
                && last.open.max(last.close) >= prev.open.max(prev.close);
            if name == "BULLISH_ENGULFING" {
                prev.close < prev.open && last.close > last.open && engulfs
            } else {
                prev.close > prev.open && last.close < last.open && engulfs
            }
        }
        _ => return None,
    };
    Some(hit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                time: i as i64 * 3_600,
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn test_sma_basic() {
        assert!((sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3) - 4.0).abs() < 0.001);
    }

    #[test]
    fn test_sma_period_larger_than_data() {
        assert!((sma(&[2.0, 4.0], 10) - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_ema_basic() {
        // k = 0.5: 1, 1.5, 2.25, 3.125, 4.0625
        assert!((ema(&[1.0, 2.0, 3.0, 4.0, 5.0], 3) - 4.0625).abs() < 0.001);
    }

    #[test]
    fn test_rsi_extremes() {
        assert!((rsi(&[1.0, 2.0, 3.0, 4.0, 5.0], 4) - 100.0).abs() < 0.001);
        assert!(rsi(&[5.0, 4.0, 3.0, 2.0, 1.0], 4).abs() < 0.001);
        assert!((rsi(&[5.0], 14) - 50.0).abs() < 0.001);
    }

    #[test]
    fn test_spec_identity_ignores_insertion_order() {
        let a = IndicatorSpec::new("macd")
            .with_param("fast", 12.0)
            .with_param("slow", 26.0);
        let b = IndicatorSpec::new("MACD")
            .with_param("slow", 26.0)
            .with_param("fast", 12.0);
        let c = IndicatorSpec::new("MACD").with_param("fast", 8.0);
        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(a.to_string(), "MACD(fast=12,slow=26)");
    }

    #[test]
    fn test_builtin_macd_columns() {
        let data = candles(&(1..=60).map(f64::from).collect::<Vec<_>>());
        let out = BuiltinIndicators
            .compute(&data, &IndicatorSpec::new("MACD"))
            .unwrap();
        assert!(out.contains_key("MACD_MACD"));
        assert!(out.contains_key("MACD_Signal"));
        let hist = out["MACD_MACD"] - out["MACD_Signal"];
        assert!((out["MACD_Histogram"] - hist).abs() < 1e-12);
        // steady uptrend: fast EMA above slow EMA
        assert!(out["MACD_MACD"] > 0.0);
    }

    #[test]
    fn test_builtin_bollinger_brackets_middle() {
        let data = candles(&[10.0, 12.0, 11.0, 13.0, 12.0, 14.0]);
        let out = BuiltinIndicators
            .compute(&data, &IndicatorSpec::new("BB").with_param("period", 5.0))
            .unwrap();
        assert!(out["BB_Upper"] > out["BB_Middle"]);
        assert!(out["BB_Lower"] < out["BB_Middle"]);
    }

    #[test]
    fn test_builtin_unknown_indicator() {
        let data = candles(&[1.0, 2.0]);
        assert!(BuiltinIndicators
            .compute(&data, &IndicatorSpec::new("ICHIMOKU"))
            .is_none());
    }

    #[test]
    fn test_doji_pattern() {
        let mut data = candles(&[10.0, 10.0]);
        data[1].open = 10.0;
        data[1].close = 10.05;
        let out = BuiltinIndicators
            .compute(&data, &IndicatorSpec::new("DOJI"))
            .unwrap();
        assert!((out["DOJI"] - 1.0).abs() < f64::EPSILON);
    }
}
