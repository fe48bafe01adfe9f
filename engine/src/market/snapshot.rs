use std::collections::HashMap;

use super::indicators::{IndicatorColumns, IndicatorSpec};
use super::models::{Candle, Timeframe};

/// Candles of one timeframe plus the indicator values computed on them.
#[derive(Debug, Clone)]
pub struct Frame {
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub indicators: HashMap<IndicatorSpec, IndicatorColumns>,
}

impl Frame {
    pub fn new(timeframe: Timeframe, candles: Vec<Candle>) -> Self {
        Self {
            timeframe,
            candles,
            indicators: HashMap::new(),
        }
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn previous(&self) -> Option<&Candle> {
        self.candles.len().checked_sub(2).and_then(|i| self.candles.get(i))
    }

    pub fn indicator(&self, spec: &IndicatorSpec) -> Option<&IndicatorColumns> {
        self.indicators.get(spec)
    }
}

/// Everything the evaluator may look at for one (symbol, timeframe) group in
/// one tick. Built once, shared read-only by every alert in the group.
#[derive(Debug, Clone)]
pub struct EvaluationSnapshot {
    pub symbol: String,
    pub base: Timeframe,
    frames: HashMap<Timeframe, Frame>,
}

impl EvaluationSnapshot {
    pub fn new(symbol: impl Into<String>, base: Frame) -> Self {
        let tf = base.timeframe;
        let mut frames = HashMap::new();
        frames.insert(tf, base);
        Self {
            symbol: symbol.into(),
            base: tf,
            frames,
        }
    }

    pub fn insert_frame(&mut self, frame: Frame) {
        self.frames.insert(frame.timeframe, frame);
    }

    pub fn frame(&self, timeframe: &Timeframe) -> Option<&Frame> {
        self.frames.get(timeframe)
    }

    pub fn frame_mut(&mut self, timeframe: &Timeframe) -> Option<&mut Frame> {
        self.frames.get_mut(timeframe)
    }

    pub fn base_frame(&self) -> Option<&Frame> {
        self.frames.get(&self.base)
    }

    /// Open time of the latest base bar.
    pub fn bar_time(&self) -> Option<i64> {
        self.base_frame()?.last().map(|c| c.time)
    }

    /// Absolute bar number of the latest base bar.
    pub fn bar_index(&self) -> Option<i64> {
        self.bar_time().map(|t| self.base.bar_index(t))
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.base_frame()?.last()
    }
}
