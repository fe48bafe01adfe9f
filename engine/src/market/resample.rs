use super::models::{Candle, Timeframe};

/// Aggregate `candles` of timeframe `from` into bars of timeframe `to`.
///
/// Returns `None` when `to` is not a whole multiple of `from`. The last
/// bucket may be partial (the bar still forming).
pub fn resample(candles: &[Candle], from: &Timeframe, to: &Timeframe) -> Option<Vec<Candle>> {
    if from == to {
        return Some(candles.to_vec());
    }
    if !to.is_multiple_of(from) {
        return None;
    }
    let bucket_secs = to.secs() as i64;
    let mut out: Vec<Candle> = Vec::new();
    for c in candles {
        let bucket = c.time - c.time.rem_euclid(bucket_secs);
        match out.last_mut() {
            Some(bar) if bar.time == bucket => {
                bar.high = bar.high.max(c.high);
                bar.low = bar.low.min(c.low);
                bar.close = c.close;
                bar.volume += c.volume;
            }
            _ => out.push(Candle { time: bucket, ..*c }),
        }
    }
    Some(out)
}
