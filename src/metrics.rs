//! Volume and return statistics over a pair's recent candles.

use crate::config::DemandFilter;
use crate::error::FetchError;
use crate::klines::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub mean: f64,
    pub std: f64,
}

/// Mean and sample standard deviation; `std` is 0 below two samples.
pub fn stats(values: &[f64]) -> Stats {
    if values.is_empty() {
        return Stats { mean: 0.0, std: 0.0 };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() < 2 {
        0.0
    } else {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    };
    Stats { mean, std }
}

pub fn volume_ratio(current: f64, trailing_average: f64) -> Option<f64> {
    if trailing_average <= 0.0 || !trailing_average.is_finite() {
        return None;
    }
    Some(current / trailing_average)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairMetrics {
    pub last_price: f64,
    pub current_volume: f64,
    pub volume: Stats,
    pub volume_ratio: f64,
    /// Fractional body return of the latest candle.
    pub current_return: f64,
    pub returns: Stats,
    pub lookback_return_pct: f64,
}

/// Compares the latest candle against the `lookback` candles before it.
/// `candles` must be ordered oldest first.
pub fn analyze(candles: &[Candle], lookback: usize) -> Result<PairMetrics, FetchError> {
    let need = lookback + 1;
    if lookback == 0 || candles.len() < need {
        return Err(FetchError::InsufficientData {
            got: candles.len(),
            need,
        });
    }

    let window = &candles[candles.len() - need..];
    let (current, trailing) = match window.split_last() {
        Some(split) => split,
        None => return Err(FetchError::InsufficientData { got: 0, need }),
    };

    let volumes: Vec<f64> = trailing.iter().map(|c| c.volume).collect();
    let volume = stats(&volumes);
    let volume_ratio = volume_ratio(current.volume, volume.mean)
        .ok_or_else(|| FetchError::Degenerate("no trailing volume".into()))?;

    let body_returns = trailing
        .iter()
        .map(Candle::body_return)
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(|| FetchError::Degenerate("zero open price".into()))?;
    let returns = stats(&body_returns);
    let current_return = current
        .body_return()
        .ok_or_else(|| FetchError::Degenerate("zero open price".into()))?;

    let base_close = trailing[0].close;
    if base_close == 0.0 {
        return Err(FetchError::Degenerate("zero close price".into()));
    }
    let lookback_return_pct = (current.close / base_close - 1.0) * 100.0;

    Ok(PairMetrics {
        last_price: current.close,
        current_volume: current.volume,
        volume,
        volume_ratio,
        current_return,
        returns,
        lookback_return_pct,
    })
}

impl PairMetrics {
    /// Both the latest volume and the latest return clear their trailing mean
    /// by the configured multiple of standard deviations. Deviations are
    /// floored at 1% of the mean so flat histories still need real movement.
    pub fn is_high_demand(&self, filter: &DemandFilter) -> bool {
        let volume_std = self.volume.std.max(self.volume.mean * 0.01);
        let return_std = self.returns.std.max(self.returns.mean.abs() * 0.01);

        let volume_threshold = self.volume.mean + filter.volume_mult * volume_std;
        let return_threshold = self.returns.mean + filter.return_mult * return_std;

        self.current_volume >= volume_threshold && self.current_return >= return_threshold
    }
}
