use serde::{Deserialize, Serialize};
use ta::Next;
use ta::indicators::{MovingAverageConvergenceDivergence, RelativeStrengthIndex};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: u32,
    pub macd_fast: u32,
    pub macd_slow: u32,
    pub macd_signal: u32,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct MacdSnapshot {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub macd: Option<MacdSnapshot>,
}

impl IndicatorSnapshot {
    pub fn compute(closes: &[f64], config: &IndicatorConfig) -> Self {
        Self {
            rsi: calculate_rsi(closes, config.rsi_period),
            macd: calculate_macd(closes, config.macd_fast, config.macd_slow, config.macd_signal),
        }
    }
}

/// Last RSI value over `closes`, or `None` with fewer samples than `period`.
pub fn calculate_rsi(closes: &[f64], period: u32) -> Option<f64> {
    let mut rsi_indicator = RelativeStrengthIndex::new(period as usize).ok()?;

    if closes.len() < period as usize {
        return None;
    }

    let mut last_rsi: Option<f64> = None;
    for &price in closes {
        last_rsi = Some(rsi_indicator.next(price));
    }
    last_rsi
}

/// Last MACD line, signal and histogram, or `None` with fewer samples than
/// the slow period.
pub fn calculate_macd(closes: &[f64], fast: u32, slow: u32, signal: u32) -> Option<MacdSnapshot> {
    let mut macd_indicator =
        MovingAverageConvergenceDivergence::new(fast as usize, slow as usize, signal as usize).ok()?;

    if closes.len() < slow as usize {
        return None;
    }

    closes.iter().fold(None, |_, &price| {
        let out = macd_indicator.next(price);
        Some(MacdSnapshot {
            macd: out.macd,
            signal: out.signal,
            histogram: out.histogram,
        })
    })
}
