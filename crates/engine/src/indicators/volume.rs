//! Volume spike analysis and human-readable volume formatting

use serde::Serialize;

use super::{guard, mean, Indicator, Reading, INSUFFICIENT_DATA};
use crate::types::Bias;

const VOLUME_WINDOW: usize = 20;
const SPIKE_RATIO: f64 = 1.5;
const LOW_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeTrend {
    BreakoutUp,
    BreakoutDown,
    HighActivity,
    LowActivity,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeResult {
    pub current: f64,
    /// Mean of the last 20 volumes
    pub average: f64,
    pub ratio: f64,
    pub spike: bool,
    pub low_volume: bool,
    pub signal: Bias,
    pub trend: VolumeTrend,
    pub description: String,
}

impl Indicator for VolumeResult {
    fn bias(&self) -> Bias {
        self.signal
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Compare the latest volume with the 20-bar average and classify it
/// together with the latest single-bar price move. Needs 20 volumes.
pub fn volume_analysis(volumes: &[f64], prices: &[f64]) -> Reading<VolumeResult> {
    let fallback = || VolumeResult {
        current: 0.0,
        average: 0.0,
        ratio: 1.0,
        spike: false,
        low_volume: false,
        signal: Bias::Neutral,
        trend: VolumeTrend::Normal,
        description: INSUFFICIENT_DATA.to_string(),
    };

    guard(volumes.len(), VOLUME_WINDOW, fallback, || {
        let current = volumes[volumes.len() - 1];
        let average = mean(&volumes[volumes.len() - VOLUME_WINDOW..]);
        let ratio = if average > 0.0 { current / average } else { 1.0 };

        let spike = ratio > SPIKE_RATIO;
        let low_volume = ratio < LOW_RATIO;

        let price_change = match prices {
            [.., prev, last] if *prev != 0.0 => (last - prev) / prev * 100.0,
            _ => 0.0,
        };

        let (signal, trend, description) = if spike && price_change > 0.0 {
            (Bias::Bullish, VolumeTrend::BreakoutUp, "Volume spike with rising price")
        } else if spike && price_change < 0.0 {
            (Bias::Bearish, VolumeTrend::BreakoutDown, "Volume spike with falling price")
        } else if spike {
            (Bias::Neutral, VolumeTrend::HighActivity, "High volume, watch closely")
        } else if low_volume {
            (Bias::Neutral, VolumeTrend::LowActivity, "Low volume, wait")
        } else {
            (Bias::Neutral, VolumeTrend::Normal, "Normal volume")
        };

        VolumeResult {
            current,
            average,
            ratio,
            spike,
            low_volume,
            signal,
            trend,
            description: description.to_string(),
        }
    })
}

/// Abbreviate a volume with K/M/B suffixes, e.g. `1.25M`
pub fn format_volume(volume: f64) -> String {
    let magnitude = volume.abs();
    if magnitude >= 1e9 {
        format!("{:.2}B", volume / 1e9)
    } else if magnitude >= 1e6 {
        format!("{:.2}M", volume / 1e6)
    } else if magnitude >= 1e3 {
        format!("{:.2}K", volume / 1e3)
    } else {
        format!("{:.0}", volume)
    }
}
