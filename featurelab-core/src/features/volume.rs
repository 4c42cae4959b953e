//! Volume-based features driven by `tick_volume`.

use super::math;
use super::params::{ParamSet, Params};
use super::{Continuity, Feature, FeatureError, FeatureOutput};
use crate::domain::Frame;

/// On-Balance Volume: a running total that adds the bar's volume on an up
/// close and subtracts it on a down close. Starts at the first bar's volume,
/// so a resumed run continues it from the stored series.
#[derive(Debug, Clone, Default)]
pub struct Obv;

impl Feature for Obv {
    fn name(&self) -> &str {
        "OBV"
    }

    fn warmup(&self) -> usize {
        0
    }

    fn continuity(&self) -> Continuity {
        Continuity::Cumulative
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let close = frame.require("close")?;
        let volume = frame.require("tick_volume")?;
        let n = close.len();
        let mut result = vec![f64::NAN; n];
        if n == 0 {
            return Ok(FeatureOutput::Single(result));
        }

        let mut total = volume[0];
        result[0] = total;
        for i in 1..n {
            let change = close[i] - close[i - 1];
            if change > 0.0 {
                total += volume[i];
            } else if change < 0.0 {
                total -= volume[i];
            }
            result[i] = total;
        }
        Ok(FeatureOutput::Single(result))
    }
}

/// Chaikin Money Flow over `length` bars.
///
/// Money-flow multiplier ((close - low) - (high - close)) / (high - low) is 0
/// on a zero-range bar; a window with no volume is NaN.
#[derive(Debug, Clone)]
pub struct Cmf {
    length: usize,
    name: String,
}

impl Cmf {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            name: format!("CMF_{length}"),
        }
    }
}

impl Feature for Cmf {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.length.saturating_sub(1)
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let high = frame.require("high")?;
        let low = frame.require("low")?;
        let close = frame.require("close")?;
        let volume = frame.require("tick_volume")?;

        let money_flow: Vec<f64> = (0..close.len())
            .map(|i| {
                let range = high[i] - low[i];
                let multiplier = if range == 0.0 {
                    0.0
                } else {
                    ((close[i] - low[i]) - (high[i] - close[i])) / range
                };
                multiplier * volume[i]
            })
            .collect();

        let flow_sum = math::rolling_sum(&money_flow, self.length);
        let volume_sum = math::rolling_sum(volume, self.length);
        let result = flow_sum
            .iter()
            .zip(&volume_sum)
            .map(|(&f, &v)| if v == 0.0 { f64::NAN } else { f / v })
            .collect();
        Ok(FeatureOutput::Single(result))
    }
}

pub(crate) fn build_obv(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    Params::new("OBV", params, &[])?;
    Ok(Box::new(Obv))
}

pub(crate) fn build_cmf(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("CMF", params, &["length"])?;
    Ok(Box::new(Cmf::new(p.period("length")?)))
}
