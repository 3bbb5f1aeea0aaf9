// src/reduce.rs
use crate::drivers::{HatError, ScanBlock};
use crate::types::Reduction;
use ndarray::{ArrayView2, Axis};

/// Collapses an interleaved scan block to one value per channel (volts).
pub fn reduce_block(
    block: &ScanBlock,
    expected_per_channel: usize,
    reduction: Reduction,
) -> Result<Vec<f64>, HatError> {
    if block.samples_per_channel < expected_per_channel.max(1) {
        return Err(HatError::ShortRead {
            expected: expected_per_channel,
            actual: block.samples_per_channel,
        });
    }
    let needed = block.samples_per_channel * block.channel_count;
    if block.data.len() < needed {
        return Err(HatError::Shape(format!("{} values for {needed} slots", block.data.len())));
    }
    let view = ArrayView2::from_shape(
        (block.samples_per_channel, block.channel_count),
        &block.data[..needed],
    )?;
    let per_channel = match reduction {
        Reduction::Mean => view.mean_axis(Axis(0)),
        Reduction::Rms => view.mapv(|v| v * v).mean_axis(Axis(0)).map(|a| a.mapv(f64::sqrt)),
    };
    per_channel
        .map(|a| a.to_vec())
        .ok_or_else(|| HatError::Shape("empty scan block".into()))
}

pub fn to_millivolts(volts: &[f64]) -> Vec<f64> {
    volts.iter().map(|v| v * 1e3).collect()
}
