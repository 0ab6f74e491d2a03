//! Quantization step sizes signalled by the encoder in QCD/QCC.

use super::params::{QuantizationStyle, StepSize, TRANSFORM_IRREVERSIBLE_9_7, TileComponentCodingParams};

/// L2 norms of the 9/7 synthesis basis functions, by orientation (LL, HL,
/// LH, HH) and decomposition level.
const IRREVERSIBLE_NORMS: [[f64; 10]; 4] = [
    [1.000, 1.965, 4.177, 8.403, 16.90, 33.84, 67.69, 135.3, 270.6, 540.9],
    [2.022, 3.989, 8.355, 17.04, 34.27, 68.63, 137.3, 274.6, 549.0, 549.0],
    [2.022, 3.989, 8.355, 17.04, 34.27, 68.63, 137.3, 274.6, 549.0, 549.0],
    [2.080, 3.865, 8.307, 17.18, 34.71, 69.59, 139.3, 278.6, 557.2, 557.2],
];

fn irreversible_norm(level: u32, orientation: usize) -> f64 {
    let last = if orientation == 0 { 9 } else { 8 };
    IRREVERSIBLE_NORMS[orientation][(level as usize).min(last)]
}

/// Dynamic range gain of a band for the 5/3 filter: 0 for LL, 1 for HL
/// and LH, 2 for HH.
fn reversible_gain(orientation: usize) -> u32 {
    match orientation {
        0 => 0,
        1 | 2 => 1,
        _ => 2,
    }
}

/// Splits a step size in 1/8192 units into exponent and mantissa relative
/// to `numbps` bit planes.
pub fn encode_step_size(step: i32, numbps: i32) -> StepSize {
    let log2 = 31 - step.max(1).leading_zeros() as i32;
    let p = log2 - 13;
    let n = 11 - log2;
    let mantissa = if n < 0 { step >> -n } else { step << n };
    StepSize {
        exponent: (numbps - p).clamp(0, 31) as u8,
        mantissa: (mantissa & 0x7FF) as u16,
    }
}

/// Fills the step size of every band of `tccp` for samples of `precision` bits.
pub fn calc_step_sizes(tccp: &mut TileComponentCodingParams, precision: u8) {
    let num_bands = (3 * tccp.num_resolutions).saturating_sub(2) as usize;
    for band in 0..num_bands {
        let resolution = if band == 0 { 0 } else { (band as u32 - 1) / 3 + 1 };
        let orientation = if band == 0 { 0 } else { (band - 1) % 3 + 1 };
        let level = tccp.num_resolutions - 1 - resolution;
        let gain = if tccp.qmfbid == TRANSFORM_IRREVERSIBLE_9_7 {
            0
        } else {
            reversible_gain(orientation)
        };
        let step = if tccp.quantization_style == QuantizationStyle::NoQuantization {
            1.0
        } else {
            (1u64 << gain) as f64 / irreversible_norm(level, orientation)
        };
        tccp.step_sizes[band] =
            encode_step_size((step * 8192.0).floor() as i32, precision as i32 + gain as i32);
    }
    if tccp.quantization_style == QuantizationStyle::ScalarDerived {
        tccp.expand_derived_step_sizes();
    }
    tccp.num_step_sizes = tccp.signalled_step_sizes() as u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::params::TRANSFORM_REVERSIBLE_5_3;

    #[test]
    fn test_encode_step_size() {
        // 1.0 in 1/8192 units: exponent = numbps, no mantissa.
        assert_eq!(
            encode_step_size(8192, 8),
            StepSize {
                exponent: 8,
                mantissa: 0
            }
        );
        // 1.5 -> mantissa 0.5 * 2048.
        assert_eq!(
            encode_step_size(12288, 8),
            StepSize {
                exponent: 8,
                mantissa: 1024
            }
        );
    }

    #[test]
    fn test_reversible_exponents_follow_gain() {
        let mut tccp = TileComponentCodingParams {
            num_resolutions: 2,
            qmfbid: TRANSFORM_REVERSIBLE_5_3,
            ..Default::default()
        };
        calc_step_sizes(&mut tccp, 8);
        let exponents: Vec<u8> = tccp.step_sizes[..4].iter().map(|s| s.exponent).collect();
        assert_eq!(exponents, vec![8, 9, 9, 10]);
        assert_eq!(tccp.num_step_sizes, 4);
    }

    #[test]
    fn test_irreversible_derived() {
        let mut tccp = TileComponentCodingParams {
            num_resolutions: 5,
            qmfbid: TRANSFORM_IRREVERSIBLE_9_7,
            quantization_style: QuantizationStyle::ScalarDerived,
            ..Default::default()
        };
        calc_step_sizes(&mut tccp, 8);
        assert_eq!(tccp.num_step_sizes, 1);
        // LL at level 4: 1 / 16.90 is just below 2^-4.
        assert_eq!(tccp.step_sizes[0].exponent, 13);
        assert!(tccp.step_sizes[0].mantissa > 0);
    }
}
