//! Sample format conversion.

/// Convert f32 samples `[-1.0, 1.0]` to int16 by linear scaling, saturating
/// at the int16 range. No dithering is applied.
///
/// `1.0` maps to `32767`, `-1.0` to `-32768`, `0.0` to `0`; out-of-range
/// input clamps to the nearest bound.
pub fn f32_to_i16_saturating(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let scaled = (f64::from(s) * 32768.0) as i64;
            scaled.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_at_int16_bounds() {
        assert_eq!(f32_to_i16_saturating(&[1.0]), vec![32767]);
        assert_eq!(f32_to_i16_saturating(&[-1.0]), vec![-32768]);
        assert_eq!(f32_to_i16_saturating(&[2.0]), vec![32767]);
        assert_eq!(f32_to_i16_saturating(&[-2.0]), vec![-32768]);
    }

    #[test]
    fn zero_maps_to_zero() {
        assert_eq!(f32_to_i16_saturating(&[0.0]), vec![0]);
    }

    #[test]
    fn scales_linearly_in_range() {
        assert_eq!(f32_to_i16_saturating(&[0.5]), vec![16384]);
        assert_eq!(f32_to_i16_saturating(&[-0.5]), vec![-16384]);
    }
}
