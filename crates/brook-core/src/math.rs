//! Gain math.
//!
//! - [`db_to_linear`] / [`linear_to_db`] - convert between dB and linear gain

/// Convert decibels to linear gain.
///
/// # Example
/// ```rust
/// use brook_core::db_to_linear;
///
/// assert!((db_to_linear(0.0) - 1.0).abs() < 0.001);
/// assert!((db_to_linear(-6.02) - 0.5).abs() < 0.01);
/// ```
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    // 10^(dB/20) = e^(dB * ln(10)/20)
    const FACTOR: f32 = std::f32::consts::LN_10 / 20.0;
    (db * FACTOR).exp()
}

/// Convert linear gain to decibels.
///
/// # Example
/// ```rust
/// use brook_core::linear_to_db;
///
/// assert!((linear_to_db(1.0) - 0.0).abs() < 0.001);
/// assert!((linear_to_db(0.5) - (-6.02)).abs() < 0.01);
/// ```
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    // 20 * log10(linear) = 20 * ln(linear) / ln(10)
    const FACTOR: f32 = 20.0 / std::f32::consts::LN_10;
    linear.max(1e-10).ln() * FACTOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_linear_round_trip() {
        for db in [-60.0f32, -9.0, -3.0, 0.0, 6.0, 20.0] {
            let back = linear_to_db(db_to_linear(db));
            assert!((back - db).abs() < 0.01, "{db} -> {back}");
        }
    }

    #[test]
    fn nine_db_down() {
        // -9 dB total, the cascade of 0 dB + -6 dB + -3 dB.
        let linear = db_to_linear(-9.0);
        assert!((linear - 10f32.powf(-9.0 / 20.0)).abs() < 1e-6);
    }

    #[test]
    fn zero_linear_is_floor_not_nan() {
        assert!(linear_to_db(0.0).is_finite());
    }
}
