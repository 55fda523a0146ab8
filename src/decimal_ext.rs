use rust_decimal::Decimal;

/// Rounds `price` to the nearest multiple of `tick_size`. A zero or
/// negative tick size is treated as "no quantization" (returns `price`
/// unchanged) rather than dividing by zero.
pub fn round_to_tick(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_sign_negative() || tick_size.is_zero() {
        return price;
    }
    (price / tick_size).round() * tick_size
}

/// Percentage distance between two prices, per §4.1's "too-close"
/// definition: `|p1 - p2| / min(p1, p2) * 100`. Percent arithmetic is
/// allowed to use doubles per §9; only final tick rounding stays exact.
pub fn percent_distance(p1: Decimal, p2: Decimal) -> f64 {
    let lo = p1.min(p2);
    if lo.is_zero() {
        return f64::INFINITY;
    }
    let diff = (p1 - p2).abs();
    (diff / lo * Decimal::ONE_HUNDRED)
        .to_string()
        .parse::<f64>()
        .unwrap_or(f64::INFINITY)
}

/// Whether two prices are "too close" at the given grid step (percent),
/// i.e. `percent_distance(p1, p2) < grid_step / 4`.
pub fn is_too_close(p1: Decimal, p2: Decimal, grid_step: f64) -> bool {
    percent_distance(p1, p2) < grid_step / 4.0
}

/// Percentage distance of `price` from `reference`, per §8's placement-gate
/// definition: `|price - reference| / reference * 100`. Unlike
/// `percent_distance`, the denominator is always `reference` (last_close),
/// never `min(price, reference)`.
pub fn percent_distance_from(price: Decimal, reference: Decimal) -> f64 {
    if reference.is_zero() {
        return f64::INFINITY;
    }
    let diff = (price - reference).abs();
    (diff / reference * Decimal::ONE_HUNDRED).to_string().parse::<f64>().unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_tick_basic() {
        assert_eq!(round_to_tick(dec!(100000.07), dec!(0.1)), dec!(100000.1));
        assert_eq!(round_to_tick(dec!(100000.04), dec!(0.1)), dec!(100000.0));
    }

    #[test]
    fn test_round_to_tick_zero_tick_is_noop() {
        assert_eq!(round_to_tick(dec!(100000.07), Decimal::ZERO), dec!(100000.07));
    }

    #[test]
    fn test_too_close() {
        // 0.05% apart, grid_step 0.2 -> threshold 0.05: boundary, not < strictly
        assert!(!is_too_close(dec!(100000), dec!(100050), 0.2));
        assert!(is_too_close(dec!(100000), dec!(100010), 0.2));
    }

    #[test]
    fn test_percent_distance_from_uses_reference_as_denominator() {
        // |99000 - 100000| / 100000 * 100 = 1.0, not /99000
        assert_eq!(percent_distance_from(dec!(99000), dec!(100000)), 1.0);
    }
}
