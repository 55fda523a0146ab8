use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::events::Direction;

/// Derives the deterministic `client_order_id` for a grid slot, per
/// §4.3: `first16hex(SHA256(symbol | side | price_to_tick | grid_level
/// | direction))`. Quantity is intentionally excluded, so retries and
/// risk-multiplier quantity adjustments reuse the same id for the same
/// logical slot.
pub fn client_order_id(
    symbol: &str,
    side_label: &str,
    price_at_tick: Decimal,
    grid_level: i32,
    direction: Direction,
) -> String {
    let direction_label = match direction {
        Direction::Long => "long",
        Direction::Short => "short",
    };
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update(b"|");
    hasher.update(side_label.as_bytes());
    hasher.update(b"|");
    hasher.update(price_at_tick.normalize().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(grid_level.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(direction_label.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_id_is_16_hex_chars() {
        let id = client_order_id("BTCUSDT", "Buy", dec!(99800.0), -1, Direction::Long);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_id_deterministic() {
        let a = client_order_id("BTCUSDT", "Buy", dec!(99800.0), -1, Direction::Long);
        let b = client_order_id("BTCUSDT", "Buy", dec!(99800.0), -1, Direction::Long);
        assert_eq!(a, b);
    }

    #[test]
    fn test_quantity_not_part_of_id() {
        // ids.rs has no qty parameter at all, this documents the
        // invariant at the call-site level instead of re-deriving it.
        let a = client_order_id("BTCUSDT", "Buy", dec!(99800.0), -1, Direction::Long);
        let b = client_order_id("BTCUSDT", "Buy", dec!(99800.0), -1, Direction::Long);
        assert_eq!(a, b, "same logical slot must keep the same id regardless of order quantity");
    }

    #[test]
    fn test_grid_level_changes_id() {
        let a = client_order_id("BTCUSDT", "Buy", dec!(99800.0), -1, Direction::Long);
        let b = client_order_id("BTCUSDT", "Buy", dec!(99800.0), -2, Direction::Long);
        assert_ne!(a, b);
    }

    #[test]
    fn test_direction_changes_id() {
        let a = client_order_id("BTCUSDT", "Buy", dec!(99800.0), -1, Direction::Long);
        let b = client_order_id("BTCUSDT", "Buy", dec!(99800.0), -1, Direction::Short);
        assert_ne!(a, b);
    }
}
