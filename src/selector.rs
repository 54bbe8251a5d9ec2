// Weighted draw used by spin wheels.

use crate::error::GameError;

/// Slack allowed when checking that a wheel's probabilities do not exceed 1
const PROBABILITY_EPSILON: f64 = 1e-9;

/// Anything carrying a draw probability in [0, 1]
pub trait Weighted {
    fn probability(&self) -> f64;
}

/// How a wheel's probabilities add up
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WheelBalance {
    /// Probabilities sum to 1
    Exact,
    /// Probabilities sum to less than 1; draws landing in the missing
    /// share fall back to the first item
    Skewed { missing: f64 },
}

/// Pick the item whose cumulative range `[c, c + p)` contains `r`.
///
/// Ranges are laid out in list order. When no range contains `r` (the
/// probabilities add up to less than 1) the first item is returned, which
/// biases the wheel toward it. Returns `None` only for an empty list.
pub fn select_reward_item<T: Weighted>(items: &[T], r: f64) -> Option<&T> {
    let first = items.first()?;

    let mut cumulative = 0.0;
    for item in items {
        let start = cumulative;
        let end = cumulative + item.probability();
        if r >= start && r < end {
            return Some(item);
        }
        cumulative = end;
    }

    Some(first)
}

/// Check a wheel's probabilities before they are stored.
/// Each must be finite and within [0, 1] and the total must not exceed 1.
pub fn validate_probabilities(
    probabilities: impl IntoIterator<Item = f64>,
) -> Result<WheelBalance, GameError> {
    let mut total = 0.0;
    for (position, p) in probabilities.into_iter().enumerate() {
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(GameError::InvalidProbability(format!(
                "{} at position {}",
                p, position
            )));
        }
        total += p;
    }

    if total > 1.0 + PROBABILITY_EPSILON {
        return Err(GameError::InvalidProbability(format!(
            "total {:.4} exceeds 1",
            total
        )));
    }

    if total < 1.0 - PROBABILITY_EPSILON {
        Ok(WheelBalance::Skewed { missing: 1.0 - total })
    } else {
        Ok(WheelBalance::Exact)
    }
}

/// A quantity-limited item (max > 0) is available while current < max
pub fn has_stock(max_quantity: Option<u32>, current_quantity: Option<u32>) -> bool {
    match max_quantity {
        Some(max) if max > 0 => current_quantity.unwrap_or(0) < max,
        _ => true,
    }
}

/// Quantity after one more unit is handed out
pub fn next_quantity(max_quantity: Option<u32>, current_quantity: Option<u32>) -> Option<u32> {
    match max_quantity {
        Some(max) if max > 0 => Some(current_quantity.unwrap_or(0).saturating_add(1)),
        _ => current_quantity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Slice {
        label: &'static str,
        p: f64,
    }

    impl Weighted for Slice {
        fn probability(&self) -> f64 {
            self.p
        }
    }

    fn slice(label: &'static str, p: f64) -> Slice {
        Slice { label, p }
    }

    #[test]
    fn test_even_split() {
        let items = [slice("100xp", 0.5), slice("200xp", 0.5)];
        assert_eq!(select_reward_item(&items, 0.6).unwrap().label, "200xp");
        assert_eq!(select_reward_item(&items, 0.3).unwrap().label, "100xp");
    }

    #[test]
    fn test_boundaries() {
        let items = [slice("a", 0.2), slice("b", 0.3), slice("c", 0.5)];
        assert_eq!(select_reward_item(&items, 0.0).unwrap().label, "a");
        // ranges are half-open: 0.2 belongs to the second slice
        assert_eq!(select_reward_item(&items, 0.2).unwrap().label, "b");
        assert_eq!(select_reward_item(&items, 0.999_999).unwrap().label, "c");
    }

    #[test]
    fn test_single_item_always_wins() {
        let items = [slice("only", 0.25)];
        for r in [0.0, 0.1, 0.24, 0.5, 0.99] {
            assert_eq!(select_reward_item(&items, r).unwrap().label, "only");
        }
    }

    #[test]
    fn test_short_total_falls_back_to_first() {
        // Known skew: anything past 0.5 lands on the first slice
        let items = [slice("first", 0.25), slice("second", 0.25)];
        assert_eq!(select_reward_item(&items, 0.9).unwrap().label, "first");
        assert_eq!(select_reward_item(&items, 0.3).unwrap().label, "second");
    }

    #[test]
    fn test_zero_probability_never_selected_directly() {
        let items = [slice("common", 0.7), slice("never", 0.0), slice("rare", 0.3)];
        assert_eq!(select_reward_item(&items, 0.7).unwrap().label, "rare");
    }

    #[test]
    fn test_empty_list() {
        let items: [Slice; 0] = [];
        assert!(select_reward_item(&items, 0.4).is_none());
    }

    #[test]
    fn test_validate_probabilities() {
        assert_eq!(validate_probabilities([0.5, 0.5]), Ok(WheelBalance::Exact));
        assert_eq!(validate_probabilities([0.1, 0.2, 0.7]), Ok(WheelBalance::Exact));

        match validate_probabilities([0.25, 0.25]) {
            Ok(WheelBalance::Skewed { missing }) => assert!((missing - 0.5).abs() < 1e-12),
            other => panic!("expected skewed wheel, got {:?}", other),
        }

        assert!(validate_probabilities([0.6, 0.6]).is_err());
        assert!(validate_probabilities([-0.1, 0.5]).is_err());
        assert!(validate_probabilities([f64::NAN]).is_err());
        assert!(validate_probabilities([1.5]).is_err());
    }

    #[test]
    fn test_stock_tracking() {
        assert!(has_stock(None, None));
        assert!(has_stock(Some(0), Some(50)));
        assert!(has_stock(Some(3), None));
        assert!(has_stock(Some(3), Some(2)));
        assert!(!has_stock(Some(3), Some(3)));

        assert_eq!(next_quantity(Some(3), None), Some(1));
        assert_eq!(next_quantity(Some(3), Some(2)), Some(3));
        assert_eq!(next_quantity(None, None), None);
        assert_eq!(next_quantity(Some(0), Some(4)), Some(4));
    }
}
