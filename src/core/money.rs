//! Fixed-Point Money
//!
//! Park money is an integer count of tenths of the currency unit, so
//! balances stay exact and identical on every peer.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Money: i64, scale 10                                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  money(12, 50)   = 125      ->  "£12.50"                     │
//! │  money(-3, 0)    = -30      ->  "-£3.00"                     │
//! │  MONEY_UNDEFINED = i64::MIN ->  command failed               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

/// Money in tenths of the currency unit.
pub type Money = i64;

/// Tenths per currency unit.
pub const MONEY_SCALE: Money = 10;

/// Sentinel cost meaning "command failed".
///
/// Every side effect downstream of a command short-circuits on this value.
pub const MONEY_UNDEFINED: Money = Money::MIN;

/// Free.
pub const MONEY_FREE: Money = 0;

/// Build a money value from whole units and hundredths.
///
/// Hundredths are truncated to the stored tenths.
///
/// ```
/// use park_lockstep::core::money::money;
/// assert_eq!(money(12, 50), 125);
/// assert_eq!(money(0, 5), 0);
/// ```
#[inline]
pub const fn money(whole: i64, hundredths: i64) -> Money {
    whole * MONEY_SCALE + hundredths / 10
}

/// True unless `value` is the failure sentinel.
#[inline]
pub const fn is_defined(value: Money) -> bool {
    value != MONEY_UNDEFINED
}

/// Format a money value for display, e.g. `-£1,234.50`.
pub fn format_money(value: Money) -> String {
    MoneyDisplay(value).to_string()
}

/// `Display` adapter for [`Money`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoneyDisplay(pub Money);

impl fmt::Display for MoneyDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == MONEY_UNDEFINED {
            return f.write_str("(undefined)");
        }

        let negative = self.0 < 0;
        let magnitude = self.0.unsigned_abs();
        let whole = magnitude / MONEY_SCALE as u64;
        let tenths = magnitude % MONEY_SCALE as u64;

        let digits = whole.to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }

        if negative {
            f.write_str("-")?;
        }
        write!(f, "£{}.{}0", grouped, tenths)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_constructor() {
        assert_eq!(money(1, 0), 10);
        assert_eq!(money(12, 50), 125);
        assert_eq!(money(-3, 0), -30);
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(0), "£0.00");
        assert_eq!(format_money(money(12, 50)), "£12.50");
        assert_eq!(format_money(money(1234, 50)), "£1,234.50");
        assert_eq!(format_money(money(-3, 0)), "-£3.00");
        assert_eq!(format_money(money(1_000_000, 0)), "£1,000,000.00");
    }

    #[test]
    fn test_undefined() {
        assert!(!is_defined(MONEY_UNDEFINED));
        assert!(is_defined(0));
        assert_eq!(format_money(MONEY_UNDEFINED), "(undefined)");
    }
}
