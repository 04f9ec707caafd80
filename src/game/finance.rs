//! Park Finances and the Affordability Gate
//!
//! [`FinanceGate::check_afford`] is a pure check run between a command's
//! validation and apply phases. The balance itself only moves through
//! [`Finances::apply_payment`], called once a top-level command commits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::money::{format_money, Money};
use crate::game::command::{CommandError, CommandFlags, ErrorBody};

/// Spending categories tracked in the finance ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExpenditureType {
    /// Building rides and track
    #[default]
    RideConstruction = 0,
    /// Ride upkeep
    RideRunningCosts = 1,
    /// Land and construction rights
    LandPurchase = 2,
    /// Terraforming, scenery, paths
    Landscaping = 3,
    /// Park admission income
    ParkEntranceTickets = 4,
    /// Ride ticket income
    ParkRideTickets = 5,
    /// Shop income
    ShopSales = 6,
    /// Shop stock
    ShopStock = 7,
    /// Food and drink income
    FoodDrinkSales = 8,
    /// Food and drink stock
    FoodDrinkStock = 9,
    /// Staff wages
    Wages = 10,
    /// Marketing campaigns
    Marketing = 11,
    /// Research funding
    Research = 12,
    /// Loan interest
    Interest = 13,
}

impl ExpenditureType {
    /// Number of categories.
    pub const COUNT: usize = 14;
}

/// Treasury could not cover a command's cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsufficientFunds {
    /// Full cost of the command
    pub required: Money,
    /// Treasury at the time of the check
    pub available: Money,
}

impl fmt::Display for InsufficientFunds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "not enough cash: requires {}, have {}",
            format_money(self.required),
            format_money(self.available)
        )
    }
}

impl std::error::Error for InsufficientFunds {}

impl InsufficientFunds {
    /// Amount missing.
    pub fn shortfall(&self) -> Money {
        self.required.saturating_sub(self.available)
    }

    /// Error window content for this failure.
    pub fn to_command_error(&self, title: &str) -> CommandError {
        CommandError::new(
            title,
            ErrorBody::NotEnoughCash {
                required: self.required,
            },
        )
    }
}

/// Park treasury and ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finances {
    /// Cash in hand
    pub cash: Money,
    /// Park runs without money; everything is affordable and nothing is charged
    pub no_money: bool,
    /// Net spend per category this month (positive = spent)
    pub expenditure: [Money; ExpenditureType::COUNT],
}

impl Finances {
    /// Create with an opening balance.
    pub fn new(cash: Money) -> Self {
        Self {
            cash,
            ..Self::default()
        }
    }

    /// Deduct `cost` and record it against `category`.
    ///
    /// Negative costs are refunds.
    pub fn apply_payment(&mut self, cost: Money, category: ExpenditureType) {
        if self.no_money {
            return;
        }
        self.cash = self.cash.saturating_sub(cost);
        let entry = &mut self.expenditure[category as usize];
        *entry = entry.saturating_add(cost);
    }

    /// Net spend recorded against a category this month.
    pub fn spent_on(&self, category: ExpenditureType) -> Money {
        self.expenditure[category as usize]
    }

    /// Start a new month of the ledger.
    pub fn reset_month(&mut self) {
        self.expenditure = [0; ExpenditureType::COUNT];
    }
}

/// Affordability check with a configurable privileged bypass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinanceGate {
    /// Caller flags that skip the check
    pub privileged_flags: CommandFlags,
}

impl Default for FinanceGate {
    fn default() -> Self {
        Self {
            privileged_flags: CommandFlags::PRIVILEGED,
        }
    }
}

impl FinanceGate {
    /// Create a gate with a custom privileged bit set.
    pub fn new(privileged_flags: CommandFlags) -> Self {
        Self { privileged_flags }
    }

    #[inline]
    fn is_privileged(&self, caller_flags: CommandFlags) -> bool {
        caller_flags.intersects(self.privileged_flags)
    }

    /// Check that the treasury covers `cost`.
    ///
    /// Pure: never touches the balance.
    pub fn check_afford(
        &self,
        finances: &Finances,
        cost: Money,
        caller_flags: CommandFlags,
    ) -> Result<Money, InsufficientFunds> {
        if cost <= 0 || self.is_privileged(caller_flags) || finances.no_money {
            return Ok(cost);
        }
        if cost <= finances.cash {
            Ok(cost)
        } else {
            Err(InsufficientFunds {
                required: cost,
                available: finances.cash,
            })
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_insufficient_funds() {
        let gate = FinanceGate::default();
        let finances = Finances::new(100);
        let err = gate
            .check_afford(&finances, 150, CommandFlags::APPLY)
            .unwrap_err();
        assert_eq!(err.required, 150);
        assert_eq!(err.shortfall(), 50);
        assert_eq!(finances.cash, 100);
    }

    #[test]
    fn test_exact_balance_passes() {
        let gate = FinanceGate::default();
        assert_eq!(gate.check_afford(&Finances::new(100), 100, CommandFlags::APPLY), Ok(100));
    }

    #[test]
    fn test_refunds_always_pass() {
        let gate = FinanceGate::default();
        let broke = Finances::new(-500);
        assert_eq!(gate.check_afford(&broke, 0, CommandFlags::APPLY), Ok(0));
        assert_eq!(gate.check_afford(&broke, -40, CommandFlags::APPLY), Ok(-40));
    }

    #[test]
    fn test_privileged_bypass() {
        let gate = FinanceGate::default();
        let broke = Finances::new(0);
        assert!(gate.check_afford(&broke, 10, CommandFlags::BIT2).is_ok());
        assert!(gate.check_afford(&broke, 10, CommandFlags::BIT5).is_ok());

        let strict = FinanceGate::new(CommandFlags::BIT5);
        assert!(strict.check_afford(&broke, 10, CommandFlags::BIT2).is_err());
    }

    #[test]
    fn test_no_money_park() {
        let gate = FinanceGate::default();
        let mut finances = Finances::new(0);
        finances.no_money = true;
        assert!(gate.check_afford(&finances, 10_000, CommandFlags::APPLY).is_ok());
        finances.apply_payment(10_000, ExpenditureType::Landscaping);
        assert_eq!(finances.cash, 0);
    }

    #[test]
    fn test_apply_payment_ledger() {
        let mut finances = Finances::new(1000);
        finances.apply_payment(300, ExpenditureType::RideConstruction);
        finances.apply_payment(-50, ExpenditureType::RideConstruction);
        assert_eq!(finances.cash, 750);
        assert_eq!(finances.spent_on(ExpenditureType::RideConstruction), 250);
        finances.reset_month();
        assert_eq!(finances.spent_on(ExpenditureType::RideConstruction), 0);
    }

    #[test]
    fn test_error_message() {
        let err = InsufficientFunds { required: 150, available: 100 };
        assert_eq!(err.to_string(), "not enough cash: requires £15.00, have £10.00");
        let window = err.to_command_error("Can't build this here...");
        assert_eq!(window.body, ErrorBody::NotEnoughCash { required: 150 });
    }

    proptest! {
        #[test]
        fn prop_check_afford_is_idempotent(cash in -10_000i64..10_000, cost in -10_000i64..10_000, bits in 0u32..64) {
            let gate = FinanceGate::default();
            let finances = Finances::new(cash);
            let flags = CommandFlags::from_bits_truncate(bits);
            let first = gate.check_afford(&finances, cost, flags);
            let second = gate.check_afford(&finances, cost, flags);
            prop_assert_eq!(first, second);
            prop_assert_eq!(finances.cash, cash);
        }
    }
}
