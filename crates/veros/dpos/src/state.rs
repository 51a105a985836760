//! Read access to account balances

use alloy_primitives::{Address, U256};
use std::collections::BTreeMap;

/// Balance view over a state snapshot.
///
/// Vote tallying reads each delegator's present balance through this seam;
/// it never caches across calls and never writes.
pub trait StateView {
    /// Current balance of `address`; unknown accounts hold zero
    fn balance(&self, address: Address) -> U256;
}

/// In-memory balance table
#[derive(Debug, Clone, Default)]
pub struct MemState {
    balances: BTreeMap<Address, U256>,
}

impl MemState {
    /// Empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the balance of `address`
    pub fn set_balance(&mut self, address: Address, balance: U256) {
        self.balances.insert(address, balance);
    }
}

impl StateView for MemState {
    fn balance(&self, address: Address) -> U256 {
        self.balances.get(&address).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_account_is_zero() {
        let state = MemState::new();
        assert_eq!(state.balance(Address::repeat_byte(0x01)), U256::ZERO);
    }

    #[test]
    fn test_set_and_read() {
        let mut state = MemState::new();
        state.set_balance(Address::repeat_byte(0x01), U256::from(42u64));

        assert_eq!(state.balance(Address::repeat_byte(0x01)), U256::from(42u64));
        assert_eq!(state.balance(Address::repeat_byte(0x02)), U256::ZERO);
    }
}
