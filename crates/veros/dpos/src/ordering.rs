//! Weight-ordered addresses for election and kick-out

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An address paired with its election weight.
///
/// During election the weight is the sum of the delegated balances pointing
/// at a candidate; during kick-out it is the number of blocks a validator
/// minted in the judged epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedAddress {
    /// Candidate or validator address
    pub address: Address,
    /// Stake-weighted votes, or a mint count widened to a weight
    pub weight: U256,
}

impl WeightedAddress {
    /// Pair an address with a weight
    pub fn new(address: Address, weight: U256) -> Self {
        Self { address, weight }
    }
}

/// The protocol's total order: strictly greater weight ranks earlier; on
/// equal weight the lexicographically smaller address ranks earlier.
///
/// Sorting a slice of `WeightedAddress` ascending therefore yields the
/// election order directly. Both orderings must agree bit-for-bit across
/// nodes; the address tie-break compares the raw bytes, which coincides with
/// comparing the lowercase hex rendering.
impl Ord for WeightedAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .weight
            .cmp(&self.weight)
            .then_with(|| self.address.cmp(&other.address))
    }
}

impl PartialOrd for WeightedAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
