//! Veros DPoS Epoch Layer
//!
//! This crate implements the epoch-boundary state transitions of the Veros
//! delegated proof-of-stake engine:
//!
//! ```text
//! Epoch Boundary Flow:
//!
//! 1. First block of a new epoch triggers election (EpochContext::try_elect)
//! 2. Under-producing validators of the previous epoch are kicked out
//! 3. Delegator balances are tallied per candidate
//! 4. Top candidates by weight become the slate, deterministically shuffled
//!    with a seed derived from the parent block hash and epoch number
//! 5. During the epoch, lookup_validator maps a timestamp to the validator
//!    that owns the current block slot
//! ```
//!
//! The crate owns no database and no networking: the index tries, the
//! account state and the block headers are collaborators reached through the
//! [`Trie`], [`StateView`] and `alloy_consensus::Header` seams. Everything
//! here is deterministic; two nodes running the same inputs install
//! byte-identical slates.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod context;
pub mod epoch;
pub mod ordering;
pub mod shuffle;
pub mod state;
pub mod trie;

pub use context::DposContext;
pub use epoch::EpochContext;
pub use ordering::WeightedAddress;
pub use shuffle::{seed_for_epoch, ShuffleRng};
pub use state::{MemState, StateView};
pub use trie::{MemTrie, StorageError, Trie, TrieIter};

use alloy_primitives::Address;
use thiserror::Error;

/// Protocol constants, in seconds unless noted
pub mod config {
    /// Duration of one epoch
    pub const EPOCH_INTERVAL: i64 = 86_400;

    /// Duration of one block slot
    pub const BLOCK_INTERVAL: i64 = 10;

    /// Upper bound on the active validator set
    pub const MAX_VALIDATOR_SIZE: usize = 21;

    /// Minimum candidate count that must survive kick-out
    pub const SAFE_SIZE: usize = MAX_VALIDATOR_SIZE * 2 / 3 + 1;
}

/// Epoch-layer errors
#[derive(Debug, Error)]
pub enum DposError {
    /// The candidate set is empty; nothing can be tallied or elected
    #[error("no candidates registered")]
    NoCandidates,

    /// The current validator slate is empty
    #[error("no validators in the current slate")]
    NoValidators,

    /// Fewer candidates than the protocol floor after tallying
    #[error("too few candidates: got {got}, need {need}")]
    TooFewCandidates {
        /// Candidates found by the tally
        got: usize,
        /// Required minimum (`config::SAFE_SIZE`)
        need: usize,
    },

    /// Timestamp does not align with a block slot boundary
    #[error("timestamp {0} is not a valid mint time")]
    InvalidMintTime(i64),

    /// Delegation target is not a registered candidate
    #[error("unknown candidate {0}")]
    UnknownCandidate(Address),

    /// Undelegation does not match the delegator's recorded vote
    #[error("delegator {delegator} has no vote for candidate {candidate}")]
    NoSuchVote {
        /// Delegator attempting to withdraw
        delegator: Address,
        /// Candidate the withdrawal named
        candidate: Address,
    },

    /// Failure surfaced from the index tries or the state database
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_values() {
        assert_eq!(config::EPOCH_INTERVAL, 86_400);
        assert_eq!(config::BLOCK_INTERVAL, 10);
        assert_eq!(config::MAX_VALIDATOR_SIZE, 21);
        assert_eq!(config::SAFE_SIZE, 15);
    }

    #[test]
    fn test_error_display() {
        let err = DposError::TooFewCandidates { got: 3, need: 15 };
        assert_eq!(err.to_string(), "too few candidates: got 3, need 15");

        let err = DposError::InvalidMintTime(35);
        assert_eq!(err.to_string(), "timestamp 35 is not a valid mint time");
    }
}
