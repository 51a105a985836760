//! The five epoch indices and their persisted layouts
//!
//! A [`DposContext`] bundles the index tries the epoch layer works over:
//!
//! | Trie        | Key → Value                                              |
//! |-------------|----------------------------------------------------------|
//! | epoch       | `b"validator"` → concatenated 20-byte slate addresses    |
//! | candidate   | candidate → candidate (self-marker)                      |
//! | delegate    | candidate ‖ delegator → delegator                        |
//! | vote        | delegator → candidate                                    |
//! | mint count  | big-endian u64 epoch ‖ validator → big-endian u64 count  |
//!
//! The key layouts are consensus-critical: every node must produce the same
//! bytes for the same logical entry.

use alloy_primitives::Address;

use crate::trie::{MemTrie, StorageError, Trie};
use crate::DposError;

/// Width of an address in every persisted key and value
pub const ADDRESS_LEN: usize = 20;

/// Epoch-trie key holding the active slate
const VALIDATOR_KEY: &[u8] = b"validator";

/// Mint-count key: 8-byte big-endian epoch followed by the validator address
pub fn mint_cnt_key(epoch: i64, validator: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + ADDRESS_LEN);
    key.extend_from_slice(&(epoch as u64).to_be_bytes());
    key.extend_from_slice(validator.as_slice());
    key
}

/// Delegate-trie key: candidate followed by delegator
pub fn delegate_key(candidate: Address, delegator: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ADDRESS_LEN);
    key.extend_from_slice(candidate.as_slice());
    key.extend_from_slice(delegator.as_slice());
    key
}

/// Decode a stored address, surfacing wrong-width values as corruption
pub(crate) fn decode_address(key: &[u8], value: &[u8]) -> Result<Address, StorageError> {
    Address::try_from(value)
        .map_err(|_| StorageError::corrupt(key, format!("expected a {ADDRESS_LEN}-byte address")))
}

/// Exclusive handle over the five epoch indices.
///
/// The epoch layer reads the candidate, delegate and mint-count tries,
/// mutates the candidate/delegate/vote tries through kick-out, and replaces
/// the epoch trie wholesale at election. The transaction-driven mutations
/// ([`become_candidate`](Self::become_candidate),
/// [`delegate`](Self::delegate), [`undelegate`](Self::undelegate)) and the
/// sealing path's [`incr_mint_cnt`](Self::incr_mint_cnt) live here too so the
/// indices are always written through one schema.
#[derive(Debug, Clone, Default)]
pub struct DposContext<T: Trie = MemTrie> {
    epoch_trie: T,
    candidate_trie: T,
    delegate_trie: T,
    vote_trie: T,
    mint_cnt_trie: T,
}

impl<T: Trie + Default> DposContext<T> {
    /// Context with five empty indices
    pub fn new() -> Self {
        Self {
            epoch_trie: T::default(),
            candidate_trie: T::default(),
            delegate_trie: T::default(),
            vote_trie: T::default(),
            mint_cnt_trie: T::default(),
        }
    }
}

impl<T: Trie> DposContext<T> {
    /// Current validator slate trie
    pub fn epoch_trie(&self) -> &T {
        &self.epoch_trie
    }

    /// Registered candidates
    pub fn candidate_trie(&self) -> &T {
        &self.candidate_trie
    }

    /// Who has voted for whom
    pub fn delegate_trie(&self) -> &T {
        &self.delegate_trie
    }

    /// Each delegator's current pick
    pub fn vote_trie(&self) -> &T {
        &self.vote_trie
    }

    /// Blocks minted per (epoch, validator)
    pub fn mint_cnt_trie(&self) -> &T {
        &self.mint_cnt_trie
    }

    /// Replace the epoch trie wholesale; the old one is dropped
    pub fn set_epoch(&mut self, trie: T) {
        self.epoch_trie = trie;
    }

    /// Decode the active slate; an absent entry is an empty slate
    pub fn validators(&self) -> Result<Vec<Address>, StorageError> {
        let Some(raw) = self.epoch_trie.get(VALIDATOR_KEY)? else {
            return Ok(Vec::new());
        };
        if raw.len() % ADDRESS_LEN != 0 {
            return Err(StorageError::corrupt(
                VALIDATOR_KEY,
                format!("slate length {} is not a multiple of {ADDRESS_LEN}", raw.len()),
            ));
        }
        Ok(raw
            .chunks_exact(ADDRESS_LEN)
            .map(Address::from_slice)
            .collect())
    }

    /// Install a slate as the ordered validator sequence
    pub fn set_validators(&mut self, validators: &[Address]) -> Result<(), StorageError> {
        let mut raw = Vec::with_capacity(validators.len() * ADDRESS_LEN);
        for validator in validators {
            raw.extend_from_slice(validator.as_slice());
        }
        self.epoch_trie.update(VALIDATOR_KEY, &raw)
    }

    /// Register `candidate` as eligible for election
    pub fn become_candidate(&mut self, candidate: Address) -> Result<(), StorageError> {
        self.candidate_trie
            .update(candidate.as_slice(), candidate.as_slice())
    }

    /// Cast `delegator`'s balance-weighted vote for `candidate`.
    ///
    /// A previous vote is withdrawn first; a delegator backs exactly one
    /// candidate at a time.
    pub fn delegate(&mut self, delegator: Address, candidate: Address) -> Result<(), DposError> {
        if self.candidate_trie.get(candidate.as_slice())?.is_none() {
            return Err(DposError::UnknownCandidate(candidate));
        }
        if let Some(old) = self.vote_trie.get(delegator.as_slice())? {
            let old = decode_address(delegator.as_slice(), &old)?;
            self.delegate_trie.delete(&delegate_key(old, delegator))?;
        }
        self.delegate_trie
            .update(&delegate_key(candidate, delegator), delegator.as_slice())?;
        self.vote_trie
            .update(delegator.as_slice(), candidate.as_slice())?;
        Ok(())
    }

    /// Withdraw `delegator`'s vote; it must currently point at `candidate`
    pub fn undelegate(&mut self, delegator: Address, candidate: Address) -> Result<(), DposError> {
        let vote = self
            .vote_trie
            .get(delegator.as_slice())?
            .map(|raw| decode_address(delegator.as_slice(), &raw))
            .transpose()?;
        if vote != Some(candidate) {
            return Err(DposError::NoSuchVote {
                delegator,
                candidate,
            });
        }
        self.delegate_trie
            .delete(&delegate_key(candidate, delegator))?;
        self.vote_trie.delete(delegator.as_slice())?;
        Ok(())
    }

    /// Remove `candidate` from the candidate set and drop every delegation
    /// pointing at it, including the delegators' vote entries.
    pub fn kickout_candidate(&mut self, candidate: Address) -> Result<(), StorageError> {
        self.candidate_trie.delete(candidate.as_slice())?;

        let mut delegations = Vec::new();
        for entry in self.delegate_trie.iter_prefix(candidate.as_slice()) {
            let (key, value) = entry?;
            let delegator = decode_address(&key, &value)?;
            delegations.push((key, delegator));
        }
        for (key, delegator) in delegations {
            self.delegate_trie.delete(&key)?;
            if let Some(vote) = self.vote_trie.get(delegator.as_slice())? {
                if vote == candidate.as_slice() {
                    self.vote_trie.delete(delegator.as_slice())?;
                }
            }
        }
        Ok(())
    }

    /// Blocks `validator` minted in `epoch`; absent means zero
    pub fn mint_cnt(&self, epoch: i64, validator: Address) -> Result<u64, StorageError> {
        let key = mint_cnt_key(epoch, validator);
        let Some(raw) = self.mint_cnt_trie.get(&key)? else {
            return Ok(0);
        };
        let raw: [u8; 8] = raw
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::corrupt(&key, "expected an 8-byte big-endian counter"))?;
        Ok(u64::from_be_bytes(raw))
    }

    /// Credit one sealed block to `validator` for `epoch`
    pub fn incr_mint_cnt(&mut self, epoch: i64, validator: Address) -> Result<(), StorageError> {
        let cnt = self.mint_cnt(epoch, validator)?;
        self.mint_cnt_trie.update(
            &mint_cnt_key(epoch, validator),
            &(cnt + 1).to_be_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn test_mint_cnt_key_layout() {
        let key = mint_cnt_key(3, addr(0xab));

        assert_eq!(key.len(), 28);
        assert_eq!(&key[..8], &[0, 0, 0, 0, 0, 0, 0, 3]);
        assert_eq!(&key[8..], addr(0xab).as_slice());
    }

    #[test]
    fn test_delegate_key_layout() {
        let key = delegate_key(addr(0x01), addr(0x02));

        assert_eq!(key.len(), 40);
        assert_eq!(&key[..20], addr(0x01).as_slice());
        assert_eq!(&key[20..], addr(0x02).as_slice());
    }

    #[test]
    fn test_slate_round_trip() {
        let mut ctx = DposContext::<MemTrie>::new();
        assert!(ctx.validators().unwrap().is_empty());

        let slate = vec![addr(0x01), addr(0x03), addr(0x02)];
        ctx.set_validators(&slate).unwrap();

        // Order is preserved, not sorted
        assert_eq!(ctx.validators().unwrap(), slate);
    }

    #[test]
    fn test_corrupt_slate_is_an_error() {
        let mut ctx = DposContext::<MemTrie>::new();
        ctx.epoch_trie.update(VALIDATOR_KEY, &[0u8; 21]).unwrap();

        assert!(matches!(
            ctx.validators(),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_mint_cnt_absent_is_zero() {
        let ctx = DposContext::<MemTrie>::new();
        assert_eq!(ctx.mint_cnt(7, addr(0x01)).unwrap(), 0);
    }

    #[test]
    fn test_incr_mint_cnt() {
        let mut ctx = DposContext::<MemTrie>::new();
        ctx.incr_mint_cnt(7, addr(0x01)).unwrap();
        ctx.incr_mint_cnt(7, addr(0x01)).unwrap();
        ctx.incr_mint_cnt(8, addr(0x01)).unwrap();

        assert_eq!(ctx.mint_cnt(7, addr(0x01)).unwrap(), 2);
        assert_eq!(ctx.mint_cnt(8, addr(0x01)).unwrap(), 1);
        assert_eq!(ctx.mint_cnt(7, addr(0x02)).unwrap(), 0);
    }

    #[test]
    fn test_delegate_requires_candidate() {
        let mut ctx = DposContext::<MemTrie>::new();

        assert!(matches!(
            ctx.delegate(addr(0x10), addr(0x01)),
            Err(DposError::UnknownCandidate(_))
        ));
    }

    #[test]
    fn test_delegate_moves_an_existing_vote() {
        let mut ctx = DposContext::<MemTrie>::new();
        ctx.become_candidate(addr(0x01)).unwrap();
        ctx.become_candidate(addr(0x02)).unwrap();

        ctx.delegate(addr(0x10), addr(0x01)).unwrap();
        ctx.delegate(addr(0x10), addr(0x02)).unwrap();

        // The old delegation is gone, the new one present
        assert_eq!(
            ctx.delegate_trie()
                .get(&delegate_key(addr(0x01), addr(0x10)))
                .unwrap(),
            None
        );
        assert_eq!(
            ctx.delegate_trie()
                .get(&delegate_key(addr(0x02), addr(0x10)))
                .unwrap(),
            Some(addr(0x10).as_slice().to_vec())
        );
        assert_eq!(
            ctx.vote_trie().get(addr(0x10).as_slice()).unwrap(),
            Some(addr(0x02).as_slice().to_vec())
        );
    }

    #[test]
    fn test_undelegate_requires_matching_vote() {
        let mut ctx = DposContext::<MemTrie>::new();
        ctx.become_candidate(addr(0x01)).unwrap();
        ctx.become_candidate(addr(0x02)).unwrap();
        ctx.delegate(addr(0x10), addr(0x01)).unwrap();

        assert!(matches!(
            ctx.undelegate(addr(0x10), addr(0x02)),
            Err(DposError::NoSuchVote { .. })
        ));

        ctx.undelegate(addr(0x10), addr(0x01)).unwrap();
        assert_eq!(ctx.vote_trie().get(addr(0x10).as_slice()).unwrap(), None);
    }

    #[test]
    fn test_kickout_candidate_cleans_all_indices() {
        let mut ctx = DposContext::<MemTrie>::new();
        ctx.become_candidate(addr(0x01)).unwrap();
        ctx.become_candidate(addr(0x02)).unwrap();
        ctx.delegate(addr(0x10), addr(0x01)).unwrap();
        ctx.delegate(addr(0x11), addr(0x01)).unwrap();
        ctx.delegate(addr(0x12), addr(0x02)).unwrap();

        ctx.kickout_candidate(addr(0x01)).unwrap();

        assert_eq!(ctx.candidate_trie().get(addr(0x01).as_slice()).unwrap(), None);
        assert_eq!(ctx.delegate_trie().iter_prefix(addr(0x01).as_slice()).count(), 0);
        assert_eq!(ctx.vote_trie().get(addr(0x10).as_slice()).unwrap(), None);
        assert_eq!(ctx.vote_trie().get(addr(0x11).as_slice()).unwrap(), None);

        // The other candidate's delegation is untouched
        assert_eq!(
            ctx.vote_trie().get(addr(0x12).as_slice()).unwrap(),
            Some(addr(0x02).as_slice().to_vec())
        );
    }
}
