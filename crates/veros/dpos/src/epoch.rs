//! Epoch-boundary transitions: tally, kick-out, election, slot lookup

use alloy_consensus::Header;
use alloy_primitives::{Address, U256};
use std::collections::BTreeMap;
use tracing::info;

use crate::config;
use crate::context::{decode_address, DposContext};
use crate::ordering::WeightedAddress;
use crate::shuffle::{seed_for_epoch, shuffle};
use crate::state::StateView;
use crate::trie::Trie;
use crate::DposError;

/// The epoch-layer facade.
///
/// Holds exclusive access to the [`DposContext`] indices and a read-only
/// state snapshot for the duration of one block-processing step. The caller
/// serialises calls and wraps them in its transaction boundary; nothing here
/// retries or rolls back on its own.
#[derive(Debug)]
pub struct EpochContext<'a, T: Trie, S: StateView> {
    /// Timestamp of the block being processed
    timestamp: i64,
    /// Timestamp of the chain's first non-genesis block
    time_of_first_block: i64,
    dpos: &'a mut DposContext<T>,
    state: &'a S,
}

impl<'a, T: Trie + Default, S: StateView> EpochContext<'a, T, S> {
    /// Facade over `dpos` and `state` for the block at `timestamp`
    pub fn new(
        timestamp: i64,
        time_of_first_block: i64,
        dpos: &'a mut DposContext<T>,
        state: &'a S,
    ) -> Self {
        Self {
            timestamp,
            time_of_first_block,
            dpos,
            state,
        }
    }

    /// Tally stake-weighted votes per candidate.
    ///
    /// Every registered candidate appears in the result, a candidate with no
    /// delegators at weight zero; each delegation contributes the
    /// delegator's present balance. Reads only; fails with
    /// [`DposError::NoCandidates`] when the candidate set is empty.
    pub fn count_votes(&self) -> Result<BTreeMap<Address, U256>, DposError> {
        let mut votes = BTreeMap::new();

        for entry in self.dpos.candidate_trie().iter() {
            let (key, value) = entry?;
            let candidate = decode_address(&key, &value)?;
            let score = votes.entry(candidate).or_insert(U256::ZERO);

            for delegation in self.dpos.delegate_trie().iter_prefix(candidate.as_slice()) {
                let (key, value) = delegation?;
                let delegator = decode_address(&key, &value)?;
                *score = score.saturating_add(self.state.balance(delegator));
            }
        }

        if votes.is_empty() {
            return Err(DposError::NoCandidates);
        }
        Ok(votes)
    }

    /// Remove validators that under-produced in `epoch` from the candidate
    /// set, keeping at least [`config::SAFE_SIZE`] candidates.
    ///
    /// A validator is marked when its mint count falls below half its fair
    /// share of the epoch's slots. Marked validators leave
    /// lowest-count-first (ties by descending address), so when the pool
    /// floor cuts removal short it is the near-threshold validators that
    /// survive. Consensus-frozen; do not reorder.
    pub fn kickout_validator(&mut self, epoch: i64) -> Result<(), DposError> {
        let validators = self.dpos.validators()?;
        if validators.is_empty() {
            return Err(DposError::NoValidators);
        }

        // The first epoch rarely starts on an epoch boundary; judge it by
        // the time actually elapsed so validators are not punished for slots
        // that never existed.
        let mut epoch_duration = config::EPOCH_INTERVAL;
        if self.timestamp - self.time_of_first_block < config::EPOCH_INTERVAL {
            epoch_duration = self.timestamp - self.time_of_first_block;
        }
        let threshold =
            epoch_duration / config::BLOCK_INTERVAL / config::MAX_VALIDATOR_SIZE as i64 / 2;

        let mut marked = Vec::new();
        for validator in validators {
            let cnt = self.dpos.mint_cnt(epoch, validator)?;
            if (cnt as i64) < threshold {
                marked.push(WeightedAddress::new(validator, U256::from(cnt)));
            }
        }
        if marked.is_empty() {
            return Ok(());
        }
        // Removal order is the reverse of the election order: worst
        // producers first.
        marked.sort_by(|a, b| b.cmp(a));

        // Pool size only matters up to marked + SAFE_SIZE; don't walk the
        // whole candidate set.
        let enough = marked.len() + config::SAFE_SIZE;
        let mut pool = 0usize;
        for entry in self.dpos.candidate_trie().iter() {
            entry?;
            pool += 1;
            if pool >= enough {
                break;
            }
        }

        for (removed, validator) in marked.iter().enumerate() {
            if pool <= config::SAFE_SIZE {
                info!(
                    target: "veros::dpos",
                    prev_epoch = epoch,
                    candidates = pool,
                    remaining = marked.len() - removed,
                    "no more candidates can be kicked out"
                );
                return Ok(());
            }
            self.dpos.kickout_candidate(validator.address)?;
            pool -= 1;
            info!(
                target: "veros::dpos",
                prev_epoch = epoch,
                candidate = %validator.address,
                mint_cnt = %validator.weight,
                "kicked out candidate"
            );
        }
        Ok(())
    }

    /// Address owed the block slot at `now`.
    ///
    /// `now` must align with a block-interval boundary; the slate rotates
    /// one validator per [`config::BLOCK_INTERVAL`] through the shuffled
    /// order installed at the last election.
    pub fn lookup_validator(&self, now: i64) -> Result<Address, DposError> {
        let offset = now % config::EPOCH_INTERVAL;
        if offset % config::BLOCK_INTERVAL != 0 {
            return Err(DposError::InvalidMintTime(now));
        }
        let slot = offset / config::BLOCK_INTERVAL;

        let validators = self.dpos.validators()?;
        if validators.is_empty() {
            return Err(DposError::NoValidators);
        }
        Ok(validators[(slot % validators.len() as i64) as usize])
    }

    /// Run the election for every epoch boundary crossed between `parent`
    /// and the block being processed.
    ///
    /// Per crossed epoch: kick out the previous epoch's under-producers
    /// (skipped when the previous epoch is the genesis epoch, or recorded no
    /// minted block), tally votes, rank, truncate to
    /// [`config::MAX_VALIDATOR_SIZE`], shuffle deterministically from the
    /// parent hash and epoch index, and install the slate on a fresh epoch
    /// trie. Runs zero times when `parent` shares the current epoch.
    pub fn try_elect(&mut self, genesis: &Header, parent: &Header) -> Result<(), DposError> {
        let genesis_epoch = genesis.timestamp as i64 / config::EPOCH_INTERVAL;
        let mut prev_epoch = parent.timestamp as i64 / config::EPOCH_INTERVAL;
        let current_epoch = self.timestamp / config::EPOCH_INTERVAL;

        // Any gap since genesis collapses into a single-epoch election.
        let prev_epoch_is_genesis = prev_epoch == genesis_epoch;
        if prev_epoch_is_genesis && prev_epoch < current_epoch {
            prev_epoch = current_epoch - 1;
        }

        // Kick-out only runs while the previous epoch still has recorded
        // mints to account for; one recorded entry is consumed per elected
        // epoch.
        let span = (current_epoch - prev_epoch).max(0) as usize;
        let mut mint_entries = 0usize;
        if span > 0 {
            let prefix = (prev_epoch as u64).to_be_bytes();
            for entry in self.dpos.mint_cnt_trie().iter_prefix(&prefix) {
                entry?;
                mint_entries += 1;
                if mint_entries >= span {
                    break;
                }
            }
        }

        let parent_hash = parent.hash_slow();

        for i in prev_epoch..current_epoch {
            if !prev_epoch_is_genesis && mint_entries > 0 {
                mint_entries -= 1;
                self.kickout_validator(prev_epoch)?;
            }

            let votes = self.count_votes()?;
            let mut candidates: Vec<WeightedAddress> = votes
                .into_iter()
                .map(|(address, weight)| WeightedAddress::new(address, weight))
                .collect();
            if candidates.len() < config::SAFE_SIZE {
                return Err(DposError::TooFewCandidates {
                    got: candidates.len(),
                    need: config::SAFE_SIZE,
                });
            }
            candidates.sort();
            candidates.truncate(config::MAX_VALIDATOR_SIZE);

            shuffle(&mut candidates, seed_for_epoch(parent_hash, i));
            let slate: Vec<Address> = candidates.iter().map(|c| c.address).collect();

            self.dpos.set_epoch(T::default());
            self.dpos.set_validators(&slate)?;
            info!(
                target: "veros::dpos",
                prev_epoch = i,
                next_epoch = i + 1,
                "entering new epoch"
            );
        }
        Ok(())
    }
}
