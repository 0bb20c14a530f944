//! Layer 4: read-only product of N chains.
//!
//! Joins independent histories at the union of their key dates. Each row
//! is computed by one `patch_to_date` call per member; there is no
//! cross-chain interaction and the view owns nothing.

use std::collections::BTreeSet;

use time::OffsetDateTime;

use super::chain::Chain;
use super::error::ChainError;

/// One row of the joint history.
#[derive(Clone, Debug)]
pub struct ProductRecord<E> {
    pub key_date: OffsetDateTime,
    /// States in member registration order.
    pub states: Vec<E>,
}

/// Borrowed view over N `(chain, initial entity)` members.
pub struct Product<'a, E> {
    members: Vec<(&'a Chain<E>, &'a E)>,
}

impl<'a, E> Product<'a, E> {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    pub fn with(mut self, chain: &'a Chain<E>, initial: &'a E) -> Self {
        self.members.push((chain, initial));
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Distinct finite key dates across all members, ascending.
    pub fn key_dates(&self) -> Vec<OffsetDateTime> {
        let mut dates = BTreeSet::new();
        for (chain, _) in &self.members {
            dates.extend(chain.key_dates());
        }
        dates.into_iter().collect()
    }

    /// Joint states at every key date; each member reconstructs
    /// independently.
    pub fn records(&self) -> Result<Vec<ProductRecord<E>>, ChainError>
    where
        E: Clone,
    {
        let mut records = Vec::new();
        for key_date in self.key_dates() {
            let mut states = Vec::with_capacity(self.members.len());
            for (chain, initial) in &self.members {
                states.push(chain.patch_to_date(initial, key_date)?.entity);
            }
            records.push(ProductRecord { key_date, states });
        }
        Ok(records)
    }
}

impl<E> Default for Product<'_, E> {
    fn default() -> Self {
        Self::new()
    }
}
