//! Per-tool prices and one-shot payment authorizations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::firewall::{PaymentGate, PriceQuote};

/// Prices in the currency's smallest unit. Tools without an explicit price
/// cost `default_price`.
#[derive(Debug)]
pub struct PricingTable {
    currency: String,
    default_price: u64,
    prices: RwLock<BTreeMap<String, u64>>,
}

impl PricingTable {
    pub fn new(currency: impl Into<String>, default_price: u64) -> Self {
        Self {
            currency: currency.into(),
            default_price,
            prices: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn set_price(&self, tool: impl Into<String>, amount: u64) {
        self.prices.write().insert(tool.into(), amount);
    }

    pub fn remove_price(&self, tool: &str) -> Option<u64> {
        self.prices.write().remove(tool)
    }

    pub fn quote(&self, tool: &str) -> PriceQuote {
        let amount = self
            .prices
            .read()
            .get(tool)
            .copied()
            .unwrap_or(self.default_price);
        PriceQuote {
            tool: tool.to_string(),
            amount,
            currency: self.currency.clone(),
        }
    }

    /// Explicitly priced tools, by name.
    pub fn quotes(&self) -> Vec<PriceQuote> {
        self.prices
            .read()
            .iter()
            .map(|(tool, amount)| PriceQuote {
                tool: tool.clone(),
                amount: *amount,
                currency: self.currency.clone(),
            })
            .collect()
    }
}

/// [`PaymentGate`] backed by a [`PricingTable`]. Each settled payment buys
/// exactly one call.
#[derive(Debug)]
pub struct PricedGate {
    table: Arc<PricingTable>,
    authorizations: Mutex<HashMap<(String, String), u32>>,
}

impl PricedGate {
    pub fn new(table: Arc<PricingTable>) -> Self {
        Self {
            table,
            authorizations: Mutex::new(HashMap::new()),
        }
    }

    /// Record one paid call of `tool` for `peer_did`.
    pub fn authorize(&self, peer_did: &str, tool: &str) {
        *self
            .authorizations
            .lock()
            .entry((peer_did.to_string(), tool.to_string()))
            .or_insert(0) += 1;
    }

    pub fn pending(&self, peer_did: &str, tool: &str) -> u32 {
        self.authorizations
            .lock()
            .get(&(peer_did.to_string(), tool.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

impl PaymentGate for PricedGate {
    fn quote(&self, tool: &str) -> Option<PriceQuote> {
        Some(self.table.quote(tool))
    }

    fn take_authorization(&self, peer_did: &str, tool: &str) -> bool {
        let mut auths = self.authorizations.lock();
        let key = (peer_did.to_string(), tool.to_string());
        match auths.get_mut(&key) {
            Some(n) if *n > 1 => {
                *n -= 1;
                true
            }
            Some(_) => {
                auths.remove(&key);
                true
            }
            None => false,
        }
    }
}
