//! The initiator's pool of not-yet-authenticated responders.

use std::collections::HashMap;

use salty_core::Address;
use salty_crypto::SharedKeyStore;

use crate::peer::Peer;
use crate::state::ResponderHandshakeState;

/// Pool size above which the oldest untouched responder is evicted.
pub const MAX_RESPONDERS: usize = 252;

#[derive(Debug, Default)]
pub struct ResponderPool {
    responders: HashMap<Address, Peer>,
    counter: u64,
}

impl ResponderPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.responders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responders.is_empty()
    }

    pub fn contains(&self, address: Address) -> bool {
        self.responders.contains_key(&address)
    }

    pub fn get(&self, address: Address) -> Option<&Peer> {
        self.responders.get(&address)
    }

    pub fn get_mut(&mut self, address: Address) -> Option<&mut Peer> {
        self.responders.get_mut(&address)
    }

    pub fn remove(&mut self, address: Address) -> Option<Peer> {
        self.responders.remove(&address)
    }

    /// Addresses in arrival order.
    pub fn addresses(&self) -> Vec<Address> {
        let mut entries: Vec<_> = self
            .responders
            .values()
            .map(|p| (p.counter().unwrap_or(0), p.address()))
            .collect();
        entries.sort_unstable();
        entries.into_iter().map(|(_, address)| address).collect()
    }

    pub fn clear(&mut self) {
        self.responders.clear();
    }

    /// Start tracking a fresh responder, replacing any stale entry at the
    /// same address.
    ///
    /// With a trusted permanent key the responder starts out in
    /// `TokenReceived`. Returns the address of a responder that had to be
    /// evicted to make room.
    pub fn add(&mut self, address: Address, trusted_key: Option<SharedKeyStore>) -> Option<Address> {
        self.responders.remove(&address);

        self.counter += 1;
        let peer = match trusted_key {
            Some(key) => Peer::trusted_responder(address, self.counter, key),
            None => Peer::responder(address, self.counter),
        };
        self.responders.insert(address, peer);

        if self.responders.len() > MAX_RESPONDERS {
            let victim = self.eviction_candidate()?;
            self.responders.remove(&victim);
            return Some(victim);
        }
        None
    }

    /// The `New` responder with the lowest arrival counter.
    fn eviction_candidate(&self) -> Option<Address> {
        self.responders
            .values()
            .filter(|p| matches!(p.responder_state(), Ok(ResponderHandshakeState::New)))
            .min_by_key(|p| p.counter().unwrap_or(u64::MAX))
            .map(|p| p.address())
    }
}
