//! Local peer directory.
//!
//! Maps peer ids to their latest known addresses, backed by an injected
//! key-value [`Store`] so the table can outlive the process. Not a
//! Kademlia-style DHT: every node keeps the full directory it has learned
//! through gossip.
//!
//! Addresses are kept codec-encoded; an update that encodes to the exact
//! bytes already stored reports "not updated", which is what lets the
//! ping/pong layer stop propagation storms early.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use murmur_protocol::{GroupId, PeerAddr, PeerAddressCodec, PeerId};
use murmur_store::{Store, StoreError};

use crate::error::{PeerError, Result};

/// The peer directory.
pub struct Dht {
    me: PeerAddr,
    codec: Arc<dyn PeerAddressCodec>,
    store: Arc<dyn Store>,
    groups: RwLock<HashMap<GroupId, Vec<PeerId>>>,
}

impl Dht {
    /// Create a directory for `me`, seeding it with the bootstrap set.
    ///
    /// Seeding goes through [`Dht::update_peer_address`], so bootstrap
    /// addresses already present in a persistent store are left untouched.
    pub fn new(
        me: PeerAddr,
        codec: Arc<dyn PeerAddressCodec>,
        store: Arc<dyn Store>,
        bootstrap: &[PeerAddr],
    ) -> Result<Self> {
        let dht = Self {
            me,
            codec,
            store,
            groups: RwLock::new(HashMap::new()),
        };
        for addr in bootstrap {
            dht.update_peer_address(Arc::clone(addr))?;
        }
        Ok(dht)
    }

    /// This node's own address. Never stored as a peer.
    pub fn me(&self) -> PeerAddr {
        Arc::clone(&self.me)
    }

    /// Look up a peer's address.
    pub fn peer_address(&self, id: &PeerId) -> Result<PeerAddr> {
        match self.store.get(id.as_bytes())? {
            Some(bytes) => Ok(self.codec.decode(&bytes)?),
            None => Err(PeerError::PeerNotFound(*id)),
        }
    }

    /// A snapshot of all known peer addresses, in unspecified order.
    pub fn peer_addresses(&self) -> Result<Vec<PeerAddr>> {
        let mut out = Vec::new();
        for (_, bytes) in self.store.entries()? {
            out.push(self.codec.decode(&bytes)?);
        }
        Ok(out)
    }

    /// Number of known peers.
    pub fn num_peers(&self) -> Result<usize> {
        Ok(self.store.len()?)
    }

    /// Insert or replace a peer's address.
    ///
    /// Returns `true` when the stored record changed, `false` when the
    /// encoded address is byte-identical to what is already stored or the
    /// address is our own.
    pub fn update_peer_address(&self, addr: PeerAddr) -> Result<bool> {
        let id = addr.peer_id();
        if id == self.me.peer_id() {
            return Ok(false);
        }

        let encoded = self.codec.encode(addr.as_ref())?;
        if let Some(existing) = self.store.get(id.as_bytes())? {
            if existing == encoded {
                return Ok(false);
            }
        }
        self.store.insert(id.as_bytes(), &encoded)?;
        Ok(true)
    }

    /// Forget a peer.
    pub fn remove_peer(&self, id: &PeerId) -> Result<()> {
        self.store.remove(id.as_bytes())?;
        Ok(())
    }

    /// Replace the membership of a group.
    pub fn update_group(&self, group: GroupId, members: Vec<PeerId>) -> Result<()> {
        let mut groups = self.groups.write().map_err(|_| StoreError::Poisoned)?;
        groups.insert(group, members);
        Ok(())
    }

    /// Addresses of a group's members.
    ///
    /// The nil group stands for the whole directory. Members without a
    /// known address are skipped.
    pub fn group_addresses(&self, group: &GroupId) -> Result<Vec<PeerAddr>> {
        if group.is_nil() {
            return self.peer_addresses();
        }

        let members = {
            let groups = self.groups.read().map_err(|_| StoreError::Poisoned)?;
            groups.get(group).cloned().unwrap_or_default()
        };

        let mut out = Vec::with_capacity(members.len());
        for id in members {
            match self.peer_address(&id) {
                Ok(addr) => out.push(addr),
                Err(PeerError::PeerNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Dht {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dht")
            .field("me", &self.me)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_crypto::Signatory;
    use murmur_protocol::{BincodeAddressCodec, TcpPeerAddress};
    use murmur_store::MemStore;

    fn signatory(seed: u8) -> Signatory {
        Signatory::from_bytes(&[seed; 32]).unwrap()
    }

    fn address(seed: u8, port: u16, nonce: u64) -> PeerAddr {
        Arc::new(TcpPeerAddress::new(
            signatory(seed),
            format!("127.0.0.1:{}", port).parse().unwrap(),
            nonce,
        ))
    }

    fn dht_for(seed: u8, bootstrap: &[PeerAddr]) -> Dht {
        Dht::new(
            address(seed, 4000 + seed as u16, 0),
            Arc::new(BincodeAddressCodec::new()),
            Arc::new(MemStore::new()),
            bootstrap,
        )
        .unwrap()
    }

    #[test]
    fn test_update_is_idempotent() {
        let dht = dht_for(1, &[]);
        let addr = address(2, 5000, 0);

        assert!(dht.update_peer_address(Arc::clone(&addr)).unwrap());
        assert!(!dht.update_peer_address(addr).unwrap());
        assert_eq!(dht.num_peers().unwrap(), 1);
    }

    #[test]
    fn test_update_with_own_address_is_noop() {
        let dht = dht_for(1, &[]);
        let me_again = address(1, 9999, 7);

        assert!(!dht.update_peer_address(me_again).unwrap());
        assert_eq!(dht.num_peers().unwrap(), 0);
    }

    #[test]
    fn test_newer_locator_replaces() {
        let dht = dht_for(1, &[]);
        assert!(dht.update_peer_address(address(2, 5000, 0)).unwrap());
        // Same peer, new locator: the record changes.
        assert!(dht.update_peer_address(address(2, 6000, 1)).unwrap());

        let stored = dht.peer_address(&signatory(2)).unwrap();
        assert_eq!(stored.network_string(), "127.0.0.1:6000");
        assert_eq!(dht.num_peers().unwrap(), 1);
    }

    #[test]
    fn test_bootstrap_seeding() {
        let dht = dht_for(1, &[address(2, 5000, 0), address(3, 5001, 0)]);
        assert_eq!(dht.num_peers().unwrap(), 2);
        assert!(dht.peer_address(&signatory(2)).is_ok());
        assert!(dht.peer_address(&signatory(3)).is_ok());
    }

    #[test]
    fn test_unknown_peer_not_found() {
        let dht = dht_for(1, &[]);
        assert!(matches!(
            dht.peer_address(&signatory(9)),
            Err(PeerError::PeerNotFound(_))
        ));
    }

    #[test]
    fn test_remove_peer() {
        let dht = dht_for(1, &[address(2, 5000, 0)]);
        dht.remove_peer(&signatory(2)).unwrap();
        assert_eq!(dht.num_peers().unwrap(), 0);
    }

    #[test]
    fn test_table_survives_store_handoff() {
        // A persistent store keeps the table across "restarts".
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let codec = Arc::new(BincodeAddressCodec::new());

        let first = Dht::new(
            address(1, 4001, 0),
            codec.clone(),
            Arc::clone(&store),
            &[address(2, 5000, 0)],
        )
        .unwrap();
        first.update_peer_address(address(3, 5001, 0)).unwrap();
        drop(first);

        let second = Dht::new(address(1, 4001, 0), codec, store, &[]).unwrap();
        assert_eq!(second.num_peers().unwrap(), 2);
    }

    #[test]
    fn test_nil_group_is_everyone() {
        let dht = dht_for(1, &[address(2, 5000, 0), address(3, 5001, 0)]);
        assert_eq!(dht.group_addresses(&GroupId::NIL).unwrap().len(), 2);
    }

    #[test]
    fn test_group_membership() {
        let dht = dht_for(1, &[address(2, 5000, 0), address(3, 5001, 0)]);
        let group = GroupId([7u8; 32]);

        dht.update_group(group, vec![signatory(2)]).unwrap();
        let members = dht.group_addresses(&group).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].peer_id(), signatory(2));
    }

    #[test]
    fn test_group_skips_unknown_members() {
        let dht = dht_for(1, &[address(2, 5000, 0)]);
        let group = GroupId([7u8; 32]);

        dht.update_group(group, vec![signatory(2), signatory(9)]).unwrap();
        assert_eq!(dht.group_addresses(&group).unwrap().len(), 1);
    }
}
