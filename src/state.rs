use std::{
    collections::{BTreeMap, BTreeSet},
    net::{Ipv4Addr, Ipv6Addr},
};

use cidr::{Ipv4Inet, Ipv6Inet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    allocator::{self, PeerId, PoolExhausted, FIRST_PEER_ID, SERVER_ID},
    keys::{KeyError, KeyProvider},
};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid peer name {0:?}")]
    InvalidName(String),
    #[error("peer named {0:?} already exists")]
    DuplicateName(String),
    #[error(transparent)]
    AllocationExhausted(#[from] PoolExhausted),
    #[error("peer {0} not found")]
    NotFound(PeerId),
    #[error("id {0} belongs to the server and can't be removed")]
    Forbidden(PeerId),
    #[error("invalid server: {0}")]
    InvalidServer(&'static str),
    #[error("inconsistent state: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Keys(#[from] KeyError),
}

/// Addresses are kept as `addr/len` strings on disk, `null` when the family
/// is not configured.
mod inet_opt {
    use std::{fmt::Display, str::FromStr};

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<T: Display, S: Serializer>(
        value: &Option<T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| s.parse().map_err(D::Error::custom))
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub interface: String,
    #[serde(with = "inet_opt")]
    pub address4: Option<Ipv4Inet>,
    #[serde(with = "inet_opt")]
    pub address6: Option<Ipv6Inet>,
    pub listen_port: u16,
    pub private_key: String,
    pub public_key: String,
    #[serde(default)]
    pub preshared_key: String,
    #[serde(default)]
    pub post_up4: String,
    #[serde(default)]
    pub post_down4: String,
    #[serde(default)]
    pub post_up6: String,
    #[serde(default)]
    pub post_down6: String,
    #[serde(default)]
    pub client_dns: String,
    #[serde(default)]
    pub client_route: String,
    #[serde(default)]
    pub client_server_endpoint: String,
    #[serde(default)]
    pub client_persistent_keepalive: u16,
}

impl Server {
    pub fn validate(&self) -> Result<(), StateError> {
        if self.interface.is_empty() {
            return Err(StateError::InvalidServer("interface name is empty"));
        }
        if self.address4.is_none() && self.address6.is_none() {
            return Err(StateError::InvalidServer("no ipv4 or ipv6 address"));
        }
        if self.listen_port == 0 {
            return Err(StateError::InvalidServer("listen port is 0"));
        }
        if self.private_key.is_empty() || self.public_key.is_empty() {
            return Err(StateError::InvalidServer("missing server keys"));
        }
        Ok(())
    }

    pub fn capacity(&self) -> PeerId {
        allocator::capacity(self.address4.as_ref(), self.address6.as_ref())
    }

    pub fn peer_ipv4(&self, id: PeerId) -> Option<Ipv4Addr> {
        self.address4.as_ref().map(|r| allocator::derive_ipv4(r, id))
    }

    pub fn peer_ipv6(&self, id: PeerId) -> Option<Ipv6Addr> {
        self.address6.as_ref().map(|r| allocator::derive_ipv6(r, id))
    }

    /// Host routes of a peer, ipv4 first.
    pub fn allowed_ips(&self, id: PeerId) -> String {
        let v4 = self.peer_ipv4(id).map(|ip| format!("{ip}/32"));
        let v6 = self.peer_ipv6(id).map(|ip| format!("{ip}/128"));

        v4.into_iter().chain(v6).collect::<Vec<_>>().join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    id: PeerId,
    name: String,
    private_key: String,
    public_key: String,
}

impl Peer {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}

fn validate_name(name: &str) -> Result<(), StateError> {
    if name.trim().is_empty() || name.chars().any(char::is_control) {
        return Err(StateError::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// One server plus its peers keyed by host id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    server: Server,
    peers: BTreeMap<PeerId, Peer>,
}

impl State {
    pub fn new(server: Server) -> Result<Self, StateError> {
        server.validate()?;
        Ok(Self {
            server,
            peers: BTreeMap::new(),
        })
    }

    /// Rebuilds a store from persisted records, re-checking every invariant
    /// `add_peer` would have enforced.
    pub fn from_parts(
        server: Server,
        peers: impl IntoIterator<Item = Peer>,
    ) -> Result<Self, StateError> {
        let mut state = Self::new(server)?;
        let capacity = state.capacity();

        for peer in peers {
            if peer.id < FIRST_PEER_ID || peer.id > capacity {
                return Err(StateError::Corrupt(format!(
                    "peer id {} outside [{FIRST_PEER_ID}, {capacity}]",
                    peer.id
                )));
            }
            validate_name(&peer.name)?;
            if state.peer_by_name(&peer.name).is_some() {
                return Err(StateError::DuplicateName(peer.name));
            }
            if state.peers.contains_key(&peer.id) {
                return Err(StateError::Corrupt(format!("duplicate peer id {}", peer.id)));
            }
            state.peers.insert(peer.id, peer);
        }

        Ok(state)
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Peers in ascending id order.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> + '_ {
        self.peers.values()
    }

    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn peer_by_name(&self, name: &str) -> Option<&Peer> {
        self.peers.values().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn used_ids(&self) -> BTreeSet<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn capacity(&self) -> PeerId {
        self.server.capacity()
    }

    /// Checks whether `name` could be added right now and returns the id it
    /// would get. Never mutates.
    pub fn can_add_peer(&self, name: &str) -> Result<PeerId, StateError> {
        validate_name(name)?;
        if self.peer_by_name(name).is_some() {
            return Err(StateError::DuplicateName(name.to_owned()));
        }
        Ok(allocator::next_free_id(&self.used_ids(), self.capacity())?)
    }

    #[instrument(skip(self, keys))]
    pub fn add_peer<K: KeyProvider>(&mut self, name: &str, keys: K) -> Result<&Peer, StateError> {
        let id = self.can_add_peer(name)?;
        let pair = keys.keypair()?;

        debug!("allocated id {id} for peer {name}");
        let peer = self.peers.entry(id).or_insert(Peer {
            id,
            name: name.to_owned(),
            private_key: pair.private_key,
            public_key: pair.public_key,
        });
        Ok(peer)
    }

    #[instrument(skip(self))]
    pub fn delete_peer(&mut self, id: PeerId) -> Result<Peer, StateError> {
        if id == SERVER_ID {
            return Err(StateError::Forbidden(id));
        }
        self.peers.remove(&id).ok_or(StateError::NotFound(id))
    }

    pub fn allowed_ips(&self, peer: &Peer) -> String {
        self.server.allowed_ips(peer.id)
    }

    pub fn peer_ipv4(&self, peer: &Peer) -> Option<Ipv4Addr> {
        self.server.peer_ipv4(peer.id)
    }

    pub fn peer_ipv6(&self, peer: &Peer) -> Option<Ipv6Addr> {
        self.server.peer_ipv6(peer.id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::keys::Keypair;

    /// Deterministic keys so tests can compare rendered output.
    #[derive(Default)]
    pub struct CountingKeys(pub Cell<u32>);

    impl KeyProvider for CountingKeys {
        fn keypair(&self) -> Result<Keypair, KeyError> {
            let n = self.0.get() + 1;
            self.0.set(n);
            Ok(Keypair {
                private_key: format!("priv-{n}"),
                public_key: format!("pub-{n}"),
            })
        }

        fn preshared_key(&self) -> Result<String, KeyError> {
            Ok("psk".to_owned())
        }
    }

    struct BrokenKeys;

    impl KeyProvider for BrokenKeys {
        fn keypair(&self) -> Result<Keypair, KeyError> {
            Err(KeyError::Unavailable("no entropy".to_owned()))
        }

        fn preshared_key(&self) -> Result<String, KeyError> {
            Err(KeyError::Unavailable("no entropy".to_owned()))
        }
    }

    pub fn server(address4: Option<&str>, address6: Option<&str>) -> Server {
        Server {
            interface: "wg0".to_owned(),
            address4: address4.map(|a| a.parse().unwrap()),
            address6: address6.map(|a| a.parse().unwrap()),
            listen_port: 51820,
            private_key: "server-priv".to_owned(),
            public_key: "server-pub".to_owned(),
            preshared_key: String::new(),
            post_up4: String::new(),
            post_down4: String::new(),
            post_up6: String::new(),
            post_down6: String::new(),
            client_dns: String::new(),
            client_route: "0.0.0.0/0, ::/0".to_owned(),
            client_server_endpoint: "vpn.example.com".to_owned(),
            client_persistent_keepalive: 0,
        }
    }

    #[test]
    fn ids_are_reused_smallest_first() {
        // /28 leaves 14 usable ids
        let mut state = State::new(server(Some("10.0.0.1/28"), None)).unwrap();
        let keys = CountingKeys::default();

        assert_eq!(state.add_peer("alice", &keys).unwrap().id(), 2);
        assert_eq!(state.add_peer("bob", &keys).unwrap().id(), 3);
        state.delete_peer(2).unwrap();
        assert_eq!(state.add_peer("carol", &keys).unwrap().id(), 2);
        assert_eq!(state.add_peer("dave", &keys).unwrap().id(), 4);
    }

    #[test]
    fn duplicate_name_leaves_state_untouched() {
        let mut state = State::new(server(Some("10.0.0.1/24"), None)).unwrap();
        let keys = CountingKeys::default();
        state.add_peer("alice", &keys).unwrap();
        let before = state.clone();

        assert!(matches!(
            state.add_peer("alice", &keys),
            Err(StateError::DuplicateName(n)) if n == "alice"
        ));
        assert_eq!(state, before);
        // names are case sensitive
        assert!(state.add_peer("Alice", &keys).is_ok());
    }

    #[test]
    fn rejects_bad_names() {
        let state = State::new(server(Some("10.0.0.1/24"), None)).unwrap();
        for name in ["", "   ", "a\nb", "tab\t"] {
            assert!(matches!(
                state.can_add_peer(name),
                Err(StateError::InvalidName(_))
            ));
        }
        assert_eq!(state.can_add_peer("laptop").unwrap(), 2);
    }

    #[test]
    fn exhaustion() {
        let mut state = State::new(server(Some("10.0.0.1/30"), None)).unwrap();
        let keys = CountingKeys::default();
        state.add_peer("a", &keys).unwrap();
        assert!(matches!(
            state.add_peer("b", &keys),
            Err(StateError::AllocationExhausted(PoolExhausted { capacity: 2 }))
        ));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn key_failure_does_not_insert() {
        let mut state = State::new(server(Some("10.0.0.1/24"), None)).unwrap();
        assert!(matches!(
            state.add_peer("a", BrokenKeys),
            Err(StateError::Keys(_))
        ));
        assert!(state.is_empty());
    }

    #[test]
    fn delete_rules() {
        let mut state = State::new(server(Some("10.0.0.1/24"), None)).unwrap();
        state.add_peer("a", CountingKeys::default()).unwrap();

        assert!(matches!(state.delete_peer(1), Err(StateError::Forbidden(1))));
        assert!(matches!(state.delete_peer(9), Err(StateError::NotFound(9))));
        assert_eq!(state.delete_peer(2).unwrap().name(), "a");
        assert!(matches!(state.delete_peer(2), Err(StateError::NotFound(2))));
    }

    #[test]
    fn derived_addresses() {
        let mut state =
            State::new(server(Some("10.0.0.0/24"), Some("fd00:aa::1/64"))).unwrap();
        let keys = CountingKeys::default();
        for name in ["a", "b", "c", "d"] {
            state.add_peer(name, &keys).unwrap();
        }
        let peer = state.peer(5).unwrap();

        assert_eq!(state.peer_ipv4(peer), Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(state.peer_ipv6(peer), Some("fd00:aa::5".parse().unwrap()));
        assert_eq!(state.allowed_ips(peer), "10.0.0.5/32, fd00:aa::5/128");

        let v6_only = State::new(server(None, Some("fd00::1/112"))).unwrap();
        assert_eq!(v6_only.server().allowed_ips(7), "fd00::7/128");
        assert_eq!(v6_only.server().peer_ipv4(7), None);
    }

    #[test]
    fn server_validation() {
        assert!(matches!(
            State::new(server(None, None)),
            Err(StateError::InvalidServer(_))
        ));
        let mut s = server(Some("10.0.0.1/24"), None);
        s.listen_port = 0;
        assert!(matches!(State::new(s), Err(StateError::InvalidServer(_))));
    }

    #[test]
    fn from_parts_checks_invariants() {
        let peer = |id, name: &str| Peer {
            id,
            name: name.to_owned(),
            private_key: "k".to_owned(),
            public_key: "p".to_owned(),
        };
        let srv = || server(Some("10.0.0.1/24"), None);

        let state = State::from_parts(srv(), [peer(4, "b"), peer(2, "a")]).unwrap();
        assert_eq!(state.peers().map(Peer::id).collect::<Vec<_>>(), [2, 4]);

        assert!(matches!(
            State::from_parts(srv(), [peer(1, "a")]),
            Err(StateError::Corrupt(_))
        ));
        assert!(matches!(
            State::from_parts(srv(), [peer(255, "a")]),
            Err(StateError::Corrupt(_))
        ));
        assert!(matches!(
            State::from_parts(srv(), [peer(2, "a"), peer(2, "b")]),
            Err(StateError::Corrupt(_))
        ));
        assert!(matches!(
            State::from_parts(srv(), [peer(2, "a"), peer(3, "a")]),
            Err(StateError::DuplicateName(_))
        ));
    }
}
