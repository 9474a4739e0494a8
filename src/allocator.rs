use std::{
    collections::BTreeSet,
    net::{Ipv4Addr, Ipv6Addr},
};

use cidr::{Ipv4Inet, Ipv6Inet};
use thiserror::Error;

pub type PeerId = u32;

/// Host identifier implicitly held by the server inside its own range.
pub const SERVER_ID: PeerId = 1;
pub const FIRST_PEER_ID: PeerId = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ip pool exhausted: every id in [2, {capacity}] is in use")]
pub struct PoolExhausted {
    pub capacity: PeerId,
}

fn v4_capacity(range: &Ipv4Inet) -> PeerId {
    let host_bits = 32 - u32::from(range.network_length());
    if host_bits < 2 {
        return 0;
    }
    // network and broadcast addresses are not assignable
    let size = 1u64 << host_bits;
    PeerId::try_from(size - 2).unwrap_or(PeerId::MAX)
}

fn v6_capacity(range: &Ipv6Inet) -> PeerId {
    let host_bits = 128 - u32::from(range.network_length());
    if host_bits >= 32 {
        return PeerId::MAX;
    }
    ((1u64 << host_bits) - 1) as PeerId
}

/// Largest assignable identifier. When both families are configured the
/// narrower range wins so an id is always valid in both.
pub fn capacity(address4: Option<&Ipv4Inet>, address6: Option<&Ipv6Inet>) -> PeerId {
    match (address4.map(v4_capacity), address6.map(v6_capacity)) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => 0,
    }
}

/// Smallest free id in `[FIRST_PEER_ID, capacity]`, reusing gaps left by
/// deleted peers.
pub fn next_free_id(used: &BTreeSet<PeerId>, capacity: PeerId) -> Result<PeerId, PoolExhausted> {
    if capacity < FIRST_PEER_ID {
        return Err(PoolExhausted { capacity });
    }
    (FIRST_PEER_ID..=capacity)
        .find(|id| !used.contains(id))
        .ok_or(PoolExhausted { capacity })
}

pub fn derive_ipv4(range: &Ipv4Inet, id: PeerId) -> Ipv4Addr {
    let host_bits = 32 - u32::from(range.network_length());
    let mask = u32::MAX.checked_shl(host_bits).unwrap_or(0);
    let base = u32::from(range.address()) & mask;
    Ipv4Addr::from(base.wrapping_add(id))
}

pub fn derive_ipv6(range: &Ipv6Inet, id: PeerId) -> Ipv6Addr {
    let host_bits = 128 - u32::from(range.network_length());
    let mask = u128::MAX.checked_shl(host_bits).unwrap_or(0);
    let base = u128::from(range.address()) & mask;
    Ipv6Addr::from(base.wrapping_add(u128::from(id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> Ipv4Inet {
        s.parse().unwrap()
    }

    fn v6(s: &str) -> Ipv6Inet {
        s.parse().unwrap()
    }

    #[test]
    fn capacity_per_family() {
        assert_eq!(capacity(Some(&v4("10.0.0.1/24")), None), 254);
        assert_eq!(capacity(Some(&v4("10.0.0.1/30")), None), 2);
        assert_eq!(capacity(Some(&v4("10.0.0.1/31")), None), 0);
        assert_eq!(capacity(None, Some(&v6("fd00::1/120"))), 255);
        assert_eq!(capacity(None, Some(&v6("fd00::1/64"))), PeerId::MAX);
        assert_eq!(capacity(None, None), 0);
    }

    #[test]
    fn capacity_takes_narrower_family() {
        let a4 = v4("10.0.0.1/28");
        let a6 = v6("fd00::1/64");
        assert_eq!(capacity(Some(&a4), Some(&a6)), 14);

        let a6 = v6("fd00::1/125");
        assert_eq!(capacity(Some(&a4), Some(&a6)), 7);
    }

    #[test]
    fn next_free_fills_gaps() {
        let used: BTreeSet<PeerId> = [2, 3, 5].into_iter().collect();
        assert_eq!(next_free_id(&used, 10), Ok(4));

        let used: BTreeSet<PeerId> = [3].into_iter().collect();
        assert_eq!(next_free_id(&used, 10), Ok(2));

        assert_eq!(next_free_id(&BTreeSet::new(), 10), Ok(2));
    }

    #[test]
    fn next_free_exhausted() {
        let used: BTreeSet<PeerId> = (2..=5).collect();
        assert_eq!(next_free_id(&used, 5), Err(PoolExhausted { capacity: 5 }));
        assert_eq!(
            next_free_id(&BTreeSet::new(), 1),
            Err(PoolExhausted { capacity: 1 })
        );
    }

    #[test]
    fn derive_uses_network_base() {
        assert_eq!(derive_ipv4(&v4("10.0.0.0/24"), 5), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(derive_ipv4(&v4("10.0.0.1/24"), 5), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(
            derive_ipv4(&v4("172.16.4.9/22"), 300),
            Ipv4Addr::new(172, 16, 5, 44)
        );
        assert_eq!(
            derive_ipv6(&v6("fd00:1::1/64"), 0x1234),
            "fd00:1::1234".parse::<Ipv6Addr>().unwrap()
        );
    }
}
