//! Binary prefix trie over IP address bits
//!
//! Containment is "any inserted prefix lies on the walk from the root",
//! so overlapping rules cost nothing and lookups are O(address width).

use ipnet::IpNet;
use std::net::IpAddr;

#[derive(Debug, Default)]
struct Node {
    children: [Option<Box<Node>>; 2],
    terminal: bool,
}

/// Immutable-once-built CIDR index for both address families
#[derive(Debug, Default)]
pub struct CidrTrie {
    v4: Node,
    v6: Node,
    len: usize,
}

impl CidrTrie {
    /// Number of inserted prefixes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert one prefix
    pub fn insert(&mut self, net: &IpNet) {
        match net {
            IpNet::V4(n) => insert_bits(
                &mut self.v4,
                u128::from(u32::from(n.network())) << 96,
                n.prefix_len(),
            ),
            IpNet::V6(n) => insert_bits(&mut self.v6, u128::from(n.network()), n.prefix_len()),
        }
        self.len += 1;
    }

    /// Whether any inserted prefix contains `ip`
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => contains_bits(&self.v4, u128::from(u32::from(*v4)) << 96, 32),
            IpAddr::V6(v6) => contains_bits(&self.v6, u128::from(*v6), 128),
        }
    }
}

fn insert_bits(root: &mut Node, bits: u128, prefix_len: u8) {
    let mut node = root;
    for i in 0..prefix_len {
        let bit = ((bits >> (127 - u32::from(i))) & 1) as usize;
        node = node.children[bit].get_or_insert_with(Default::default);
    }
    node.terminal = true;
}

fn contains_bits(root: &Node, bits: u128, width: u8) -> bool {
    let mut node = root;
    if node.terminal {
        return true;
    }
    for i in 0..width {
        let bit = ((bits >> (127 - u32::from(i))) & 1) as usize;
        match &node.children[bit] {
            Some(next) => {
                node = next;
                if node.terminal {
                    return true;
                }
            }
            None => return false,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_v4_containment() {
        let mut trie = CidrTrie::default();
        trie.insert(&"10.0.0.0/8".parse().unwrap());
        trie.insert(&"192.168.1.0/24".parse().unwrap());

        assert!(trie.contains(&ip("10.1.2.3")));
        assert!(trie.contains(&ip("10.255.255.255")));
        assert!(trie.contains(&ip("192.168.1.77")));
        assert!(!trie.contains(&ip("192.168.2.1")));
        assert!(!trie.contains(&ip("11.0.0.1")));
    }

    #[test]
    fn test_host_prefix() {
        let mut trie = CidrTrie::default();
        trie.insert(&"203.0.113.9/32".parse().unwrap());
        assert!(trie.contains(&ip("203.0.113.9")));
        assert!(!trie.contains(&ip("203.0.113.8")));
    }

    #[test]
    fn test_v6_containment() {
        let mut trie = CidrTrie::default();
        trie.insert(&"2001:db8::/32".parse().unwrap());
        assert!(trie.contains(&ip("2001:db8::1")));
        assert!(trie.contains(&ip("2001:db8:ffff::1")));
        assert!(!trie.contains(&ip("2001:db9::1")));
        assert!(!trie.contains(&ip("10.0.0.1")));
    }

    #[test]
    fn test_zero_length_prefix_matches_all() {
        let mut trie = CidrTrie::default();
        trie.insert(&"0.0.0.0/0".parse().unwrap());
        assert!(trie.contains(&ip("8.8.8.8")));
        assert!(!trie.contains(&ip("2001:db8::1")));
    }

    #[test]
    fn test_empty_matches_nothing() {
        let trie = CidrTrie::default();
        assert!(trie.is_empty());
        assert!(!trie.contains(&ip("8.8.8.8")));
    }
}
