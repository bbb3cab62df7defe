//! Split tunneling
//!
//! Destinations inside a configured CIDR range are dialed directly instead
//! of entering the tunnel. Rule updates build a whole new trie off-lock
//! and swap it in, so queries always see either the old set or the new
//! one, never a partial load.

mod trie;

pub use trie::CidrTrie;

use ipnet::IpNet;
use std::io::BufRead;
use std::net::IpAddr;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Atomically swappable CIDR rule set
#[derive(Debug, Default)]
pub struct SplitTunnel {
    rules: RwLock<CidrTrie>,
}

impl SplitTunnel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the rule trie from `paths` and swap it in.
    ///
    /// Rule files are UTF-8 text, one entry per line: a CIDR, or a bare
    /// address treated as /32 (v4) or /128 (v6). Blank lines, `#` comments
    /// and malformed entries are skipped; unreadable files are logged and
    /// skipped.
    pub fn update_rules(&self, paths: &[&str]) {
        let mut trie = CidrTrie::default();
        for &path in paths {
            if path.is_empty() {
                continue;
            }
            let file = match std::fs::File::open(path) {
                Ok(file) => file,
                Err(e) => {
                    warn!(path, "failed to open rule file: {e}");
                    continue;
                }
            };
            for line in std::io::BufReader::new(file).lines() {
                let Ok(line) = line else { break };
                if let Some(net) = parse_rule(&line) {
                    trie.insert(&net);
                }
            }
            debug!(path, "loaded rule file");
        }

        let count = trie.len();
        *self.rules.write().unwrap() = trie;
        info!(rules = count, "split-tunnel rules updated");
    }

    /// Drop all rules.
    pub fn clear(&self) {
        *self.rules.write().unwrap() = CidrTrie::default();
    }

    /// Whether `host` is an IP literal covered by the current rule set.
    /// Anything unparseable, domains included, stays in the tunnel.
    pub fn should_bypass(&self, host: &str) -> bool {
        let Ok(ip) = host.parse::<IpAddr>() else {
            return false;
        };
        self.rules.read().unwrap().contains(&ip)
    }
}

fn parse_rule(line: &str) -> Option<IpNet> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    line.parse::<IpNet>()
        .ok()
        .or_else(|| line.parse::<IpAddr>().ok().map(IpNet::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_rules(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("minewire-{}-{name}", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_rule_forms() {
        assert_eq!(
            parse_rule("10.0.0.0/8"),
            Some("10.0.0.0/8".parse().unwrap())
        );
        assert_eq!(
            parse_rule("203.0.113.9"),
            Some("203.0.113.9/32".parse().unwrap())
        );
        assert_eq!(parse_rule("2001:db8::1"), Some("2001:db8::1/128".parse().unwrap()));
        assert_eq!(parse_rule("# comment"), None);
        assert_eq!(parse_rule("   "), None);
        assert_eq!(parse_rule("not an ip"), None);
    }

    #[test]
    fn test_update_and_query() {
        let path = write_rules(
            "rules.txt",
            "# private ranges\n10.0.0.0/8\n\n192.168.1.1\nbogus line\n",
        );
        let split = SplitTunnel::new();
        split.update_rules(&[path.to_str().unwrap()]);

        assert!(split.should_bypass("10.1.2.3"));
        assert!(split.should_bypass("192.168.1.1"));
        assert!(!split.should_bypass("192.168.1.2"));
        assert!(!split.should_bypass("8.8.8.8"));
        assert!(!split.should_bypass("example.com"));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_swap_replaces_whole_set() {
        let first = write_rules("first.txt", "10.0.0.0/8\n");
        let second = write_rules("second.txt", "172.16.0.0/12\n");

        let split = SplitTunnel::new();
        split.update_rules(&[first.to_str().unwrap()]);
        assert!(split.should_bypass("10.1.2.3"));

        split.update_rules(&[second.to_str().unwrap()]);
        assert!(!split.should_bypass("10.1.2.3"));
        assert!(split.should_bypass("172.16.5.5"));

        std::fs::remove_file(first).ok();
        std::fs::remove_file(second).ok();
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let split = SplitTunnel::new();
        split.update_rules(&["/nonexistent/minewire-rules"]);
        assert!(!split.should_bypass("10.1.2.3"));
    }
}
