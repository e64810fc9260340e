//! Resolution of a host's position within a job's host set.
//!
//! Compressed range-set hostlist formats are out of scope here; only the
//! lookup behavior a per-node projection needs is in scope.

/// Resolves a hostname's 1-origin position within an ordered host set.
pub trait HostListResolver: Send + Sync {
    /// 1-origin index of `host` within the set, or `None` if absent.
    fn find(&self, host: &str) -> Option<u32>;

    /// Number of hosts in the set.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A simple ordered host list, e.g. parsed from a comma-separated
/// `nodelist` string.
#[derive(Debug, Clone)]
pub struct SimpleHostList {
    hosts: Vec<String>,
}

impl SimpleHostList {
    pub fn new(hosts: Vec<String>) -> Self {
        SimpleHostList { hosts }
    }

    pub fn from_csv(s: &str) -> Self {
        SimpleHostList {
            hosts: s
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

impl HostListResolver for SimpleHostList {
    fn find(&self, host: &str) -> Option<u32> {
        self.hosts
            .iter()
            .position(|h| h == host)
            .map(|i| i as u32 + 1)
    }

    fn len(&self) -> u32 {
        self.hosts.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_one_origin_position() {
        let hl = SimpleHostList::from_csv("node0,node1,node2");
        assert_eq!(hl.find("node0"), Some(1));
        assert_eq!(hl.find("node2"), Some(3));
        assert_eq!(hl.find("node9"), None);
        assert_eq!(hl.len(), 3);
    }
}
