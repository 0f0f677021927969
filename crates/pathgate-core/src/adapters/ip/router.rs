//! Destination-subnet router
//!
//! Maps egress destination addresses to the AS of the peer gateway
//! behind which the subnet lives. Entries are appended as peers announce
//! their subnets and consulted linearly, first match wins. Duplicate
//! subnets are allowed; the first installed entry keeps winning, which
//! preserves the announcement order semantics.

use std::net::Ipv4Addr;
use std::sync::RwLock;

use pathgate_net::{Ipv4Net, IsdAs};

use crate::error::{CoreError, CoreResult};

/// Append-only first-match route table.
pub struct Router {
    entries: RwLock<Vec<(Ipv4Net, IsdAs)>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// AS of the first installed entry whose subnet contains `addr`.
    pub fn lookup(&self, addr: Ipv4Addr) -> CoreResult<IsdAs> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .find(|(net, _)| net.contains(addr))
            .map(|(_, ia)| *ia)
            .ok_or(CoreError::NoRoute(addr))
    }

    /// Append a route entry.
    pub fn add_net(&self, net: Ipv4Net, ia: IsdAs) {
        self.entries.write().unwrap().push((net, ia));
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ia(s: &str) -> IsdAs {
        s.parse().unwrap()
    }

    #[test]
    fn first_match_wins_in_insertion_order() {
        let router = Router::new();
        router.add_net("10.10.0.0/16".parse().unwrap(), ia("1-ff00:0:111"));
        router.add_net("10.10.1.0/24".parse().unwrap(), ia("1-ff00:0:112"));

        // both entries cover 10.10.1.5; the earlier, wider one wins
        assert_eq!(
            router.lookup("10.10.1.5".parse().unwrap()).unwrap(),
            ia("1-ff00:0:111")
        );
    }

    #[test]
    fn duplicate_subnets_keep_the_first_entry() {
        let router = Router::new();
        let net: Ipv4Net = "10.10.1.0/24".parse().unwrap();
        router.add_net(net, ia("1-ff00:0:111"));
        router.add_net(net, ia("1-ff00:0:112"));
        assert_eq!(
            router.lookup("10.10.1.9".parse().unwrap()).unwrap(),
            ia("1-ff00:0:111")
        );
    }

    #[test]
    fn miss_reports_no_route() {
        let router = Router::new();
        router.add_net("10.10.1.0/24".parse().unwrap(), ia("1-ff00:0:111"));
        assert!(matches!(
            router.lookup("192.168.0.1".parse().unwrap()),
            Err(CoreError::NoRoute(_))
        ));
    }
}
