//! Path objects
//!
//! A path is an explicit, source-selected route through the inter-domain
//! network: the ordered list of AS interfaces it traverses plus the
//! overlay next-hop to reach the first of them. Paths are compared by
//! [`Path::fingerprint`], a canonical hash of the interface list.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::addr::IsdAs;
use crate::error::NetError;

/// One AS interface on a path, written `<isd-as>#<interface-id>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathInterface {
    pub ia: IsdAs,
    pub id: u64,
}

impl fmt::Display for PathInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.ia, self.id)
    }
}

impl fmt::Debug for PathInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for PathInterface {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ia, id) = s.split_once('#').ok_or_else(|| NetError::InvalidAddress {
            input: s.to_string(),
            reason: "missing '#' between AS and interface id".to_string(),
        })?;
        Ok(PathInterface {
            ia: ia.parse()?,
            id: id.parse().map_err(|_| NetError::InvalidAddress {
                input: s.to_string(),
                reason: "bad interface id".to_string(),
            })?,
        })
    }
}

impl Serialize for PathInterface {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PathInterface {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Canonical hash of a path's interface list. Empty for partial hidden
/// paths, which are never de-duplicated against public paths.
pub type PathFingerprint = String;

/// A concrete path towards a destination AS.
#[derive(Clone, PartialEq, Eq)]
pub struct Path {
    /// Destination AS this path leads to.
    pub dst: IsdAs,
    /// Traversed interfaces, in order from the local AS outward.
    pub interfaces: Vec<PathInterface>,
    /// Overlay UDP endpoint of the first hop.
    pub next_hop: SocketAddr,
    /// Path MTU. Zero means unknown (partial hidden paths); consumers
    /// fall back to the gateway's configured MTU.
    pub mtu: u16,
    /// Partial paths are reconstituted from segments rather than a path
    /// lookup; they carry no fingerprint and are never de-duplicated
    /// against public paths.
    pub partial: bool,
}

impl Path {
    /// Fingerprint over the interface list; empty for partial paths.
    pub fn fingerprint(&self) -> PathFingerprint {
        if self.partial || self.interfaces.is_empty() {
            return String::new();
        }
        let mut hasher = Sha256::new();
        for iface in &self.interfaces {
            hasher.update(iface.ia.raw().to_be_bytes());
            hasher.update(iface.id.to_be_bytes());
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    pub fn hops(&self) -> usize {
        self.interfaces.len()
    }

    /// Human-readable hop list, `1-ff00:0:110 2>1 1-ff00:0:111` style.
    pub fn format_hops(&self) -> String {
        let ifaces = &self.interfaces;
        if ifaces.is_empty() {
            return String::new();
        }
        let mut parts = vec![format!("{} {}", ifaces[0].ia, ifaces[0].id)];
        let mut i = 1;
        while i + 1 < ifaces.len() {
            parts.push(format!(
                "{} {} {}",
                ifaces[i].id,
                ifaces[i].ia,
                ifaces[i + 1].id
            ));
            i += 2;
        }
        let last = &ifaces[ifaces.len() - 1];
        parts.push(format!("{} {}", last.id, last.ia));
        parts.join(">")
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path[{} via {}]", self.format_hops(), self.next_hop)
    }
}

/// Ordering policy for candidate paths.
pub trait PathSorter: Send + Sync {
    fn sort_paths(&self, paths: &mut Vec<Path>);
}

/// Default sorter: fewest hops first. Stable, so equal-length paths keep
/// their lookup order.
pub struct LeastHopsSorter;

impl PathSorter for LeastHopsSorter {
    fn sort_paths(&self, paths: &mut Vec<Path>) {
        paths.sort_by_key(|p| p.hops());
    }
}
