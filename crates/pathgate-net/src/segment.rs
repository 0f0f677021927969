//! Path segments and hidden-path construction
//!
//! Hidden paths between two gateways are built out of two up-segments
//! that meet at a rendezvous AS: each side contributes the segment from
//! itself to the rendezvous, and the combination is the full end-to-end
//! path. Combination works at the interface-list level only; the
//! resulting paths are partial (no MTU, no fingerprint).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::addr::IsdAs;
use crate::error::{NetError, NetResult};
use crate::path::{Path, PathInterface};

/// An up-segment from a gateway's AS towards a segment endpoint, as an
/// ordered interface list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub interfaces: Vec<PathInterface>,
}

impl PathSegment {
    /// Whether the segment traverses `ia`.
    pub fn traverses(&self, ia: IsdAs) -> bool {
        self.interfaces.iter().any(|i| i.ia == ia)
    }
}

/// Source of path segments for hidden-path construction.
pub trait SegmentStore: Send + Sync {
    /// First stored up-segment that traverses `rendezvous` and does not
    /// traverse `avoid` (the remote itself; a segment through the remote
    /// would leak the association the hidden path is meant to hide).
    fn up_segment(&self, rendezvous: IsdAs, avoid: IsdAs) -> NetResult<PathSegment>;
}

/// Combine a local and a remote up-segment into candidate end-to-end
/// paths towards `dst`, keeping only combinations that traverse the
/// rendezvous AS. The remote segment is walked backwards: it was
/// recorded from the remote gateway outward.
pub fn combine_segments(
    local: &PathSegment,
    remote: &PathSegment,
    dst: IsdAs,
    rendezvous: IsdAs,
    next_hop: SocketAddr,
) -> Vec<Path> {
    if local.interfaces.is_empty() || remote.interfaces.is_empty() {
        return Vec::new();
    }
    let mut interfaces = local.interfaces.clone();
    interfaces.extend(remote.interfaces.iter().rev().copied());
    let path = Path {
        dst,
        interfaces,
        next_hop,
        mtu: 0,
        partial: true,
    };
    if path.interfaces.iter().any(|i| i.ia == rendezvous) {
        vec![path]
    } else {
        Vec::new()
    }
}

/// In-memory segment list, the backing type of the file database.
pub struct SegmentList {
    segments: Vec<PathSegment>,
}

impl SegmentList {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }
}

impl SegmentStore for SegmentList {
    fn up_segment(&self, rendezvous: IsdAs, avoid: IsdAs) -> NetResult<PathSegment> {
        self.segments
            .iter()
            .find(|s| s.traverses(rendezvous) && !s.traverses(avoid))
            .cloned()
            .ok_or_else(|| NetError::NoSegment(format!("no up-segment via {rendezvous}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(ifaces: &[&str]) -> PathSegment {
        PathSegment {
            interfaces: ifaces.iter().map(|s| s.parse().unwrap()).collect(),
        }
    }

    #[test]
    fn combine_concatenates_and_reverses_remote() {
        let local = seg(&["1-ff00:0:110#1", "1-ff00:0:199#2"]);
        let remote = seg(&["1-ff00:0:111#5", "1-ff00:0:199#6"]);
        let rendezvous: IsdAs = "1-ff00:0:199".parse().unwrap();
        let dst: IsdAs = "1-ff00:0:111".parse().unwrap();
        let paths = combine_segments(&local, &remote, dst, rendezvous, "10.0.0.9:30001".parse().unwrap());
        assert_eq!(paths.len(), 1);
        let hops: Vec<String> = paths[0].interfaces.iter().map(|i| i.to_string()).collect();
        assert_eq!(
            hops,
            vec![
                "1-ff00:0:110#1",
                "1-ff00:0:199#2",
                "1-ff00:0:199#6",
                "1-ff00:0:111#5"
            ]
        );
        assert_eq!(paths[0].mtu, 0);
        assert_eq!(paths[0].fingerprint(), "");
    }

    #[test]
    fn combine_rejects_paths_missing_rendezvous() {
        let local = seg(&["1-ff00:0:110#1", "1-ff00:0:198#2"]);
        let remote = seg(&["1-ff00:0:111#5", "1-ff00:0:198#6"]);
        let rendezvous: IsdAs = "1-ff00:0:199".parse().unwrap();
        let dst: IsdAs = "1-ff00:0:111".parse().unwrap();
        let paths = combine_segments(&local, &remote, dst, rendezvous, "10.0.0.9:30001".parse().unwrap());
        assert!(paths.is_empty());
    }

    #[test]
    fn segment_list_filters_by_rendezvous_and_remote() {
        let via_remote = seg(&["1-ff00:0:110#1", "1-ff00:0:111#2", "1-ff00:0:199#3"]);
        let good = seg(&["1-ff00:0:110#4", "1-ff00:0:199#5"]);
        let unrelated = seg(&["1-ff00:0:110#6", "1-ff00:0:198#7"]);
        let store = SegmentList::new(vec![via_remote, good.clone(), unrelated]);

        let rendezvous = "1-ff00:0:199".parse().unwrap();
        let remote = "1-ff00:0:111".parse().unwrap();
        assert_eq!(store.up_segment(rendezvous, remote).unwrap(), good);

        let missing = "1-ff00:0:222".parse().unwrap();
        assert!(store.up_segment(missing, remote).is_err());
    }

    #[test]
    fn combine_requires_both_segments() {
        let local = seg(&["1-ff00:0:110#1", "1-ff00:0:199#2"]);
        assert!(combine_segments(
            &local,
            &seg(&[]),
            "1-ff00:0:111".parse().unwrap(),
            "1-ff00:0:199".parse().unwrap(),
            "10.0.0.9:30001".parse().unwrap()
        )
        .is_empty());
    }
}
