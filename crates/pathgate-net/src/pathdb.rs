//! File-backed path and segment database
//!
//! Stands in for an external path lookup daemon: a YAML file lists the
//! known paths per destination AS plus the up-segments available for
//! hidden-path construction.
//!
//! ```yaml
//! paths:
//!   1-ff00:0:111:
//!     - interfaces: ["1-ff00:0:110#1", "1-ff00:0:111#1"]
//!       nextHop: "10.0.0.2:30001"
//!       mtu: 1280
//! segments:
//!   - interfaces: ["1-ff00:0:110#2", "1-ff00:0:199#1"]
//! ```

use std::collections::HashMap;
use std::path::Path as FsPath;

use async_trait::async_trait;
use serde::Deserialize;

use crate::addr::IsdAs;
use crate::error::{NetError, NetResult};
use crate::network::PathService;
use crate::path::{Path, PathInterface};
use crate::segment::{PathSegment, SegmentList, SegmentStore};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PathSpec {
    interfaces: Vec<PathInterface>,
    next_hop: std::net::SocketAddr,
    #[serde(default)]
    mtu: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SegmentSpec {
    interfaces: Vec<PathInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DbSpec {
    #[serde(default)]
    paths: HashMap<IsdAs, Vec<PathSpec>>,
    #[serde(default)]
    segments: Vec<SegmentSpec>,
}

/// Path service and segment store loaded from a YAML database file.
pub struct PathDb {
    paths: HashMap<IsdAs, Vec<Path>>,
    segments: SegmentList,
}

impl PathDb {
    pub fn load(path: &FsPath) -> NetResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NetError::Database(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> NetResult<Self> {
        let spec: DbSpec =
            serde_yaml::from_str(raw).map_err(|e| NetError::Database(e.to_string()))?;
        let paths = spec
            .paths
            .into_iter()
            .map(|(dst, specs)| {
                let paths = specs
                    .into_iter()
                    .map(|s| Path {
                        dst,
                        interfaces: s.interfaces,
                        next_hop: s.next_hop,
                        mtu: s.mtu,
                        partial: false,
                    })
                    .collect();
                (dst, paths)
            })
            .collect();
        let segments = SegmentList::new(
            spec.segments
                .into_iter()
                .map(|s| PathSegment {
                    interfaces: s.interfaces,
                })
                .collect(),
        );
        Ok(Self { paths, segments })
    }

    /// Build a database directly from parts, for tests and tooling.
    pub fn from_parts(paths: HashMap<IsdAs, Vec<Path>>, segments: Vec<PathSegment>) -> Self {
        Self {
            paths,
            segments: SegmentList::new(segments),
        }
    }
}

#[async_trait]
impl PathService for PathDb {
    async fn paths(&self, dst: IsdAs) -> NetResult<Vec<Path>> {
        Ok(self.paths.get(&dst).cloned().unwrap_or_default())
    }
}

impl SegmentStore for PathDb {
    fn up_segment(&self, rendezvous: IsdAs, avoid: IsdAs) -> NetResult<PathSegment> {
        self.segments.up_segment(rendezvous, avoid)
    }
}
