//! Path manager
//!
//! Keeps an ordered table of candidate paths to the peer, drives the
//! keep-alive protocol on the active path, and migrates to the next
//! candidate when liveness is lost. Candidates come from the path
//! service (public) and from hidden-path exchanges via a rendezvous AS.
//!
//! Migration is a compare-and-swap on the `migrating` flag shared with
//! the egress endpoints: while it is set every egress write reports
//! [`CoreError::Migrating`] and is dropped by its caller. After the
//! endpoints are rebuilt on the new path the flag clears once
//! `keep_alive_timeout` has passed, giving the remote end time to
//! detect the failure on its own side.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, trace};

use pathgate_net::{
    combine_segments, LeastHopsSorter, Path, PathService, PathSorter, SegmentStore,
};

use crate::adapter::PeerWriter;
use crate::config::{PathingConf, RemoteConf};
use crate::error::{CoreError, CoreResult};
use crate::message::Message;
use crate::peer::Peer;
use crate::PATH_REFRESH_INTERVAL;

struct PathTable {
    paths: Vec<Path>,
    path_idx: usize,
    hidden: Vec<Path>,
    hidden_idx: usize,
    current: Option<Path>,
}

/// Path manager bound to one peer session.
pub struct PathMgr {
    conf: PathingConf,
    /// Test-only override: fail over to hidden paths first.
    hidden_failover: bool,
    peer: Weak<Peer>,
    path_service: Arc<dyn PathService>,
    segments: Arc<dyn SegmentStore>,
    remote: RemoteConf,
    sorter: Box<dyn PathSorter>,
    table: Mutex<PathTable>,
    migrating: Arc<AtomicBool>,
    /// Keep-alive clock: nanoseconds relative to `epoch`, stored
    /// atomically so the checker and the ingress reader never contend.
    epoch: Instant,
    last_keepalive_ns: AtomicU64,
}

impl PathMgr {
    pub(crate) fn new(
        conf: PathingConf,
        hidden_failover: bool,
        peer: Weak<Peer>,
        path_service: Arc<dyn PathService>,
        segments: Arc<dyn SegmentStore>,
        remote: RemoteConf,
        migrating: Arc<AtomicBool>,
    ) -> Self {
        Self {
            conf,
            hidden_failover,
            peer,
            path_service,
            segments,
            remote,
            sorter: Box::new(LeastHopsSorter),
            table: Mutex::new(PathTable {
                paths: Vec::new(),
                path_idx: 0,
                hidden: Vec::new(),
                hidden_idx: 0,
                current: None,
            }),
            migrating,
            epoch: Instant::now(),
            last_keepalive_ns: AtomicU64::new(0),
        }
    }

    /// Invoked once at handshake completion: arm the liveness clock,
    /// kick off the hidden-path exchange when a rendezvous is
    /// configured, and spawn the periodic tasks.
    pub(crate) fn start(self: &Arc<Self>) {
        self.reset_timeouts();
        if self.remote.rendezvous_addr.is_some() {
            let mgr = self.clone();
            tokio::spawn(async move {
                if let Err(e) = mgr.send_hidden_path().await {
                    error!(error = %e, "error sending hidden path to remote");
                }
            });
        }
        self.spawn_keepalive_sender();
        self.spawn_keepalive_checker();
        self.spawn_path_refresher();
    }

    /// Query the path service, de-duplicate by fingerprint preserving
    /// first occurrences, sort, and install the fresh table. An empty
    /// query result leaves the table untouched.
    pub(crate) async fn update_paths_to_remote(&self) -> CoreResult<()> {
        let paths = self.path_service.paths(self.remote.address.ia).await?;

        let mut seen = HashSet::new();
        let mut unique: Vec<Path> = Vec::with_capacity(paths.len());
        for path in paths {
            if seen.insert(path.fingerprint()) {
                unique.push(path);
            }
        }
        if unique.is_empty() {
            return Err(CoreError::NoPaths);
        }
        self.sorter.sort_paths(&mut unique);
        debug!(remote = %self.remote.address.ia, count = unique.len(), "updated paths");

        let mut table = self.table.lock().unwrap();
        table.paths = unique;
        table.path_idx = 0;
        table.current = Some(table.paths[0].clone());
        Ok(())
    }

    /// Path currently used by the egress endpoints.
    pub(crate) fn current_path(&self) -> Option<Path> {
        self.table.lock().unwrap().current.clone()
    }

    /// Advance to the next candidate. With `prefer_hidden`, cycle the
    /// hidden paths first and fall back to the public cursor once the
    /// last hidden candidate was already active.
    fn next_path(&self, prefer_hidden: bool) -> Option<Path> {
        let mut table = self.table.lock().unwrap();
        if prefer_hidden && !table.hidden.is_empty() {
            let exhausted = table.hidden_idx == table.hidden.len() - 1
                && table.current.as_ref() == table.hidden.get(table.hidden_idx);
            if exhausted {
                table.hidden_idx = 0;
                let idx = table.path_idx;
                table.paths.get(idx).cloned()
            } else {
                table.hidden_idx = (table.hidden_idx + 1) % table.hidden.len();
                let idx = table.hidden_idx;
                table.hidden.get(idx).cloned()
            }
        } else if !table.paths.is_empty() {
            table.path_idx = (table.path_idx + 1) % table.paths.len();
            let idx = table.path_idx;
            Some(table.paths[idx].clone())
        } else {
            None
        }
    }

    /// Fail over to the next candidate path. No-op when a migration is
    /// already in flight.
    pub(crate) async fn migrate(self: &Arc<Self>) -> CoreResult<()> {
        if self
            .migrating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("another migrate operation is in progress");
            return Ok(());
        }

        let next = match self.next_path(self.hidden_failover) {
            Some(path) => path,
            None => {
                self.migrating.store(false, Ordering::Release);
                return Err(CoreError::NoPaths);
            }
        };
        info!(path = %next.format_hops(), remote = %self.remote.address.ia, "migrating connection");
        self.table.lock().unwrap().current = Some(next);

        let Some(peer) = self.peer.upgrade() else {
            self.migrating.store(false, Ordering::Release);
            return Ok(());
        };
        if let Err(e) = peer.setup_egress_conns().await {
            self.migrating.store(false, Ordering::Release);
            return Err(e);
        }

        // Keep writes blocked for one keep-alive timeout so the remote
        // end detects the failure and migrates too.
        let mgr = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(mgr.conf.keep_alive_timeout).await;
            mgr.migrating.store(false, Ordering::Release);
            mgr.reset_timeouts();
        });
        Ok(())
    }

    pub(crate) fn handle_keepalive(&self) {
        trace!(elapsed = ?self.keepalive_elapsed(), "new keepalive");
        self.store_keepalive(self.epoch.elapsed());
    }

    /// Arm the liveness clock `migrate_grace_timeout` into the future so
    /// a freshly set up path is not timed out immediately.
    fn reset_timeouts(&self) {
        self.store_keepalive(self.epoch.elapsed() + self.conf.migrate_grace_timeout);
    }

    fn store_keepalive(&self, at: Duration) {
        self.last_keepalive_ns
            .store(at.as_nanos() as u64, Ordering::Release);
    }

    fn keepalive_elapsed(&self) -> Duration {
        let last = Duration::from_nanos(self.last_keepalive_ns.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(last)
    }

    fn spawn_keepalive_sender(self: &Arc<Self>) {
        let mgr = self.clone();
        tokio::spawn(async move {
            debug!("sending keep alive messages");
            let period = mgr.conf.keep_alive_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if mgr.migrating.load(Ordering::Acquire) {
                    trace!("skipping keepalive send during migration");
                    continue;
                }
                let Some(peer) = mgr.peer.upgrade() else { break };
                match peer.write_msg(&Message::KeepAlive).await {
                    Ok(()) => {}
                    Err(CoreError::Migrating) => debug!("skipped keepalive msg"),
                    Err(e) => error!(error = %e, "couldn't write keepalive msg"),
                }
            }
        });
    }

    fn spawn_keepalive_checker(self: &Arc<Self>) {
        let mgr = self.clone();
        tokio::spawn(async move {
            debug!("checking keep alive messages");
            let period = mgr.conf.keep_alive_timeout_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if mgr.migrating.load(Ordering::Acquire) {
                    trace!("skipping liveness check during migration");
                    continue;
                }
                if mgr.peer.strong_count() == 0 {
                    break;
                }
                let elapsed = mgr.keepalive_elapsed();
                if elapsed > mgr.conf.keep_alive_timeout {
                    debug!(
                        ?elapsed,
                        remote = %mgr.remote.address.ia,
                        "timeout expired, migrating to another path"
                    );
                    if let Err(e) = mgr.migrate().await {
                        error!(error = %e, "migration failed");
                    }
                }
            }
        });
    }

    fn spawn_path_refresher(self: &Arc<Self>) {
        let mgr = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                interval_at(Instant::now() + PATH_REFRESH_INTERVAL, PATH_REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                if mgr.peer.strong_count() == 0 {
                    break;
                }
                if let Err(e) = mgr.update_paths_to_remote().await {
                    error!(error = %e, remote = %mgr.remote.address.ia, "path refresh failed");
                }
            }
        });
    }

    /// Send our up-segment towards the rendezvous AS so the remote side
    /// can construct hidden paths to us.
    async fn send_hidden_path(&self) -> CoreResult<()> {
        let rendezvous = self
            .remote
            .rendezvous_addr
            .ok_or_else(|| CoreError::Config("rendezvous not set".to_string()))?;
        let segment = self
            .segments
            .up_segment(rendezvous, self.remote.address.ia)?;
        debug!("sending hidden path segment");
        let Some(peer) = self.peer.upgrade() else {
            return Ok(());
        };
        peer.write_msg(&Message::HiddenPathRequest { segment }).await
    }

    /// Combine the remote's segment with our own segment to the
    /// rendezvous and install the resulting hidden candidates.
    pub(crate) async fn handle_hidden_path_request(
        &self,
        remote_segment: &pathgate_net::PathSegment,
    ) -> CoreResult<()> {
        debug!("received hidden path segment");
        let rendezvous = self
            .remote
            .rendezvous_addr
            .ok_or_else(|| CoreError::Config("rendezvous not set".to_string()))?;
        let local_segment = self
            .segments
            .up_segment(rendezvous, self.remote.address.ia)?;

        // Hidden paths carry no overlay metadata of their own; borrow
        // the next hop of the best public path.
        let next_hop = {
            let table = self.table.lock().unwrap();
            table.paths.first().map(|p| p.next_hop)
        }
        .ok_or(CoreError::NoPaths)?;

        let combined = combine_segments(
            &local_segment,
            remote_segment,
            self.remote.address.ia,
            rendezvous,
            next_hop,
        );
        if combined.is_empty() {
            return Err(CoreError::NoPaths);
        }
        info!(count = combined.len(), "adding hidden paths");
        let mut table = self.table.lock().unwrap();
        table.hidden.extend(combined);
        table.hidden_idx = 0;
        Ok(())
    }
}
