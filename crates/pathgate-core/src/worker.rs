//! Ingress and egress packet workers
//!
//! One task per direction drains a bounded channel of pooled buffers:
//! ingress buffers go to the adapter for delivery into the local
//! network, egress buffers go to the adapter for forwarding to a peer.
//! Producers never block; a full channel drops the packet and returns
//! the buffer to the pool.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::adapter::{Adapter, PeerDirectory};
use crate::pool::MemPool;
use crate::{BUF_SIZE, CHAN_LENGTH};

/// Producer-side handle: the buffer pool plus the worker channel.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<BytesMut>,
    pool: Arc<MemPool>,
}

impl WorkerHandle {
    pub fn pool(&self) -> &Arc<MemPool> {
        &self.pool
    }

    /// Enqueue a filled buffer. On a full channel the packet is dropped
    /// and its buffer restored to the pool.
    pub fn enqueue(&self, buf: BytesMut) {
        match self.tx.try_send(buf) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(buf)) => {
                debug!("worker channel full, dropping packet");
                self.pool.put(buf);
            }
            Err(mpsc::error::TrySendError::Closed(buf)) => {
                warn!("worker channel closed, dropping packet");
                self.pool.put(buf);
            }
        }
    }
}

/// Spawn the worker delivering peer traffic into the local network.
pub fn spawn_ingress_worker(adapter: Arc<dyn Adapter>) -> WorkerHandle {
    let (tx, mut rx) = mpsc::channel::<BytesMut>(CHAN_LENGTH);
    let pool = Arc::new(MemPool::new(BUF_SIZE, CHAN_LENGTH));
    let handle = WorkerHandle {
        tx,
        pool: pool.clone(),
    };
    tokio::spawn(async move {
        debug!("starting ingress worker");
        while let Some(buf) = rx.recv().await {
            adapter.process_ingress_pkt(&buf).await;
            pool.put(buf);
        }
    });
    handle
}

/// Spawn the worker forwarding local traffic to peers.
pub fn spawn_egress_worker(
    adapter: Arc<dyn Adapter>,
    peers: Arc<dyn PeerDirectory>,
) -> WorkerHandle {
    let (tx, mut rx) = mpsc::channel::<BytesMut>(CHAN_LENGTH);
    let pool = Arc::new(MemPool::new(BUF_SIZE, CHAN_LENGTH));
    let handle = WorkerHandle {
        tx,
        pool: pool.clone(),
    };
    tokio::spawn(async move {
        debug!("starting egress worker");
        while let Some(mut buf) = rx.recv().await {
            adapter.process_egress_pkt(&mut buf, peers.as_ref()).await;
            pool.put(buf);
        }
    });
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use pathgate_net::IsdAs;
    use std::sync::Mutex;

    use crate::error::CoreResult;
    use crate::message::Message;

    struct RecordingAdapter {
        ingress: Mutex<Vec<Vec<u8>>>,
        notify: tokio::sync::Notify,
    }

    #[async_trait]
    impl Adapter for RecordingAdapter {
        async fn read(&self, _buf: &mut [u8]) -> CoreResult<usize> {
            std::future::pending().await
        }

        async fn process_ingress_pkt(&self, buf: &[u8]) {
            self.ingress.lock().unwrap().push(buf.to_vec());
            self.notify.notify_one();
        }

        async fn process_egress_pkt(
            &self,
            _buf: &mut BytesMut,
            _peers: &dyn PeerDirectory,
        ) {
        }

        async fn process_ctrl_msg(&self, _msg: Message, _remote: IsdAs) {}

        async fn handshake_complete(&self, _peer: Arc<dyn crate::adapter::PeerWriter>) {}
    }

    #[tokio::test]
    async fn ingress_worker_processes_and_recycles() {
        let adapter = Arc::new(RecordingAdapter {
            ingress: Mutex::new(Vec::new()),
            notify: tokio::sync::Notify::new(),
        });
        let handle = spawn_ingress_worker(adapter.clone());

        let mut buf = handle.pool().get().unwrap();
        buf.truncate(3);
        buf[..3].copy_from_slice(&[1, 2, 3]);
        handle.enqueue(buf);

        adapter.notify.notified().await;
        assert_eq!(adapter.ingress.lock().unwrap()[0], vec![1, 2, 3]);
    }
}
