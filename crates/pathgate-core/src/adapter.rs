//! Adapter contract
//!
//! An adapter owns the gateway's local side: it reads packets of
//! interest from the local network, delivers ingress packets back into
//! it, and reacts to peer control messages. The gateway core stays
//! agnostic of what "local network" means; the IP tunnel adapter is one
//! implementation, the policy/ethernet family another.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;

use pathgate_net::IsdAs;

use crate::error::CoreResult;
use crate::message::Message;

/// Write access to one peer's encrypted channels.
#[async_trait]
pub trait PeerWriter: Send + Sync {
    /// Write raw bytes to the encrypted control channel.
    async fn write_ctrl(&self, buf: &mut BytesMut) -> CoreResult<usize>;

    /// Write raw bytes to the encrypted data channel.
    async fn write_data(&self, buf: &mut BytesMut) -> CoreResult<usize>;

    /// Encode and write a control message.
    async fn write_msg(&self, msg: &Message) -> CoreResult<()>;
}

/// Peer lookup by AS identifier, implemented by the gateway.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn writer(&self, ia: IsdAs) -> CoreResult<Arc<dyn PeerWriter>>;
}

/// The local-network side of the gateway.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Blocking read of one packet from the local network.
    async fn read(&self, buf: &mut [u8]) -> CoreResult<usize>;

    /// Deliver a decrypted packet from a peer into the local network.
    async fn process_ingress_pkt(&self, buf: &[u8]);

    /// Forward a local packet to the peer responsible for its
    /// destination. Drops the packet on any failure.
    async fn process_egress_pkt(&self, buf: &mut BytesMut, peers: &dyn PeerDirectory);

    /// Handle an adapter-directed control message from a peer.
    async fn process_ctrl_msg(&self, msg: Message, remote: IsdAs);

    /// Invoked once a peer's handshake completes; the adapter announces
    /// its local configuration over the peer's control channel.
    async fn handshake_complete(&self, peer: Arc<dyn PeerWriter>);
}
