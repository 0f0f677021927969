//! IP tunnel adapter
//!
//! Terminates a kernel TUN device: egress IPv4 packets are routed to
//! the peer behind whose gateway the destination subnet lives, ingress
//! packets are written back to the TUN. Peers announce their subnet in
//! a [`Message::Conf`] after the handshake; each announcement installs
//! a router entry and a kernel route.

mod router;

pub use router::Router;

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tracing::{debug, error, warn};

use pathgate_net::{IsdAs, TunIo};

use crate::adapter::{Adapter, PeerDirectory, PeerWriter};
use crate::config::AdapterConf;
use crate::error::{CoreError, CoreResult};
use crate::message::Message;

const IP4_VERSION: u8 = 4;
const IP4_HEADER_LEN: usize = 20;
const IP4_DST_OFFSET: usize = 16;

/// Destination address of an IPv4 packet.
fn dest_ip(buf: &[u8]) -> CoreResult<Ipv4Addr> {
    if buf.len() < IP4_HEADER_LEN {
        return Err(CoreError::UnsupportedIp(0));
    }
    let version = buf[0] >> 4;
    if version != IP4_VERSION {
        return Err(CoreError::UnsupportedIp(version));
    }
    let octets: [u8; 4] = buf[IP4_DST_OFFSET..IP4_DST_OFFSET + 4]
        .try_into()
        .expect("bounds checked");
    Ok(Ipv4Addr::from(octets))
}

/// Adapter bridging the gateway to a local IP network behind a TUN
/// device.
pub struct IpAdapter {
    conf: AdapterConf,
    tun: Arc<dyn TunIo>,
    router: Router,
}

impl IpAdapter {
    pub fn new(conf: AdapterConf, tun: Arc<dyn TunIo>) -> Self {
        Self {
            conf,
            tun,
            router: Router::new(),
        }
    }

    /// Create the adapter together with its kernel TUN device.
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    pub async fn create(conf: AdapterConf) -> CoreResult<Self> {
        let tun = pathgate_net::TunDevice::create(&pathgate_net::TunConf {
            name: conf.tun_name.clone(),
            addr: conf.addr,
            mtu: conf.mtu,
            tx_qlen: conf.tx_qlen,
        })
        .await?;
        Ok(Self::new(conf, Arc::new(tun)))
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

#[async_trait]
impl Adapter for IpAdapter {
    async fn read(&self, buf: &mut [u8]) -> CoreResult<usize> {
        Ok(self.tun.recv(buf).await?)
    }

    async fn process_ingress_pkt(&self, buf: &[u8]) {
        match self.tun.send(buf).await {
            Ok(n) if n < buf.len() => {
                warn!(required = buf.len(), written = n, "couldn't write ingress pkt in one go");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "error writing ingress pkt to tun"),
        }
    }

    async fn process_egress_pkt(&self, buf: &mut BytesMut, peers: &dyn PeerDirectory) {
        let dst = match dest_ip(buf) {
            Ok(dst) => dst,
            Err(e) => {
                debug!(error = %e, "error getting destination IP");
                return;
            }
        };
        let remote_ia = match self.router.lookup(dst) {
            Ok(ia) => ia,
            Err(_) => {
                error!(%dst, "no remote gateway found");
                return;
            }
        };
        let writer = match peers.writer(remote_ia).await {
            Ok(writer) => writer,
            Err(e) => {
                error!(remote = %remote_ia, error = %e, "error getting writer");
                return;
            }
        };
        match writer.write_data(buf).await {
            Ok(_) => {}
            Err(CoreError::Migrating) => debug!("skipping write, peer is migrating"),
            Err(e) => error!(error = %e, "error writing buffer to remote"),
        }
    }

    async fn process_ctrl_msg(&self, msg: Message, remote: IsdAs) {
        match msg {
            Message::Conf { subnet } => {
                debug!(%subnet, %remote, "received IP conf");
                self.router.add_net(subnet, remote);
                if let Err(e) = self.tun.add_route(subnet).await {
                    error!(%subnet, %remote, error = %e, "error adding route");
                }
            }
            other => {
                warn!(kind = other.kind(), "unknown message type received");
            }
        }
    }

    async fn handshake_complete(&self, peer: Arc<dyn PeerWriter>) {
        debug!("sending conf to remote gateway");
        let msg = Message::Conf {
            subnet: self.conf.subnet,
        };
        if let Err(e) = peer.write_msg(&msg).await {
            error!(error = %e, "error sending conf");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pathgate_net::MemTun;

    fn adapter() -> (IpAdapter, Arc<MemTun>) {
        let conf = AdapterConf::from_yaml(
            r#"
subnet: "10.10.0.0/24"
addr: "10.10.0.1"
"#,
        )
        .unwrap();
        let tun = Arc::new(MemTun::new(conf.mtu));
        (IpAdapter::new(conf, tun.clone()), tun)
    }

    fn ipv4_packet(dst: Ipv4Addr, len: usize) -> Vec<u8> {
        let mut pkt = vec![0u8; len.max(IP4_HEADER_LEN)];
        pkt[0] = 0x45;
        pkt[IP4_DST_OFFSET..IP4_DST_OFFSET + 4].copy_from_slice(&dst.octets());
        pkt
    }

    #[test]
    fn extracts_ipv4_destination() {
        let pkt = ipv4_packet("10.0.0.5".parse().unwrap(), 64);
        assert_eq!(dest_ip(&pkt).unwrap(), "10.0.0.5".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn rejects_non_ipv4() {
        let mut pkt = ipv4_packet("10.0.0.5".parse().unwrap(), 64);
        pkt[0] = 0x60; // IPv6
        assert!(matches!(dest_ip(&pkt), Err(CoreError::UnsupportedIp(6))));
    }

    #[test]
    fn rejects_runt_frames() {
        assert!(dest_ip(&[0x45u8; 10]).is_err());
    }

    #[tokio::test]
    async fn conf_msg_installs_router_entry_and_kernel_route() {
        let (adapter, tun) = adapter();
        let remote: IsdAs = "1-ff00:0:111".parse().unwrap();
        let subnet = "10.10.1.0/24".parse().unwrap();

        adapter
            .process_ctrl_msg(Message::Conf { subnet }, remote)
            .await;

        assert_eq!(
            adapter.router().lookup("10.10.1.5".parse().unwrap()).unwrap(),
            remote
        );
        assert_eq!(tun.routes(), vec![subnet]);
    }

    #[tokio::test]
    async fn non_conf_ctrl_messages_are_ignored() {
        let (adapter, _tun) = adapter();
        adapter
            .process_ctrl_msg(Message::KeepAlive, "1-ff00:0:111".parse().unwrap())
            .await;
        assert!(adapter.router().lookup("10.10.1.5".parse().unwrap()).is_err());
    }
}
