//! Kernel TUN device
//!
//! The gateway terminates a layer-3 TUN interface: egress IP packets are
//! read from it, decrypted ingress packets are written back. Per-peer
//! subnet routes are installed against the interface as peers announce
//! their subnets.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::addr::Ipv4Net;
use crate::error::{NetError, NetResult};

/// Packet interface to the local network. The production implementation
/// is a kernel TUN device; tests substitute [`MemTun`].
#[async_trait]
pub trait TunIo: Send + Sync {
    /// Read one IP packet. Blocks until a packet is available.
    async fn recv(&self, buf: &mut [u8]) -> NetResult<usize>;

    /// Write one IP packet.
    async fn send(&self, buf: &[u8]) -> NetResult<usize>;

    /// Install a kernel route pointing `net` at this interface.
    async fn add_route(&self, net: Ipv4Net) -> NetResult<()>;

    fn name(&self) -> &str;

    fn mtu(&self) -> u16;
}

/// TUN device parameters, filled from the adapter configuration.
#[derive(Debug, Clone)]
pub struct TunConf {
    pub name: String,
    pub addr: Ipv4Addr,
    pub mtu: u16,
    pub tx_qlen: u32,
}

/// Kernel TUN device.
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub struct TunDevice {
    device: tokio::sync::Mutex<::tun::AsyncDevice>,
    name: String,
    mtu: u16,
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
impl TunDevice {
    /// Create and bring up the device: configured name, MTU, TX queue
    /// length, and the single-host address with a /32 mask. Peer subnets
    /// are routed here later via [`TunIo::add_route`].
    pub async fn create(conf: &TunConf) -> NetResult<Self> {
        let mut tun_config = ::tun::Configuration::default();
        tun_config
            .name(&conf.name)
            .address(conf.addr)
            .netmask(Ipv4Addr::new(255, 255, 255, 255))
            .mtu(conf.mtu as i32)
            .up();

        #[cfg(target_os = "linux")]
        tun_config.platform(|platform| {
            platform.packet_information(false);
        });

        let device = ::tun::create_as_async(&tun_config)
            .map_err(|e| NetError::Tun(format!("failed to create tun device: {e}")))?;

        let name = conf.name.clone();
        set_tx_qlen(&name, conf.tx_qlen).await?;
        info!(%name, addr = %conf.addr, mtu = conf.mtu, "created tun device");

        Ok(Self {
            device: tokio::sync::Mutex::new(device),
            name,
            mtu: conf.mtu,
        })
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
async fn set_tx_qlen(name: &str, qlen: u32) -> NetResult<()> {
    let output = tokio::process::Command::new("ip")
        .args(["link", "set", "dev", name, "txqueuelen", &qlen.to_string()])
        .output()
        .await
        .map_err(|e| NetError::Tun(format!("ip link: {e}")))?;
    if !output.status.success() {
        return Err(NetError::Tun(format!(
            "ip link set txqueuelen failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
#[async_trait]
impl TunIo for TunDevice {
    async fn recv(&self, buf: &mut [u8]) -> NetResult<usize> {
        use tokio::io::AsyncReadExt;
        let mut device = self.device.lock().await;
        let n = device
            .read(buf)
            .await
            .map_err(|e| NetError::Tun(format!("failed to read from tun: {e}")))?;
        Ok(n)
    }

    async fn send(&self, buf: &[u8]) -> NetResult<usize> {
        use tokio::io::AsyncWriteExt;
        let mut device = self.device.lock().await;
        let n = device
            .write(buf)
            .await
            .map_err(|e| NetError::Tun(format!("failed to write to tun: {e}")))?;
        Ok(n)
    }

    async fn add_route(&self, net: Ipv4Net) -> NetResult<()> {
        let output = tokio::process::Command::new("ip")
            .args(["route", "add", &net.to_string(), "dev", &self.name])
            .output()
            .await
            .map_err(|e| NetError::Tun(format!("ip route: {e}")))?;
        if !output.status.success() {
            return Err(NetError::Tun(format!(
                "ip route add {net} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!(%net, dev = %self.name, "added route to tun");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}

/// Channel-backed [`TunIo`] double for tests: packets injected with
/// [`MemTun::inject`] come out of `recv`, packets the gateway sends are
/// observable through [`MemTun::written`], installed routes are recorded.
pub struct MemTun {
    mtu: u16,
    rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>>,
    inject_tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    out_tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    out_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>>,
    routes: std::sync::Mutex<Vec<Ipv4Net>>,
}

impl MemTun {
    pub fn new(mtu: u16) -> Self {
        let (inject_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            mtu,
            rx: tokio::sync::Mutex::new(rx),
            inject_tx,
            out_tx,
            out_rx: tokio::sync::Mutex::new(out_rx),
            routes: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Feed a packet into the gateway as if the kernel delivered it.
    pub fn inject(&self, pkt: Vec<u8>) {
        let _ = self.inject_tx.send(pkt);
    }

    /// Next packet the gateway wrote towards the kernel.
    pub async fn written(&self) -> Option<Vec<u8>> {
        self.out_rx.lock().await.recv().await
    }

    /// Routes installed so far.
    pub fn routes(&self) -> Vec<Ipv4Net> {
        self.routes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TunIo for MemTun {
    async fn recv(&self, buf: &mut [u8]) -> NetResult<usize> {
        let pkt = self.rx.lock().await.recv().await.ok_or_else(|| {
            NetError::Tun("mem tun closed".to_string())
        })?;
        let n = pkt.len().min(buf.len());
        buf[..n].copy_from_slice(&pkt[..n]);
        Ok(n)
    }

    async fn send(&self, buf: &[u8]) -> NetResult<usize> {
        debug!(len = buf.len(), "mem tun write");
        let _ = self.out_tx.send(buf.to_vec());
        Ok(buf.len())
    }

    async fn add_route(&self, net: Ipv4Net) -> NetResult<()> {
        self.routes.lock().unwrap().push(net);
        Ok(())
    }

    fn name(&self) -> &str {
        "memtun"
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}
