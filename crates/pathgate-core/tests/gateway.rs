//! End-to-end gateway scenarios over the in-process network.
//!
//! Two gateways, each with a channel-backed TUN double, talk through a
//! shared hub. All timing runs on the paused tokio clock, so keepalive
//! and migration scenarios execute deterministically in virtual time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use pathgate_core::{
    AdapterConf, Gateway, GatewayConf, IpAdapter, Message, PathingConf, RemoteConf,
};
use pathgate_crypto::MockKeyService;
use pathgate_net::{
    Ipv4Net, IsdAs, MemHub, MemNetwork, MemTun, Network, Path, PathAddr, PathConn, PathDb,
    PathInterface, PathSegment,
};

const IA_A: &str = "1-ff00:0:110";
const IA_B: &str = "1-ff00:0:111";
const IA_RDV: &str = "1-ff00:0:199";
const ADDR_A: &str = "1-ff00:0:110,10.0.0.1:30100";
const ADDR_B: &str = "1-ff00:0:111,10.0.0.2:30100";
const SUBNET_A: &str = "10.10.0.0/24";
const SUBNET_B: &str = "10.10.1.0/24";

fn ia(s: &str) -> IsdAs {
    s.parse().unwrap()
}

fn iface(s: &str) -> PathInterface {
    s.parse().unwrap()
}

/// Two parallel two-hop paths from `src` to `dst`, distinguished by
/// interface ids.
fn paths_between(src: &str, dst: &str) -> Vec<Path> {
    (1..=2)
        .map(|i| Path {
            dst: ia(dst),
            interfaces: vec![
                iface(&format!("{src}#{i}")),
                iface(&format!("{dst}#{i}")),
            ],
            next_hop: "10.0.0.9:30001".parse().unwrap(),
            mtu: 1280,
            partial: false,
        })
        .collect()
}

struct TestGateway {
    gateway: Arc<Gateway>,
    tun: Arc<MemTun>,
    adapter: Arc<IpAdapter>,
}

struct GatewaySpec<'a> {
    local: &'a str,
    remote: &'a str,
    subnet: &'a str,
    tun_addr: &'a str,
    rendezvous: Option<&'a str>,
    hidden_failover: bool,
    segments: Vec<PathSegment>,
}

impl<'a> GatewaySpec<'a> {
    fn new(local: &'a str, remote: &'a str, subnet: &'a str, tun_addr: &'a str) -> Self {
        Self {
            local,
            remote,
            subnet,
            tun_addr,
            rendezvous: None,
            hidden_failover: false,
            segments: Vec::new(),
        }
    }
}

async fn start_gateway(hub: &Arc<MemHub>, spec: GatewaySpec<'_>) -> TestGateway {
    let local: PathAddr = spec.local.parse().unwrap();
    let remote: PathAddr = spec.remote.parse().unwrap();

    let conf = GatewayConf {
        address: local.clone(),
        adapter_conf_path: PathBuf::from("unused"),
        remotes: vec![RemoteConf {
            address: remote.clone(),
            description: String::new(),
            rendezvous_addr: spec.rendezvous.map(ia),
        }],
        pathing: PathingConf::default(),
    };
    let adapter_conf = AdapterConf {
        subnet: spec.subnet.parse().unwrap(),
        addr: spec.tun_addr.parse().unwrap(),
        tun_name: "memtun".to_string(),
        mtu: 1200,
        tx_qlen: 1000,
    };

    let tun = Arc::new(MemTun::new(adapter_conf.mtu));
    let adapter = Arc::new(IpAdapter::new(adapter_conf, tun.clone()));

    let mut path_map = HashMap::new();
    path_map.insert(
        remote.ia,
        paths_between(&local.ia.to_string(), &remote.ia.to_string()),
    );
    let db = Arc::new(PathDb::from_parts(path_map, spec.segments));

    let network = Arc::new(MemNetwork::new(hub.clone(), local.ia));
    let key_service = Arc::new(MockKeyService::default());

    let gateway = Gateway::new(
        conf,
        spec.hidden_failover,
        network,
        db.clone(),
        db,
        key_service,
        adapter.clone(),
    );
    gateway.start().await.unwrap();
    TestGateway {
        gateway,
        tun,
        adapter,
    }
}

/// A minimal 64-byte IPv4 packet towards `dst` with a recognizable
/// payload byte.
fn ipv4_packet(dst: &str, seq: u8) -> Vec<u8> {
    let dst: std::net::Ipv4Addr = dst.parse().unwrap();
    let mut pkt = vec![0u8; 64];
    pkt[0] = 0x45;
    pkt[16..20].copy_from_slice(&dst.octets());
    pkt[63] = seq;
    pkt
}

async fn wait_handshake(gw: &TestGateway, remote: &str) {
    timeout(Duration::from_secs(30), async {
        loop {
            if let Some(peer) = gw.gateway.peer(ia(remote)).await {
                if peer.handshake_completed() {
                    return;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handshake did not complete");
}

async fn wait_route(gw: &TestGateway, subnet: &str) {
    let subnet: Ipv4Net = subnet.parse().unwrap();
    timeout(Duration::from_secs(30), async {
        loop {
            if gw.tun.routes().contains(&subnet) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("route was not installed");
}

/// Inject `pkt` into `from`'s TUN until it pops out of `to`'s TUN.
/// Retries because sends racing a migration are dropped by design.
async fn assert_tunneled(from: &TestGateway, to: &TestGateway, dst: &str, seq: u8) {
    let pkt = ipv4_packet(dst, seq);
    timeout(Duration::from_secs(30), async {
        loop {
            from.tun.inject(pkt.clone());
            let deadline = sleep(Duration::from_millis(200));
            tokio::pin!(deadline);
            tokio::select! {
                received = to.tun.written() => {
                    let received = received.expect("tun closed");
                    if received == pkt {
                        return;
                    }
                    // stale packet from an earlier attempt; keep going
                }
                _ = &mut deadline => {}
            }
        }
    })
    .await
    .expect("packet did not traverse the tunnel");
}

fn fail_both_directions(hub: &MemHub, path_index: usize) {
    for (src, dst) in [(IA_A, IA_B), (IA_B, IA_A)] {
        let path = &paths_between(src, dst)[path_index];
        hub.fail_path(&path.fingerprint());
    }
}

#[tokio::test(start_paused = true)]
async fn basic_tunnel_delivers_packets_both_ways() {
    let hub = MemHub::new();
    let a = start_gateway(&hub, GatewaySpec::new(ADDR_A, ADDR_B, SUBNET_A, "10.10.0.1")).await;
    let b = start_gateway(&hub, GatewaySpec::new(ADDR_B, ADDR_A, SUBNET_B, "10.10.1.1")).await;

    wait_handshake(&a, IA_B).await;
    wait_handshake(&b, IA_A).await;
    wait_route(&a, SUBNET_B).await;
    wait_route(&b, SUBNET_A).await;

    assert_tunneled(&a, &b, "10.10.1.5", 1).await;
    assert_tunneled(&b, &a, "10.10.0.5", 2).await;
}

#[tokio::test(start_paused = true)]
async fn configuration_message_installs_remote_subnet() {
    let hub = MemHub::new();
    let a = start_gateway(&hub, GatewaySpec::new(ADDR_A, ADDR_B, SUBNET_A, "10.10.0.1")).await;
    let _b = start_gateway(&hub, GatewaySpec::new(ADDR_B, ADDR_A, SUBNET_B, "10.10.1.1")).await;

    wait_handshake(&a, IA_B).await;
    wait_route(&a, SUBNET_B).await;

    // kernel route and route-table entry both point B's subnet at B
    assert!(a.tun.routes().contains(&SUBNET_B.parse().unwrap()));
    assert_eq!(
        a.adapter.router().lookup("10.10.1.5".parse().unwrap()).unwrap(),
        ia(IA_B)
    );
}

#[tokio::test(start_paused = true)]
async fn migration_restores_traffic_after_path_failure() {
    let hub = MemHub::new();
    let a = start_gateway(&hub, GatewaySpec::new(ADDR_A, ADDR_B, SUBNET_A, "10.10.0.1")).await;
    let b = start_gateway(&hub, GatewaySpec::new(ADDR_B, ADDR_A, SUBNET_B, "10.10.1.1")).await;

    wait_handshake(&a, IA_B).await;
    wait_handshake(&b, IA_A).await;
    wait_route(&a, SUBNET_B).await;
    assert_tunneled(&a, &b, "10.10.1.5", 1).await;

    // kill the active path in both directions; keepalives stop and both
    // sides fail over to the second candidate
    fail_both_directions(&hub, 0);
    assert_tunneled(&a, &b, "10.10.1.5", 2).await;
}

#[tokio::test(start_paused = true)]
async fn hidden_path_carries_traffic_when_public_paths_die() {
    let hub = MemHub::new();
    let seg_a = PathSegment {
        interfaces: vec![iface("1-ff00:0:110#7"), iface("1-ff00:0:199#1")],
    };
    let seg_b = PathSegment {
        interfaces: vec![iface("1-ff00:0:111#7"), iface("1-ff00:0:199#2")],
    };
    let mut spec_a = GatewaySpec::new(ADDR_A, ADDR_B, SUBNET_A, "10.10.0.1");
    spec_a.rendezvous = Some(IA_RDV);
    spec_a.hidden_failover = true;
    spec_a.segments = vec![seg_a];
    let mut spec_b = GatewaySpec::new(ADDR_B, ADDR_A, SUBNET_B, "10.10.1.1");
    spec_b.rendezvous = Some(IA_RDV);
    spec_b.hidden_failover = true;
    spec_b.segments = vec![seg_b];

    let a = start_gateway(&hub, spec_a).await;
    let b = start_gateway(&hub, spec_b).await;

    wait_handshake(&a, IA_B).await;
    wait_handshake(&b, IA_A).await;
    wait_route(&a, SUBNET_B).await;
    assert_tunneled(&a, &b, "10.10.1.5", 1).await;

    // let the hidden-path exchange settle, then kill every public path
    sleep(Duration::from_secs(1)).await;
    fail_both_directions(&hub, 0);
    fail_both_directions(&hub, 1);

    assert_tunneled(&a, &b, "10.10.1.5", 2).await;
}

#[tokio::test(start_paused = true)]
async fn handshake_retries_until_the_responder_comes_up() {
    let hub = MemHub::new();
    let a = start_gateway(&hub, GatewaySpec::new(ADDR_A, ADDR_B, SUBNET_A, "10.10.0.1")).await;

    // requests towards the missing responder disappear into the void
    sleep(Duration::from_secs(3)).await;
    assert!(!a.gateway.peer(ia(IA_B)).await.unwrap().handshake_completed());

    let b = start_gateway(&hub, GatewaySpec::new(ADDR_B, ADDR_A, SUBNET_B, "10.10.1.1")).await;
    wait_handshake(&a, IA_B).await;
    wait_handshake(&b, IA_A).await;
}

#[tokio::test(start_paused = true)]
async fn unknown_source_as_is_dropped_without_touching_peers() {
    let hub = MemHub::new();
    let a = start_gateway(&hub, GatewaySpec::new(ADDR_A, ADDR_B, SUBNET_A, "10.10.0.1")).await;
    let b = start_gateway(&hub, GatewaySpec::new(ADDR_B, ADDR_A, SUBNET_B, "10.10.1.1")).await;

    wait_handshake(&a, IA_B).await;
    wait_route(&a, SUBNET_B).await;

    // a gateway from an unconfigured AS knocks on A's accept address
    let stranger = MemNetwork::new(hub.clone(), ia("1-ff00:0:222"));
    let path = Path {
        dst: ia(IA_A),
        interfaces: vec![iface("1-ff00:0:222#1"), iface("1-ff00:0:110#3")],
        next_hop: "10.0.0.9:30001".parse().unwrap(),
        mtu: 1280,
        partial: false,
    };
    let conn = stranger
        .dial(ADDR_A.parse().unwrap(), &path)
        .await
        .unwrap();
    let msg = Message::HandshakeRequest {
        pub_key: [3u8; 32],
        pub_key_tag: [4u8; 16],
        ctrl_port: 1,
        data_port: 2,
    };
    conn.send(&msg.encode().unwrap()).await.unwrap();
    sleep(Duration::from_millis(500)).await;

    // established state is untouched and traffic still flows
    assert!(a.gateway.peer(ia(IA_B)).await.unwrap().handshake_completed());
    assert!(a.gateway.peer(ia("1-ff00:0:222")).await.is_none());
    assert_tunneled(&a, &b, "10.10.1.5", 3).await;
}

#[tokio::test(start_paused = true)]
async fn tampered_handshake_tag_is_rejected_then_clean_retry_succeeds() {
    let hub = MemHub::new();
    let a = start_gateway(&hub, GatewaySpec::new(ADDR_A, ADDR_B, SUBNET_A, "10.10.0.1")).await;

    // forge a handshake request from B's AS with a bad tag
    let imposter = MemNetwork::new(hub.clone(), ia(IA_B));
    let path = Path {
        dst: ia(IA_A),
        interfaces: vec![iface("1-ff00:0:111#3"), iface("1-ff00:0:110#3")],
        next_hop: "10.0.0.9:30001".parse().unwrap(),
        mtu: 1280,
        partial: false,
    };
    let conn = imposter
        .dial(ADDR_A.parse().unwrap(), &path)
        .await
        .unwrap();
    let msg = Message::HandshakeRequest {
        pub_key: [5u8; 32],
        pub_key_tag: [6u8; 16],
        ctrl_port: 7,
        data_port: 8,
    };
    conn.send(&msg.encode().unwrap()).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    // no session state was installed
    assert!(!a.gateway.peer(ia(IA_B)).await.unwrap().handshake_completed());

    // a correctly tagged handshake from the real B still succeeds
    let b = start_gateway(&hub, GatewaySpec::new(ADDR_B, ADDR_A, SUBNET_B, "10.10.1.1")).await;
    wait_handshake(&a, IA_B).await;
    wait_route(&a, SUBNET_B).await;
    assert_tunneled(&a, &b, "10.10.1.5", 4).await;
}
