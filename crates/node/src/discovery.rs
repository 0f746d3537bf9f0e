use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use lansync_config::{
    ANY_ADDR, BROADCAST_ADDR, CHUNK_SIZE, DISCOVERY_INTERVAL_SECS, DISCOVERY_PORT,
    DISCOVERY_PREFIX, DISCOVERY_PROBE_PREFIX,
};
use lansync_core::helpers::create_buffer;
use lansync_core::utils::Logger;
use rand::random;

static LOGGER: Logger = Logger::verbose("Discovery");

/// Announce our listen port to the broadcast domain every few seconds,
/// forever.
pub fn run_beacon(listen_port: u16) -> io::Result<()> {
    let socket = UdpSocket::bind((ANY_ADDR, 0))?;
    socket.set_broadcast(true)?;
    let payload = format!("{}:{}", DISCOVERY_PREFIX, listen_port);

    loop {
        if let Err(e) = socket.send_to(payload.as_bytes(), (BROADCAST_ADDR, DISCOVERY_PORT)) {
            LOGGER.error(format!("beacon send failed: {}", e));
        }
        thread::sleep(Duration::from_secs(DISCOVERY_INTERVAL_SECS));
    }
}

/// Resolve our own LAN-facing IP: broadcast a random token at the discovery
/// port and take the source address it comes back with. Other nodes ignore
/// the probe because the prefix does not match a beacon.
fn resolve_self_ip(listener: &UdpSocket) -> io::Result<IpAddr> {
    let token: u128 = random();
    let probe = format!("{}:{}", DISCOVERY_PROBE_PREFIX, token);

    let sender = UdpSocket::bind((ANY_ADDR, 0))?;
    sender.set_broadcast(true)?;
    sender.send_to(probe.as_bytes(), (BROADCAST_ADDR, DISCOVERY_PORT))?;

    listener.set_read_timeout(Some(Duration::from_secs(2 * DISCOVERY_INTERVAL_SECS)))?;
    let mut buf = create_buffer(CHUNK_SIZE);
    let resolved = loop {
        match listener.recv_from(&mut buf) {
            Ok((len, remote)) => {
                if buf[..len] == *probe.as_bytes() {
                    break Ok(remote.ip());
                }
                // A beacon arriving before our own echo is dropped; the
                // peer repeats it within the interval anyway.
            }
            Err(e) => break Err(e),
        }
    };
    listener.set_read_timeout(None)?;
    resolved
}

/// `SYNC_PEER_DISCOVERY:<port>` -> the advertised port.
fn parse_beacon(msg: &str) -> Option<u16> {
    let rest = msg.strip_prefix(DISCOVERY_PREFIX)?;
    let port = rest.strip_prefix(':')?;
    port.parse().ok()
}

/// Listen for beacons and hand every newly seen foreign peer to `on_peer`
/// as `"<ip>:<port>"`. Peers are remembered for the process lifetime, so
/// each address fires the callback once.
pub fn run_listener(on_peer: impl Fn(String)) {
    let listener = match UdpSocket::bind((ANY_ADDR, DISCOVERY_PORT)) {
        Ok(s) => s,
        Err(e) => {
            // Another node on this host owns the port; --peer still works.
            LOGGER.error(format!("discovery bind failed: {}", e));
            return;
        }
    };

    let self_ip = match resolve_self_ip(&listener) {
        Ok(ip) => ip,
        Err(e) => {
            LOGGER.warn(format!(
                "self-ip probe failed ({}), own beacons may echo back",
                e
            ));
            IpAddr::from(ANY_ADDR)
        }
    };
    LOGGER.info(format!("local address resolved to {}", self_ip));

    let mut discovered: HashSet<String> = HashSet::new();
    let mut buf = create_buffer(CHUNK_SIZE);
    loop {
        let (len, remote) = match listener.recv_from(&mut buf) {
            Ok(x) => x,
            Err(e) => {
                LOGGER.error(format!("discovery read error: {}", e));
                continue;
            }
        };
        let msg = String::from_utf8_lossy(&buf[..len]);
        let port = match parse_beacon(&msg) {
            Some(p) => p,
            None => continue,
        };
        if remote.ip() == self_ip {
            continue;
        }

        let addr = format!("{}:{}", remote.ip(), port);
        if discovered.insert(addr.clone()) {
            LOGGER.info(format!("peer discovered at {}", addr));
            on_peer(addr);
        }
    }
}
