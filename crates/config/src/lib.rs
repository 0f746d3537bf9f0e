pub use std::net::Ipv4Addr;

pub const ANY_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);
pub const BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

/// Default TCP port for the peer listener, overridable with --port.
pub const DEFAULT_PORT: u16 = 9000;
pub const DISCOVERY_PORT: u16 = 9999;

pub const DISCOVERY_PREFIX: &str = "SYNC_PEER_DISCOVERY";
pub const DISCOVERY_PROBE_PREFIX: &str = "SYNC_PEER_PROBE";
pub const DISCOVERY_INTERVAL_SECS: u64 = 5;

pub const CHUNK_SIZE: usize = 4096;

// Throwaway per-process TLS identity
pub const CERT_ORGANIZATION: &str = "Sync Service";
pub const CERT_SERIAL: u64 = 1;
pub const CERT_VALIDITY_DAYS: i64 = 365;
