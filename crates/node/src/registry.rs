use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lansync_core::entities::{FileMeta, WireMessage};
use lansync_core::utils::Logger;

use crate::transport::TlsStream;
use crate::wire::write_frame;

static LOGGER: Logger = Logger::verbose("Registry");

/// The live-session index: peer id to connection, one entry per peer. The
/// registry never closes a connection itself; a displaced session notices
/// EOF in its own read loop and cleans up after itself.
pub struct Registry {
    conns: Mutex<HashMap<String, Arc<TlsStream>>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            conns: Mutex::new(HashMap::new()),
        }
    }

    /// Latest connection wins; an earlier registration for the same id is
    /// dropped from the index but left open.
    pub fn register(&self, device_id: &str, conn: Arc<TlsStream>) {
        let old = self
            .conns
            .lock()
            .unwrap()
            .insert(device_id.to_string(), conn);
        if old.is_some() {
            LOGGER.debug(format!("replaced session for {}", device_id));
        }
    }

    /// Remove the entry, but only while it still points at this connection —
    /// a reconnect may have replaced it already.
    pub fn unregister(&self, device_id: &str, conn: &Arc<TlsStream>) {
        let mut conns = self.conns.lock().unwrap();
        if let Some(current) = conns.get(device_id) {
            if Arc::ptr_eq(current, conn) {
                conns.remove(device_id);
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        self.conns.lock().unwrap().len()
    }

    /// Write one frame to every registered peer. Failing peers are logged
    /// and skipped, not evicted: their own read loops notice the breakage.
    /// Writes happen outside the registry lock so a slow peer cannot stall
    /// sessions trying to register.
    pub fn broadcast(&self, msg: &WireMessage) {
        let snapshot: Vec<(String, Arc<TlsStream>)> = self
            .conns
            .lock()
            .unwrap()
            .iter()
            .map(|(id, conn)| (id.clone(), conn.clone()))
            .collect();

        for (device_id, conn) in snapshot {
            let mut w = conn.writer();
            if let Err(e) = write_frame(&mut w, msg) {
                LOGGER.error(format!("broadcast to {} failed: {}", device_id, e));
            }
        }
    }

    pub fn broadcast_index(&self, device_id: &str, files: Vec<FileMeta>) {
        self.broadcast(&WireMessage::Index {
            device_id: device_id.to_string(),
            files,
        });
    }

    pub fn broadcast_file_request(&self, hash: &str, path: &str) {
        self.broadcast(&WireMessage::FileRequest {
            hash: hash.to_string(),
            path: path.to_string(),
        });
    }

    pub fn broadcast_vote(&self, hash: &str, name: &str) {
        self.broadcast(&WireMessage::ConsensusVote {
            hash: hash.to_string(),
            name: name.to_string(),
        });
    }
}
