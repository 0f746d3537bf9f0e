use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use lansync_indexer::Indexer;

pub mod discovery;
pub mod registry;
pub mod session;
pub mod shell;
pub mod state;
pub mod transport;
pub mod wire;

use registry::Registry;
use state::NetworkState;
use transport::TlsContext;

/// Everything a session or shell handler needs, passed explicitly instead of
/// living in module-level globals.
pub struct NodeContext {
    pub device_id: String,
    pub indexer: Arc<Indexer>,
    pub state: Arc<NetworkState>,
    pub registry: Arc<Registry>,
    pub tls: Arc<TlsContext>,
}

impl NodeContext {
    pub fn new(device_id: String, folder: PathBuf) -> io::Result<Arc<NodeContext>> {
        Ok(Arc::new(NodeContext {
            device_id,
            indexer: Arc::new(Indexer::new(folder)),
            state: Arc::new(NetworkState::new()),
            registry: Arc::new(Registry::new()),
            tls: Arc::new(TlsContext::new()?),
        }))
    }
}
