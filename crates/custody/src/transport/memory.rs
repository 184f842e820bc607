use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::CustodyError;
use crate::transport::{MessageBus, SendScope};

/// One frame as seen by a receiving endpoint or the upstream router.
#[derive(Debug, Clone)]
pub struct BusFrame {
    /// Bus name of the sending node.
    pub sender: String,
    pub tag: String,
    pub bytes: Vec<u8>,
}

/// In-memory message bus hub for testing.
///
/// Register each node to get a [`MemoryBus`] endpoint plus a receiver of the
/// frames addressed to it. `Peers` sends fan out to every other endpoint;
/// `Upstream` sends are captured for inspection instead of being routed.
pub struct MemoryBusHub {
    inner: Mutex<HubInner>,
}

struct HubInner {
    endpoints: HashMap<String, mpsc::UnboundedSender<BusFrame>>,
    upstream: Vec<BusFrame>,
}

impl MemoryBusHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HubInner {
                endpoints: HashMap::new(),
                upstream: Vec::new(),
            }),
        })
    }

    /// Register a node and return its bus endpoint and incoming frame stream.
    pub fn register(
        self: &Arc<Self>,
        name: impl Into<String>,
    ) -> (MemoryBus, mpsc::UnboundedReceiver<BusFrame>) {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().endpoints.insert(name.clone(), tx);
        (
            MemoryBus {
                hub: Arc::clone(self),
                name,
            },
            rx,
        )
    }

    /// Frames sent upstream so far (peer-ready pass-through assertions).
    pub fn upstream_frames(&self) -> Vec<BusFrame> {
        self.inner.lock().upstream.clone()
    }
}

/// A node's endpoint on a [`MemoryBusHub`].
pub struct MemoryBus {
    hub: Arc<MemoryBusHub>,
    name: String,
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn send(
        &self,
        scope: SendScope,
        tag: &str,
        payload: &[u8],
    ) -> Result<(), CustodyError> {
        let frame = BusFrame {
            sender: self.name.clone(),
            tag: tag.to_string(),
            bytes: payload.to_vec(),
        };
        let mut inner = self.hub.inner.lock();
        match scope {
            SendScope::Peers => {
                for (name, tx) in inner.endpoints.iter() {
                    if name != &self.name {
                        // Endpoint gone = node shut down; best-effort delivery.
                        let _ = tx.send(frame.clone());
                    }
                }
            }
            SendScope::Node(target) => {
                let tx = inner.endpoints.get(&target).ok_or_else(|| {
                    CustodyError::BusUnavailable {
                        reason: format!("no endpoint registered for node {target}"),
                        source: None,
                    }
                })?;
                let _ = tx.send(frame);
            }
            SendScope::Upstream => {
                inner.upstream.push(frame);
            }
        }
        Ok(())
    }
}
