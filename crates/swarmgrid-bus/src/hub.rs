//! In-process broadcast hub and the port handle participants use.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::{BusError, BusResult};
use crate::message::Frame;

const FANOUT_CAPACITY: usize = 1024;
const OUTBOUND_CAPACITY: usize = 256;

/// Every attached port sees every frame except its own.
#[derive(Clone)]
pub struct Hub {
    fanout: broadcast::Sender<(u64, Frame)>,
    next_port: Arc<AtomicU64>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            fanout,
            next_port: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Attach a new participant. Must be called inside a tokio runtime.
    pub fn attach(&self) -> BusPort {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();
        let mut subscription = self.fanout.subscribe();
        let fanout = self.fanout.clone();

        tokio::spawn(async move {
            let mut inbound_open = true;
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => match outgoing {
                        Some(frame) => {
                            // No subscribers is not an error for a broadcast bus.
                            let _ = fanout.send((port, frame));
                        }
                        None => break,
                    },
                    incoming = subscription.recv(), if inbound_open => match incoming {
                        Ok((origin, frame)) if origin != port => {
                            if in_tx.send(frame).is_err() {
                                inbound_open = false;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(port, skipped, "bus port lagged, frames lost");
                        }
                        Err(broadcast::error::RecvError::Closed) => inbound_open = false,
                    },
                }
            }
            debug!(port, "bus port detached");
        });

        BusPort {
            sender: BusSender { tx: out_tx },
            receiver: BusReceiver { rx: in_rx },
        }
    }

    pub fn participants(&self) -> usize {
        self.fanout.receiver_count()
    }
}

/// Cloneable sending half of a port.
#[derive(Clone)]
pub struct BusSender {
    tx: mpsc::Sender<Frame>,
}

impl BusSender {
    pub(crate) fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, frame: impl Into<Frame>) -> BusResult<()> {
        self.tx.send(frame.into()).await.map_err(|_| BusError::Closed)
    }
}

pub struct BusReceiver {
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl BusReceiver {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Frame>) -> Self {
        Self { rx }
    }

    /// Next frame from another participant; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

/// A participant's connection to the bus, local or remote.
pub struct BusPort {
    pub(crate) sender: BusSender,
    pub(crate) receiver: BusReceiver,
}

impl BusPort {
    pub async fn send(&self, frame: impl Into<Frame>) -> BusResult<()> {
        self.sender.send(frame).await
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    pub fn sender(&self) -> BusSender {
        self.sender.clone()
    }

    pub fn split(self) -> (BusSender, BusReceiver) {
        (self.sender, self.receiver)
    }
}
