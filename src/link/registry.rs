//! Channel slot registry with supersession
//!
//! Each logical channel has exactly one slot. A new connection on an
//! occupied channel takes the slot over and the previous handler is told
//! to close; a generation counter keeps stale handlers from clearing or
//! mutating a slot they no longer own.

use crate::protocol::ChannelKind;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// Connection state of one channel slot.
///
/// Only the autonomy channel currently moves through the full
/// lifecycle; `Connecting` is part of the model but not produced by
/// the current handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Live handle installed in a slot.
struct SlotHandle {
    generation: u64,
    close_tx: mpsc::Sender<()>,
}

#[derive(Default)]
struct Slot {
    conn: Option<SlotHandle>,
    state: ConnectionState,
}

/// Result of installing a connection into its channel slot.
pub struct Attached {
    /// Generation to present on every later registry call for this connection.
    pub generation: u64,
    /// Signalled when a newer connection takes the slot over.
    pub close_rx: mpsc::Receiver<()>,
}

/// One slot per channel plus the shared generation counter.
pub struct ChannelRegistry {
    slots: [Mutex<Slot>; 4],
    generation: AtomicU64,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(Slot::default())),
            generation: AtomicU64::new(0),
        }
    }

    /// Install a new connection into the slot for `kind`.
    ///
    /// The slot moves to `Connected`. If another connection held the slot
    /// it is signalled to close; its later `detach`/`set_state` calls
    /// become no-ops because its generation no longer matches.
    pub async fn attach(&self, kind: ChannelKind) -> Attached {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (close_tx, close_rx) = mpsc::channel(1);

        let mut slot = self.slots[kind.index()].lock().await;
        let old = slot.conn.replace(SlotHandle {
            generation,
            close_tx,
        });
        slot.state = ConnectionState::Connected;
        drop(slot);

        match old {
            Some(old) => {
                // Wake the superseded handler; if it already exited the
                // signal lands on a dropped receiver and that is fine.
                let _ = old.close_tx.try_send(());
                info!(
                    channel = %kind,
                    generation,
                    superseded = old.generation,
                    "channel handle superseded"
                );
            }
            None => info!(channel = %kind, generation, "channel attached"),
        }

        Attached {
            generation,
            close_rx,
        }
    }

    /// Clear the slot, but only if `generation` still owns it.
    ///
    /// Returns whether the slot was cleared. A stale handler (superseded
    /// by a newer connection) must not tear down the newer registration.
    pub async fn detach(&self, kind: ChannelKind, generation: u64) -> bool {
        let mut slot = self.slots[kind.index()].lock().await;
        match &slot.conn {
            Some(handle) if handle.generation == generation => {
                slot.conn = None;
                slot.state = ConnectionState::Disconnected;
                info!(channel = %kind, generation, "channel detached");
                true
            }
            _ => {
                debug!(
                    channel = %kind,
                    stale_generation = generation,
                    "skipping detach: slot owned by a newer connection"
                );
                false
            }
        }
    }

    /// Move the slot to `state`, but only if `generation` still owns it.
    /// Returns whether the state is now `state` under this owner.
    pub async fn set_state(
        &self,
        kind: ChannelKind,
        generation: u64,
        state: ConnectionState,
    ) -> bool {
        let mut slot = self.slots[kind.index()].lock().await;
        match &slot.conn {
            Some(handle) if handle.generation == generation => {
                if slot.state != state {
                    debug!(channel = %kind, ?state, "channel state changed");
                    slot.state = state;
                }
                true
            }
            _ => false,
        }
    }

    /// Whether `generation` still owns the slot for `kind`.
    pub async fn owns(&self, kind: ChannelKind, generation: u64) -> bool {
        let slot = self.slots[kind.index()].lock().await;
        matches!(&slot.conn, Some(handle) if handle.generation == generation)
    }

    /// Current state of the slot for `kind`.
    pub async fn state(&self, kind: ChannelKind) -> ConnectionState {
        self.slots[kind.index()].lock().await.state
    }

    /// Whether any connection currently holds the slot for `kind`.
    pub async fn attached(&self, kind: ChannelKind) -> bool {
        self.slots[kind.index()].lock().await.conn.is_some()
    }
}
