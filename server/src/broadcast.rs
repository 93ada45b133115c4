//! Fan-out of match messages to the participants' connections.

use crate::client_manager::ConnectionHandle;
use log::{debug, error};
use shared::{ServerMessage, Side};

pub struct Broadcaster {
    targets: Vec<(Side, ConnectionHandle)>,
    every: u32,
    ticks_since_snapshot: u32,
}

impl Broadcaster {
    /// `targets` lists each participant connection once per side it plays.
    /// A connection driving both sides (local play) only receives one copy.
    pub fn new(targets: Vec<(Side, ConnectionHandle)>, every: u32) -> Self {
        let mut unique: Vec<(Side, ConnectionHandle)> = Vec::with_capacity(targets.len());
        for (side, handle) in targets {
            if !unique.iter().any(|(_, h)| h.id == handle.id) {
                unique.push((side, handle));
            }
        }
        Self {
            targets: unique,
            every: every.max(1),
            ticks_since_snapshot: 0,
        }
    }

    /// Serialises once and sends to every open participant. Returns how many
    /// connections accepted the frame.
    pub fn send(&self, message: &ServerMessage) -> usize {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode broadcast: {}", e);
                return 0;
            }
        };
        let mut delivered = 0;
        for (_, handle) in &self.targets {
            if handle.is_closed() {
                continue;
            }
            if handle.send_text(text.clone()) {
                delivered += 1;
            } else {
                debug!("Skipping closed connection {}", handle.id);
            }
        }
        delivered
    }

    /// Stops sending to the connection seated on `side`.
    pub fn drop_side(&mut self, side: Side) {
        self.targets.retain(|(s, _)| *s != side);
    }

    /// Counts a tick and reports whether the periodic snapshot is due.
    pub fn snapshot_due(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.every {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Restarts the throttle after an out-of-band snapshot.
    pub fn reset_throttle(&mut self) {
        self.ticks_since_snapshot = 0;
    }
}
