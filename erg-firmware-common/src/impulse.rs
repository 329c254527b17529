use core::cell::Cell;

use embassy_sync::blocking_mutex::{Mutex as BlockingMutex, raw::RawMutex};
use serde::{Deserialize, Serialize};

/// One accepted flywheel rotation edge.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Impulse {
    pub timestamp_us: u64,
    /// Time since the previous accepted impulse.
    pub delta_us: u64,
}

#[derive(Clone, Copy, Default)]
struct RawEdge {
    timestamp_us: u64,
    count: u32,
}

/// Edges recorded by the interrupt handler since the last `take`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatchedEdge {
    /// Timestamp of the most recent raw edge.
    pub timestamp_us: u64,
    /// Raw edges seen since the last drain. More than 1 means the main loop
    /// fell behind the sensor and edges were coalesced.
    pub count: u32,
}

/// The only object the rotation interrupt touches. `record` stores a
/// timestamp and bumps a counter inside one short critical section; all
/// arithmetic is deferred to the main loop via `take`.
pub struct EdgeLatch<M: RawMutex> {
    inner: BlockingMutex<M, Cell<RawEdge>>,
}

impl<M: RawMutex> EdgeLatch<M> {
    pub const fn new() -> Self {
        Self {
            inner: BlockingMutex::new(Cell::new(RawEdge {
                timestamp_us: 0,
                count: 0,
            })),
        }
    }

    /// Interrupt context. Bounded, minimal work.
    pub fn record(&self, now_us: u64) {
        self.inner.lock(|cell| {
            let mut edge = cell.get();
            edge.timestamp_us = now_us;
            edge.count = edge.count.saturating_add(1);
            cell.set(edge);
        });
    }

    /// Main loop. Reads and clears the latch in one critical section so a
    /// concurrent `record` can never produce a torn read.
    pub fn take(&self) -> Option<LatchedEdge> {
        self.inner.lock(|cell| {
            let edge = cell.replace(RawEdge::default());
            if edge.count == 0 {
                None
            } else {
                Some(LatchedEdge {
                    timestamp_us: edge.timestamp_us,
                    count: edge.count,
                })
            }
        })
    }
}

impl<M: RawMutex> Default for EdgeLatch<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Main-loop half of impulse capture: validates raw edges into a monotonic,
/// debounced impulse sequence.
///
/// Debounce is judged against the previous *raw* edge, so a contact-bounce
/// burst suppresses itself entirely instead of leaking one impulse per
/// debounce interval. The delta of an accepted impulse is measured against
/// the previous *accepted* impulse.
pub struct ImpulseCapture {
    debounce_us: u64,
    stopped_threshold_us: u64,
    attached: bool,
    last_raw_us: Option<u64>,
    last_accepted_us: Option<u64>,
    raw_edge_count: u32,
    accepted_count: u32,
}

impl ImpulseCapture {
    pub fn new(debounce_us: u64, stopped_threshold_us: u64) -> Self {
        Self {
            debounce_us,
            stopped_threshold_us,
            attached: true,
            last_raw_us: None,
            last_accepted_us: None,
            raw_edge_count: 0,
            accepted_count: 0,
        }
    }

    /// Resume capture. The first edge after an attach only re-arms the
    /// baseline timestamp, it never produces a stale multi-second delta.
    pub fn attach(&mut self) {
        self.attached = true;
    }

    /// Suspend capture, e.g. while a firmware-update transfer wants the
    /// interrupt load gone. Baselines are dropped so nothing spans the gap.
    pub fn detach(&mut self) {
        self.attached = false;
        self.last_raw_us = None;
        self.last_accepted_us = None;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn accept(&mut self, raw_timestamp_us: u64) -> Option<Impulse> {
        if !self.attached {
            return None;
        }
        self.raw_edge_count = self.raw_edge_count.saturating_add(1);

        if let Some(last_raw) = self.last_raw_us {
            if raw_timestamp_us <= last_raw {
                log_warn!(
                    "non-monotonic rotation edge dropped: {} after {}",
                    raw_timestamp_us,
                    last_raw
                );
                return None;
            }
            if raw_timestamp_us - last_raw < self.debounce_us {
                // contact bounce, expected sensor behavior
                self.last_raw_us = Some(raw_timestamp_us);
                return None;
            }
        }
        self.last_raw_us = Some(raw_timestamp_us);

        let Some(last_accepted) = self.last_accepted_us else {
            // first edge only establishes the baseline
            self.last_accepted_us = Some(raw_timestamp_us);
            return None;
        };

        self.last_accepted_us = Some(raw_timestamp_us);
        self.accepted_count = self.accepted_count.saturating_add(1);
        Some(Impulse {
            timestamp_us: raw_timestamp_us,
            delta_us: raw_timestamp_us - last_accepted,
        })
    }

    /// True when no impulse has been accepted within the stopped threshold.
    pub fn is_stopped(&self, now_us: u64) -> bool {
        match self.last_accepted_us {
            Some(last) => now_us.saturating_sub(last) > self.stopped_threshold_us,
            None => false,
        }
    }

    /// Drops the timestamp baselines after idle detection. Counters survive.
    pub fn reset(&mut self) {
        self.last_raw_us = None;
        self.last_accepted_us = None;
    }

    pub fn raw_edge_count(&self) -> u32 {
        self.raw_edge_count
    }

    pub fn accepted_count(&self) -> u32 {
        self.accepted_count
    }
}
