use crate::protocol::{Tick, TickEvent};
use std::collections::BTreeMap;
use tracing::debug;

/// Per-tick accumulator of serialized bulk events.
///
/// Entries come out of [`EventBuffer::flush_up_to`] in tick order, and in
/// admission order within a tick. Once a tick has been flushed, events for
/// earlier ticks are admitted under the flushed tick instead.
#[derive(Debug, Default)]
pub struct EventBuffer {
    ticks: BTreeMap<Tick, Vec<Vec<u8>>>,
    watermark: Option<Tick>,
    len: usize,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a serialized event to `tick`'s accumulator. Returns the tick the
    /// event was filed under.
    pub fn admit_bulk(&mut self, tick: Tick, payload: Vec<u8>) -> Tick {
        let tick = match self.watermark {
            Some(watermark) if tick < watermark => {
                debug!(
                    "Bulk event for tick {} arrived after flush of tick {}, filing under {}",
                    tick, watermark, watermark
                );
                watermark
            }
            _ => tick,
        };
        self.ticks.entry(tick).or_default().push(payload);
        self.len += 1;
        tick
    }

    /// Remove and return every entry with tick <= `tick`
    pub fn flush_up_to(&mut self, tick: Tick) -> Vec<TickEvent> {
        let remaining = match tick.checked_add(1) {
            Some(next) => self.ticks.split_off(&next),
            None => BTreeMap::new(),
        };
        let flushed = std::mem::replace(&mut self.ticks, remaining);

        self.watermark = Some(self.watermark.map_or(tick, |w| w.max(tick)));

        let batch: Vec<TickEvent> = flushed
            .into_iter()
            .flat_map(|(tick, payloads)| {
                payloads
                    .into_iter()
                    .map(move |payload| TickEvent { tick, payload })
            })
            .collect();
        self.len -= batch.len();
        batch
    }

    pub fn has_pending(&self) -> bool {
        self.len > 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop all buffered events and forget the watermark
    pub fn clear(&mut self) {
        self.ticks.clear();
        self.watermark = None;
        self.len = 0;
    }
}
