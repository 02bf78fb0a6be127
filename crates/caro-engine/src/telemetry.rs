//! Search telemetry — a bounded, lossy stats channel.
//!
//! Publishing never blocks the search: when the channel is full the oldest
//! event is dropped to make room. Telemetry is advisory by design; a
//! consumer that falls behind loses history, not throughput.

use std::time::{SystemTime, UNIX_EPOCH};

use caro_core::{Move, Player};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// Per-search statistics attached to every event.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveStats {
    /// Identifier of the publishing engine instance.
    pub publisher: u32,
    /// The side the stats describe.
    pub side: Player,
    /// The chosen (or pondered) move.
    pub mv: Move,
    /// Highest completed search depth.
    pub depth: u8,
    /// Deepest ply touched, including quiescence.
    pub seldepth: u8,
    /// Total nodes across all workers.
    pub nodes: u64,
    /// Nodes per second.
    pub nps: u64,
    /// Transposition-table hit rate in `0.0..=1.0`.
    pub tt_hit_rate: f64,
    /// Score in centipawn-equivalent units.
    pub score: i32,
    /// Worker threads used.
    pub threads: usize,
    /// Wall-clock spend in milliseconds.
    pub elapsed_ms: u64,
    /// Unix timestamp in milliseconds at publication.
    pub timestamp_ms: u64,
    /// Principal variation of the final iteration.
    pub pv: Vec<Move>,
    /// Whether a ponder search was active.
    pub pondering: bool,
    /// Depth reached by the VCF pre-search.
    pub vcf_depth: u8,
    /// Nodes visited by the VCF pre-search.
    pub vcf_nodes: u64,
}

/// A telemetry event, tagged by the search that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsEvent {
    /// The move-producing search.
    MainSearch(MoveStats),
    /// A background search on the opponent's predicted reply.
    Pondering(MoveStats),
    /// The VCF pre-solver.
    VcfSearch(MoveStats),
}

impl StatsEvent {
    /// The wrapped stats regardless of tag.
    pub fn stats(&self) -> &MoveStats {
        match self {
            StatsEvent::MainSearch(stats)
            | StatsEvent::Pondering(stats)
            | StatsEvent::VcfSearch(stats) => stats,
        }
    }
}

/// The publishing end of the telemetry channel.
///
/// Cloneable; the search controller holds one per engine instance.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    tx: Sender<StatsEvent>,
    // Held to pop the oldest event when the channel is full.
    overflow: Receiver<StatsEvent>,
}

impl TelemetrySink {
    /// Channel with the default capacity; returns the sink and the
    /// subscriber end.
    pub fn new() -> (TelemetrySink, Receiver<StatsEvent>) {
        TelemetrySink::with_capacity(DEFAULT_CAPACITY)
    }

    /// Channel with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> (TelemetrySink, Receiver<StatsEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        let sink = TelemetrySink {
            tx,
            overflow: rx.clone(),
        };
        (sink, rx)
    }

    /// Publish without blocking, dropping the oldest event when full.
    pub fn publish(&self, event: StatsEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let _ = self.overflow.try_recv();
                let _ = self.tx.try_send(event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Milliseconds since the Unix epoch, for event timestamps.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(depth: u8) -> MoveStats {
        MoveStats {
            publisher: 1,
            side: Player::First,
            mv: Move::new(7, 7),
            depth,
            seldepth: depth,
            nodes: 1_000,
            nps: 100_000,
            tt_hit_rate: 0.25,
            score: 42,
            threads: 4,
            elapsed_ms: 10,
            timestamp_ms: unix_millis(),
            pv: vec![Move::new(7, 7)],
            pondering: false,
            vcf_depth: 0,
            vcf_nodes: 0,
        }
    }

    #[test]
    fn events_flow_to_the_subscriber() {
        let (sink, rx) = TelemetrySink::with_capacity(8);
        sink.publish(StatsEvent::MainSearch(stats(5)));
        let event = rx.try_recv().expect("event should be queued");
        assert_eq!(event.stats().depth, 5);
        assert!(matches!(event, StatsEvent::MainSearch(_)));
    }

    #[test]
    fn overflow_drops_the_oldest_event() {
        let (sink, rx) = TelemetrySink::with_capacity(2);
        sink.publish(StatsEvent::MainSearch(stats(1)));
        sink.publish(StatsEvent::MainSearch(stats(2)));
        sink.publish(StatsEvent::MainSearch(stats(3)));

        let first = rx.try_recv().expect("channel should hold two events");
        let second = rx.try_recv().expect("channel should hold two events");
        assert_eq!(first.stats().depth, 2, "oldest event is dropped");
        assert_eq!(second.stats().depth, 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publish_never_blocks_without_a_consumer() {
        let (sink, rx) = TelemetrySink::with_capacity(4);
        for i in 0..100 {
            sink.publish(StatsEvent::VcfSearch(stats(i as u8)));
        }
        // Still alive, and the newest events are retained.
        let latest = rx.try_iter().last().unwrap();
        assert_eq!(latest.stats().depth, 99);
    }

    #[test]
    fn event_tags_survive_the_channel() {
        let (sink, rx) = TelemetrySink::with_capacity(4);
        sink.publish(StatsEvent::Pondering(stats(3)));
        sink.publish(StatsEvent::VcfSearch(stats(4)));
        assert!(matches!(rx.try_recv().unwrap(), StatsEvent::Pondering(_)));
        assert!(matches!(rx.try_recv().unwrap(), StatsEvent::VcfSearch(_)));
    }
}
