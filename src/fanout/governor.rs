//! Backpressure governor
//!
//! Every write to a sink goes through here. A full sink has its write
//! rejected and counted; it never blocks the caller or any other sink. A
//! sink that keeps rejecting for `threshold` consecutive writes is evicted.

use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::registry::ListenerRegistry;
use super::sink::{Sink, TryWrite};

/// Result of offering one chunk to one sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    /// Sink full; the chunk was not queued
    Rejected { consecutive: u32 },
    /// Sink was too slow for too long and has been closed
    Evicted,
    /// Listener went away
    Closed,
}

/// Per-chunk fan-out tally
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub accepted: usize,
    pub rejected: usize,
    pub evicted: usize,
    pub closed: usize,
}

impl FanOutReport {
    pub fn delivered_to_anyone(&self) -> bool {
        self.accepted > 0
    }
}

#[derive(Clone)]
pub struct BackpressureGovernor {
    registry: ListenerRegistry,
    threshold: u32,
}

impl BackpressureGovernor {
    pub fn new(registry: ListenerRegistry, threshold: u32) -> Self {
        Self {
            registry,
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Offer `chunk` to `sink` without waiting.
    ///
    /// Must be called inside a Tokio runtime: a rejection may spawn the
    /// sink's writable-again and closed watchers.
    pub fn offer(&self, sink: &Arc<Sink>, chunk: Bytes) -> WriteOutcome {
        match sink.try_write(chunk) {
            TryWrite::Accepted => WriteOutcome::Accepted,
            TryWrite::Closed => {
                self.registry.remove(sink.id());
                WriteOutcome::Closed
            }
            TryWrite::Full => {
                let consecutive = sink.record_reject();
                if consecutive >= self.threshold {
                    self.evict(sink, consecutive);
                    return WriteOutcome::Evicted;
                }
                self.watch_writable(sink);
                self.watch_closed(sink);
                WriteOutcome::Rejected { consecutive }
            }
        }
    }

    /// Offer one chunk to every sink of a snapshot
    pub fn fan_out(&self, sinks: &[Arc<Sink>], chunk: &Bytes) -> FanOutReport {
        let mut report = FanOutReport::default();
        for sink in sinks {
            match self.offer(sink, chunk.clone()) {
                WriteOutcome::Accepted => report.accepted += 1,
                WriteOutcome::Rejected { .. } => report.rejected += 1,
                WriteOutcome::Evicted => report.evicted += 1,
                WriteOutcome::Closed => report.closed += 1,
            }
        }
        report
    }

    /// Keep offering the same chunk until it is accepted or the sink is gone.
    ///
    /// Between attempts waits for the writable-again signal, at most
    /// `retry`. Every failed attempt counts toward eviction, so a stalled
    /// listener is dropped after roughly `threshold * retry`.
    pub async fn deliver(&self, sink: &Arc<Sink>, chunk: Bytes, retry: Duration) -> WriteOutcome {
        loop {
            match self.offer(sink, chunk.clone()) {
                WriteOutcome::Rejected { .. } => {
                    tokio::select! {
                        _ = sink.cancelled() => return WriteOutcome::Closed,
                        _ = sink.writable() => {}
                        _ = tokio::time::sleep(retry) => {}
                    }
                }
                outcome => return outcome,
            }
        }
    }

    fn evict(&self, sink: &Arc<Sink>, consecutive: u32) {
        if sink.close() {
            tracing::warn!(
                listener = %sink.id(),
                rejected = consecutive,
                "Evicting listener that cannot keep up"
            );
        }
        self.registry.remove(sink.id());
    }

    fn watch_writable(&self, sink: &Arc<Sink>) {
        if !sink.claim_writable_watch() {
            return;
        }
        let sink = Arc::clone(sink);
        tokio::spawn(async move {
            tokio::select! {
                permit = sink.sender().reserve() => {
                    if let Ok(permit) = permit {
                        // capacity is back; hand the slot straight back
                        drop(permit);
                        sink.mark_writable();
                    }
                }
                _ = sink.cancelled() => {}
            }
        });
    }

    fn watch_closed(&self, sink: &Arc<Sink>) {
        if !sink.claim_closed_watch() {
            return;
        }
        let sink = Arc::clone(sink);
        let registry = self.registry.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sink.sender().closed() => {}
                _ = sink.cancelled() => {}
            }
            sink.close();
            registry.remove(sink.id());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::SinkPhase;
    use tokio::sync::mpsc;

    fn chunk(i: u32) -> Bytes {
        Bytes::copy_from_slice(&i.to_be_bytes())
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(b) = rx.try_recv() {
            out.push(b);
        }
        out
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_slow_sink_recovers_without_losing_later_chunks() {
        let registry = ListenerRegistry::new();
        let governor = BackpressureGovernor::new(registry.clone(), 500);

        let (slow, mut slow_rx) = Sink::channel(2);
        registry.add(slow.clone());
        let mut fast = Vec::new();
        for _ in 0..3 {
            let (sink, rx) = Sink::channel(64);
            registry.add(sink);
            fast.push(rx);
        }

        // slow listener stops reading for 10 chunks
        for i in 0..10 {
            let report = governor.fan_out(&registry.snapshot(), &chunk(i));
            assert_eq!(report.accepted + report.rejected, 4);
            for rx in &mut fast {
                assert_eq!(drain(rx), vec![chunk(i)]);
            }
        }
        assert_eq!(slow.consecutive_rejects(), 8);
        assert_eq!(slow.phase(), SinkPhase::Draining);

        // it catches up
        assert_eq!(drain(&mut slow_rx), vec![chunk(0), chunk(1)]);
        wait_until(|| slow.consecutive_rejects() == 0).await;
        assert_eq!(slow.phase(), SinkPhase::Open);

        for i in 10..30 {
            let report = governor.fan_out(&registry.snapshot(), &chunk(i));
            assert_eq!(report.accepted, 4);
            assert_eq!(drain(&mut slow_rx), vec![chunk(i)]);
            for rx in &mut fast {
                assert_eq!(drain(rx), vec![chunk(i)]);
            }
        }
        assert_eq!(registry.len(), 4);
    }

    #[tokio::test]
    async fn test_stalled_sink_evicted_others_uninterrupted() {
        let registry = ListenerRegistry::new();
        let governor = BackpressureGovernor::new(registry.clone(), 500);

        let (stalled, _stalled_rx) = Sink::channel(1);
        registry.add(stalled.clone());
        let mut others = Vec::new();
        for _ in 0..2 {
            let (sink, rx) = Sink::channel(8);
            registry.add(sink);
            others.push(rx);
        }
        assert_eq!(registry.len(), 3);

        let mut evicted_at = None;
        for i in 0..=500u32 {
            let report = governor.fan_out(&registry.snapshot(), &chunk(i));
            if report.evicted == 1 {
                evicted_at = Some(i);
            }
            for rx in &mut others {
                assert_eq!(drain(rx), vec![chunk(i)]);
            }
        }

        // one accepted write, then 500 consecutive rejections
        assert_eq!(evicted_at, Some(500));
        assert!(stalled.is_closed());
        assert!(registry.get(stalled.id()).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_disconnected_sink_removed() {
        let registry = ListenerRegistry::new();
        let governor = BackpressureGovernor::new(registry.clone(), 10);
        let (sink, rx) = Sink::channel(1);
        registry.add(sink.clone());
        drop(rx);

        assert_eq!(governor.offer(&sink, chunk(0)), WriteOutcome::Closed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_closed_watcher_cleans_up_draining_sink() {
        let registry = ListenerRegistry::new();
        let governor = BackpressureGovernor::new(registry.clone(), 10);
        let (sink, rx) = Sink::channel(1);
        registry.add(sink.clone());

        governor.offer(&sink, chunk(0));
        assert!(matches!(
            governor.offer(&sink, chunk(1)),
            WriteOutcome::Rejected { consecutive: 1 }
        ));

        drop(rx);
        wait_until(|| registry.is_empty()).await;
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_deliver_waits_for_room() {
        let registry = ListenerRegistry::new();
        let governor = BackpressureGovernor::new(registry.clone(), 1000);
        let (sink, mut rx) = Sink::channel(1);
        registry.add(sink.clone());

        assert_eq!(
            governor.deliver(&sink, chunk(0), Duration::from_millis(5)).await,
            WriteOutcome::Accepted
        );

        let reader = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let first = rx.recv().await;
            let second = rx.recv().await;
            (first, second)
        });

        assert_eq!(
            governor.deliver(&sink, chunk(1), Duration::from_millis(5)).await,
            WriteOutcome::Accepted
        );
        let (first, second) = reader.await.unwrap();
        assert_eq!(first, Some(chunk(0)));
        assert_eq!(second, Some(chunk(1)));
    }

    #[tokio::test]
    async fn test_deliver_gives_up_on_stalled_sink() {
        let registry = ListenerRegistry::new();
        let governor = BackpressureGovernor::new(registry.clone(), 5);
        let (sink, _rx) = Sink::channel(1);
        registry.add(sink.clone());

        governor.offer(&sink, chunk(0));
        let outcome = governor
            .deliver(&sink, chunk(1), Duration::from_millis(1))
            .await;
        assert_eq!(outcome, WriteOutcome::Evicted);
        assert!(registry.is_empty());
    }
}
