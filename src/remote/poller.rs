//! Polling worker: drives the server adapter at a fixed cadence.
//!
//! Exactly one thread calls `poll` on the underlying client. Converted
//! events land on a bounded queue drained by the main loop; overflow is
//! counted and dropped rather than growing without bound.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, TrySendError};

use super::adapter::{FrameworkEvent, ServerHandle, lock};

pub struct PollingWorker {
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
    events: Receiver<FrameworkEvent>,
    dropped: Arc<AtomicU64>,
}

impl PollingWorker {
    pub fn start(adapter: ServerHandle, interval: Duration, queue_max: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicU64::new(0));
        let (tx, rx) = crossbeam::channel::bounded(queue_max.max(1));

        let handle = {
            let stop = Arc::clone(&stop);
            let running = Arc::clone(&running);
            let dropped = Arc::clone(&dropped);
            std::thread::Builder::new()
                .name("ap-polling".to_string())
                .spawn(move || {
                    tracing::debug!(interval_ms = interval.as_millis() as u64, "polling started");
                    while !stop.load(Ordering::Acquire) {
                        let events = lock(&adapter).pump();
                        for event in events {
                            // Nothing is enqueued once stop is signalled.
                            if stop.load(Ordering::Acquire) {
                                break;
                            }
                            match tx.try_send(event) {
                                Ok(()) => {}
                                Err(TrySendError::Full(event)) => {
                                    dropped.fetch_add(1, Ordering::AcqRel);
                                    tracing::warn!(?event, "event queue full, dropping");
                                }
                                Err(TrySendError::Disconnected(_)) => return,
                            }
                        }
                        std::thread::sleep(interval);
                    }
                    running.store(false, Ordering::Release);
                    tracing::debug!("polling stopped");
                })
                .expect("spawn polling thread")
        };

        Self {
            stop,
            running,
            handle: Some(handle),
            events: rx,
            dropped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drain queued events in the order the adapter produced them.
    pub fn drain(&self) -> Vec<FrameworkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Events dropped to overflow since the last call.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::AcqRel)
    }

    /// Signal cancellation and wait up to `timeout` for the worker to
    /// observe it. On timeout the worker is left to run to completion and
    /// `false` is returned; it will enqueue nothing further either way.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Release);
        let deadline = Instant::now() + timeout;
        while self.running.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                tracing::warn!("polling worker did not stop within the deadline");
                // Detach; the thread exits at its next tick boundary.
                self.handle.take();
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        true
    }
}

impl Drop for PollingWorker {
    fn drop(&mut self) {
        self.stop(Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::adapter::test_support::ScriptedSocket;
    use crate::remote::adapter::{ServerAdapter, SocketEvent, shared};
    use crate::types::ReceivedItem;

    fn item(id: i64) -> SocketEvent {
        SocketEvent::ItemReceived(ReceivedItem {
            item_id: id,
            location_id: 0,
            item_name: format!("item-{id}"),
            player_name: "Alice".into(),
            index: 0,
        })
    }

    #[test]
    fn events_flow_in_order() {
        let (socket, state) = ScriptedSocket::new();
        state
            .lock()
            .unwrap()
            .batches
            .push_back(vec![item(1), item(2)]);
        let adapter = shared(ServerAdapter::new(Box::new(socket)));

        let mut worker = PollingWorker::start(adapter, Duration::from_millis(1), 16);
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while seen.len() < 2 && Instant::now() < deadline {
            seen.extend(worker.drain());
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(
            seen[0],
            FrameworkEvent::ItemReceived(ReceivedItem { item_id: 1, .. })
        ));
        assert!(matches!(
            seen[1],
            FrameworkEvent::ItemReceived(ReceivedItem { item_id: 2, .. })
        ));
        assert!(worker.stop(Duration::from_secs(1)));
        assert!(!worker.is_running());
    }

    #[test]
    fn overflow_is_counted_not_grown() {
        let (socket, state) = ScriptedSocket::new();
        state
            .lock()
            .unwrap()
            .batches
            .push_back((0..10).map(item).collect());
        let adapter = shared(ServerAdapter::new(Box::new(socket)));

        let mut worker = PollingWorker::start(adapter, Duration::from_millis(1), 4);
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.take_dropped() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        // 10 events into a 4-slot queue with no consumer: some are gone.
        worker.stop(Duration::from_secs(1));
        assert!(worker.drain().len() <= 4);
    }

    #[test]
    fn stop_is_idempotent_and_quick() {
        let (socket, _) = ScriptedSocket::new();
        let adapter = shared(ServerAdapter::new(Box::new(socket)));
        let mut worker = PollingWorker::start(adapter, Duration::from_millis(1), 4);
        assert!(worker.is_running());
        assert!(worker.stop(Duration::from_secs(1)));
        assert!(worker.stop(Duration::from_secs(1)));
    }
}
