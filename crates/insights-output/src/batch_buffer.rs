// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size and time triggered batching of sanitized events.
//!
//! Events accumulate in a pending batch. The batch is flushed when it reaches
//! `max_items` events or when `max_interval` has elapsed since its first event,
//! whichever comes first. Flushing detaches the batch under a short lock and
//! sends it after the lock is released, so producers never wait on the network.
//!
//! Detached batches go through a FIFO ready queue. Every flush path, including
//! the forced flush on shutdown, drains that queue while holding one async
//! mutex, so sends never overlap and each batch is sent exactly once.

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::Transport;
use crate::config::validate_max_items;
use crate::errors::{BufferError, ConfigError};
use crate::event::{Payload, SanitizedEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Nothing pending, no timer armed.
    Idle,
    /// At least one pending event and a timer armed for it.
    Accumulating,
    /// A detached batch is being sent or waiting to be sent.
    Flushing,
    /// Shut down. No further events are accepted.
    Closed,
}

struct Pending {
    events: Vec<SanitizedEvent>,
    ready: VecDeque<Vec<SanitizedEvent>>,
    timer: Option<CancellationToken>,
    /// Bumped every time a batch is detached; a timer only flushes the cycle
    /// that armed it.
    cycle: u64,
    sending: bool,
    closed: bool,
}

impl Pending {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// Moves the pending batch to the ready queue and installs an empty one.
    fn detach(&mut self) {
        self.disarm();
        if self.events.is_empty() {
            return;
        }
        self.cycle = self.cycle.wrapping_add(1);
        let capacity = self.events.capacity();
        let batch = mem::replace(&mut self.events, Vec::with_capacity(capacity));
        self.ready.push_back(batch);
    }
}

struct Inner {
    max_items: usize,
    max_interval: Duration,
    transport: Arc<dyn Transport>,
    pending: Mutex<Pending>,
    flush_serial: TokioMutex<()>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        #[allow(clippy::expect_used)]
        self.pending.lock().expect("lock poisoned")
    }

    /// Sends every ready batch, oldest first. Callers hold `flush_serial`.
    async fn drain_ready(&self) -> usize {
        let mut sent = 0;
        loop {
            let batch = {
                let mut pending = self.lock();
                match pending.ready.pop_front() {
                    Some(batch) => {
                        pending.sending = true;
                        batch
                    }
                    None => {
                        pending.sending = false;
                        break;
                    }
                }
            };
            let count = batch.len();
            debug!("INSIGHTS | Sending batch of {count} events");
            if let Err(e) = self.transport.send(Payload::Batch(batch)).await {
                debug!("INSIGHTS | Dropped batch of {count} events: {e}");
            }
            sent += count;
        }
        sent
    }

    async fn flush(&self) -> usize {
        let _serial = self.flush_serial.lock().await;
        self.lock().detach();
        self.drain_ready().await
    }

    async fn flush_cycle(&self, cycle: u64) {
        let _serial = self.flush_serial.lock().await;
        {
            let mut pending = self.lock();
            if pending.cycle == cycle {
                pending.detach();
            }
        }
        self.drain_ready().await;
    }
}

/// Buffers sanitized events and ships them in batches through a [`Transport`].
///
/// Cloning yields another handle to the same buffer. Must be used from within
/// a Tokio runtime: timers and size-triggered sends run on spawned tasks.
#[derive(Clone)]
pub struct BatchBuffer {
    inner: Arc<Inner>,
}

impl BatchBuffer {
    pub fn new(
        max_items: usize,
        max_interval: Duration,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        validate_max_items(max_items)?;
        if max_interval.is_zero() {
            return Err(ConfigError::InvalidInterval(0.0));
        }
        Ok(BatchBuffer {
            inner: Arc::new(Inner {
                max_items,
                max_interval,
                transport,
                pending: Mutex::new(Pending {
                    events: Vec::with_capacity(max_items),
                    ready: VecDeque::new(),
                    timer: None,
                    cycle: 0,
                    sending: false,
                    closed: false,
                }),
                flush_serial: TokioMutex::new(()),
            }),
        })
    }

    pub fn max_items(&self) -> usize {
        self.inner.max_items
    }

    pub fn max_interval(&self) -> Duration {
        self.inner.max_interval
    }

    /// Adds an event to the pending batch.
    ///
    /// The first event of a batch arms its timer. The event that fills the
    /// batch detaches it on the spot and hands it to a background send.
    pub fn enqueue(&self, event: SanitizedEvent) -> Result<(), BufferError> {
        let full = {
            let mut pending = self.inner.lock();
            if pending.closed {
                return Err(BufferError::Closed);
            }
            pending.events.push(event);
            if pending.events.len() >= self.inner.max_items {
                pending.detach();
                true
            } else {
                if pending.timer.is_none() {
                    self.arm_timer(&mut pending);
                }
                false
            }
        };

        if full {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let _serial = inner.flush_serial.lock().await;
                inner.drain_ready().await;
            });
        }
        Ok(())
    }

    fn arm_timer(&self, pending: &mut Pending) {
        let token = CancellationToken::new();
        pending.timer = Some(token.clone());

        let cycle = pending.cycle;
        let interval = self.inner.max_interval;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(interval) => {
                    debug!("INSIGHTS | Batch interval of {} ms elapsed", interval.as_millis());
                    inner.flush_cycle(cycle).await;
                }
            }
        });
    }

    /// Sends whatever is pending. Returns the number of events handed to the
    /// transport, 0 when there was nothing to send.
    pub async fn flush(&self) -> usize {
        self.inner.flush().await
    }

    /// Disarms the timer and flushes, waiting for any send already in
    /// progress. Returns once every detached batch has been through the
    /// transport, whatever the outcome.
    pub async fn force_flush(&self) -> usize {
        self.inner.lock().disarm();
        self.inner.flush().await
    }

    /// Stops accepting events, then force flushes.
    pub async fn shutdown(&self) -> usize {
        self.inner.lock().closed = true;
        let sent = self.force_flush().await;
        debug!("INSIGHTS | Batch buffer closed after a final flush of {sent} events");
        sent
    }

    pub fn state(&self) -> BufferState {
        let pending = self.inner.lock();
        if pending.closed {
            BufferState::Closed
        } else if !pending.events.is_empty() {
            BufferState::Accumulating
        } else if pending.sending || !pending.ready.is_empty() {
            BufferState::Flushing
        } else {
            BufferState::Idle
        }
    }

    /// Number of events in the pending batch.
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Delivered;
    use crate::errors::TransportError;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::collections::HashSet;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout, Instant};

    struct RecordingTransport {
        payloads: Mutex<Vec<Payload>>,
        sent: mpsc::UnboundedSender<usize>,
        delay: Option<Duration>,
        status: u16,
    }

    impl RecordingTransport {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
            Self::with(None, 202)
        }

        fn with(
            delay: Option<Duration>,
            status: u16,
        ) -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
            let (sent, rx) = mpsc::unbounded_channel();
            let transport = RecordingTransport {
                payloads: Mutex::new(Vec::new()),
                sent,
                delay,
                status,
            };
            (Arc::new(transport), rx)
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.payloads.lock().unwrap().iter().map(Payload::len).collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, payload: Payload) -> Result<Delivered, TransportError> {
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            let events = payload.len();
            self.payloads.lock().unwrap().push(payload);
            let _ = self.sent.send(events);
            if self.status < 300 {
                Ok(Delivered {
                    status: self.status,
                    events,
                })
            } else {
                Err(TransportError::Status {
                    status: self.status,
                    body: "nope".to_string(),
                })
            }
        }
    }

    fn event(seq: usize) -> SanitizedEvent {
        let mut map = Map::new();
        map.insert("eventType".to_string(), json!("test"));
        map.insert("timestamp".to_string(), json!(1));
        map.insert("seq".to_string(), Value::from(seq));
        SanitizedEvent::from_map(map)
    }

    fn buffer(
        max_items: usize,
        interval: Duration,
        transport: Arc<RecordingTransport>,
    ) -> BatchBuffer {
        BatchBuffer::new(max_items, interval, transport).expect("valid buffer")
    }

    #[tokio::test]
    async fn test_max_items_ceiling() {
        let (transport, _rx) = RecordingTransport::new();
        assert!(matches!(
            BatchBuffer::new(1001, Duration::from_secs(5), transport.clone()),
            Err(ConfigError::BatchTooLarge { max_items: 1001 })
        ));
        assert!(BatchBuffer::new(1000, Duration::from_secs(5), transport.clone()).is_ok());
        assert!(matches!(
            BatchBuffer::new(10, Duration::ZERO, transport),
            Err(ConfigError::InvalidInterval(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_when_full() {
        let (transport, mut rx) = RecordingTransport::new();
        let buffer = buffer(5, Duration::from_secs(5), transport.clone());

        for seq in 0..5 {
            buffer.enqueue(event(seq)).unwrap();
        }
        assert_eq!(buffer.len(), 0);

        assert_eq!(rx.recv().await, Some(5));
        assert_eq!(transport.batch_sizes(), vec![5]);
        assert_eq!(buffer.state(), BufferState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_event_stays_pending() {
        let (transport, mut rx) = RecordingTransport::new();
        let buffer = buffer(5, Duration::from_secs(5), transport.clone());

        for seq in 1..=6 {
            buffer.enqueue(event(seq)).unwrap();
        }

        assert_eq!(rx.recv().await, Some(5));
        let first = transport.payloads.lock().unwrap()[0].clone();
        let seqs: Vec<_> = first.events().iter().map(|e| e.get("seq").cloned()).collect();
        assert_eq!(seqs, (1..=5).map(|s| Some(json!(s))).collect::<Vec<_>>());
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.state(), BufferState::Accumulating);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_interval() {
        let (transport, mut rx) = RecordingTransport::new();
        let buffer = buffer(10, Duration::from_secs(5), transport.clone());
        let start = Instant::now();

        for seq in 0..3 {
            buffer.enqueue(event(seq)).unwrap();
        }
        assert_eq!(buffer.state(), BufferState::Accumulating);

        assert_eq!(rx.recv().await, Some(3));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(buffer.is_empty());

        // One-shot: nothing else is flushed without new events.
        assert!(timeout(Duration::from_secs(30), rx.recv()).await.is_err());
        assert_eq!(transport.batch_sizes(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_only_flushes_its_own_cycle() {
        let (transport, mut rx) = RecordingTransport::new();
        let buffer = buffer(10, Duration::from_secs(5), transport.clone());

        buffer.enqueue(event(0)).unwrap();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(buffer.flush().await, 1);
        assert_eq!(rx.recv().await, Some(1));

        buffer.enqueue(event(1)).unwrap();
        // The first timer would have fired here.
        sleep(Duration::from_millis(4500)).await;
        assert_eq!(buffer.len(), 1);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(transport.batch_sizes(), vec![1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_flush_disarms_timer() {
        let (transport, mut rx) = RecordingTransport::new();
        let buffer = buffer(2, Duration::from_secs(5), transport.clone());

        buffer.enqueue(event(0)).unwrap();
        buffer.enqueue(event(1)).unwrap();
        assert_eq!(rx.recv().await, Some(2));

        assert!(timeout(Duration::from_secs(30), rx.recv()).await.is_err());
        assert_eq!(transport.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_flush_without_events_is_noop() {
        let (transport, _rx) = RecordingTransport::new();
        let buffer = buffer(10, Duration::from_secs(5), transport.clone());

        assert_eq!(buffer.flush().await, 0);
        assert_eq!(buffer.flush().await, 0);
        assert!(transport.batch_sizes().is_empty());
        assert_eq!(buffer.state(), BufferState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_synchronously() {
        let (transport, _rx) = RecordingTransport::new();
        let buffer = buffer(10, Duration::from_secs(60), transport.clone());

        for seq in 0..3 {
            buffer.enqueue(event(seq)).unwrap();
        }

        assert_eq!(buffer.shutdown().await, 3);
        assert_eq!(transport.batch_sizes(), vec![3]);
        assert_eq!(buffer.state(), BufferState::Closed);
        assert_eq!(buffer.enqueue(event(4)), Err(BufferError::Closed));
        assert_eq!(buffer.shutdown().await, 0);
        assert_eq!(transport.batch_sizes(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_send() {
        let (transport, _rx) = RecordingTransport::with(Some(Duration::from_secs(2)), 202);
        let buffer = buffer(2, Duration::from_secs(60), transport.clone());

        buffer.enqueue(event(0)).unwrap();
        buffer.enqueue(event(1)).unwrap();
        buffer.enqueue(event(2)).unwrap();
        tokio::task::yield_now().await;

        buffer.shutdown().await;
        assert_eq!(transport.batch_sizes(), vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_absorbed() {
        let (transport, mut rx) = RecordingTransport::with(None, 500);
        let buffer = buffer(2, Duration::from_secs(5), transport.clone());

        buffer.enqueue(event(0)).unwrap();
        buffer.enqueue(event(1)).unwrap();
        assert_eq!(rx.recv().await, Some(2));

        buffer.enqueue(event(2)).unwrap();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.force_flush().await, 1);
        assert_eq!(transport.batch_sizes(), vec![2, 1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_lose_nothing() {
        let (transport, _rx) = RecordingTransport::new();
        let buffer = buffer(7, Duration::from_millis(5), transport.clone());

        let producers: Vec<_> = (0..8)
            .map(|producer| {
                let buffer = buffer.clone();
                tokio::spawn(async move {
                    for i in 0..125 {
                        buffer.enqueue(event(producer * 125 + i)).unwrap();
                        if i % 10 == 0 {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        buffer.shutdown().await;

        let payloads = transport.payloads.lock().unwrap();
        assert!(payloads.iter().all(|p| p.len() <= 7 && !p.is_empty()));
        let seqs: Vec<u64> = payloads
            .iter()
            .flat_map(|p| p.events().iter())
            .map(|e| e.get("seq").and_then(Value::as_u64).unwrap())
            .collect();
        assert_eq!(seqs.len(), 1000);
        assert_eq!(seqs.iter().collect::<HashSet<_>>().len(), 1000);
    }
}
