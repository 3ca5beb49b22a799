use crate::auth::CapabilityRole;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Deadline for a single outbound frame write.
pub(crate) const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Interval between keepalive pings.
pub(crate) const PING_INTERVAL: Duration = Duration::from_secs(20);
/// Read deadline, refreshed on every inbound frame.
pub(crate) const PONG_WAIT: Duration = Duration::from_secs(60);
/// Bound on the per-session outbound queue.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("session closed")]
    Closed,
    #[error("send timeout")]
    SendTimeout,
}

/// Bounded queue of encoded frames with a drop-oldest overflow policy.
///
/// Producers evict the oldest frame to make room, so the most recent state
/// is always represented; a plain mpsc channel cannot express this because
/// only its consumer may pop.
pub(crate) struct OutboundQueue {
    frames: Mutex<VecDeque<String>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, frame: String) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }

        let mut frames = self
            .frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if frames.len() >= self.capacity {
            if frames.pop_front().is_some() {
                debug!("backpressure: dropped oldest queued frame");
            }
        }
        if frames.len() >= self.capacity {
            return Err(QueueError::SendTimeout);
        }

        frames.push_back(frame);
        drop(frames);
        self.notify.notify_one();
        Ok(())
    }

    /// Receives the next frame, or `None` once the queue is closed and
    /// drained.
    async fn recv(&self) -> Option<String> {
        loop {
            {
                let mut frames = self
                    .frames
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(frame) = frames.pop_front() {
                    return Some(frame);
                }
            }

            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

/// One connected socket after a successful handshake.
///
/// The socket halves live in the reader and writer tasks; the session itself
/// holds only the identity and the outbound queue, which is what makes it
/// directly testable.
pub struct Session {
    pub(crate) id: u64,
    pub room_id: String,
    pub role: CapabilityRole,
    pub since: i64,
    queue: OutboundQueue,
    closed: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl Session {
    pub(crate) fn new(id: u64, room_id: String, role: CapabilityRole, since: i64) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            id,
            room_id,
            role,
            since,
            queue: OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY),
            closed: AtomicBool::new(false),
            stop_tx,
        }
    }

    /// Enqueues an encoded frame for the writer task. Never blocks.
    pub(crate) fn enqueue(&self, frame: String) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        self.queue.push(frame)
    }

    /// Closes the session. Idempotent; the stop signal and the queue are
    /// closed exactly once.
    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.queue.close();
            let _ = self.stop_tx.send(true);
        }
    }

    pub(crate) fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    #[cfg(test)]
    pub(crate) async fn next_frame(&self) -> Option<String> {
        self.queue.recv().await
    }
}

/// Drains the outbound queue onto the socket and emits keepalives.
pub(crate) async fn write_loop(session: &Session, mut sink: SplitSink<WebSocket, Message>) {
    let mut stop = session.stop_signal();
    let mut keepalive = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = session.queue.recv() => {
                let Some(frame) = frame else { break };
                match timeout(WRITE_WAIT, sink.send(Message::Text(frame))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("write payload: {}", e);
                        break;
                    }
                    Err(_) => {
                        warn!("write deadline exceeded");
                        break;
                    }
                }
            }
            _ = keepalive.tick() => {
                match timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("ping control failed: {}", e);
                        break;
                    }
                    Err(_) => {
                        debug!("ping deadline exceeded");
                        break;
                    }
                }
            }
            _ = stop.changed() => break,
        }
    }
}
