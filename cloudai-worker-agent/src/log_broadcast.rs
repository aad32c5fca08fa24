//! Log Stream Broadcaster (spec §4.8 / C9): a bounded ring buffer of recent
//! output lines per running task plus one bounded queue per subscriber.
//! Backpressure here drops the *oldest* queued line for the lagging
//! subscriber and marks the drop with a sentinel, the opposite of the
//! telemetry fanout's drop-newest-via-`broadcast::Sender` behavior - a slow
//! log viewer should see a gap, not miss the tail of the stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

const RING_CAPACITY: usize = 1000;
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Line(String),
    /// Raised once in place of however many lines a lagging subscriber
    /// missed, rather than once per dropped line.
    Dropped,
    Terminal { status: String },
}

struct Subscriber {
    queue: Mutex<VecDeque<LogEvent>>,
    notify: Notify,
    dropped: AtomicBool,
    closed: AtomicBool,
}

impl Subscriber {
    fn new() -> Self {
        Subscriber {
            queue: Mutex::new(VecDeque::with_capacity(SUBSCRIBER_QUEUE_CAPACITY)),
            notify: Notify::new(),
            dropped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, event: LogEvent) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= SUBSCRIBER_QUEUE_CAPACITY {
            queue.pop_front();
            self.dropped.store(true, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }
}

/// A subscriber's read handle: yields the replayed ring buffer, then live
/// lines, a `Dropped` sentinel on backpressure, and finally `Terminal`.
pub struct LogSubscription {
    subscriber: Arc<Subscriber>,
}

impl LogSubscription {
    /// Waits for and returns the next event, or `None` once the stream is
    /// closed and drained.
    pub async fn next(&self) -> Option<LogEvent> {
        loop {
            if self.subscriber.dropped.swap(false, Ordering::Relaxed) {
                return Some(LogEvent::Dropped);
            }
            {
                let mut queue = self.subscriber.queue.lock().unwrap();
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
                if self.subscriber.closed.load(Ordering::Relaxed) {
                    return None;
                }
            }
            self.subscriber.notify.notified().await;
        }
    }
}

struct Inner {
    ring: Mutex<VecDeque<String>>,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    terminal: Mutex<Option<String>>,
}

/// One broadcaster per running task, owned by the agent's task table and
/// torn down once the container exits and every subscriber has drained the
/// terminal message.
#[derive(Clone)]
pub struct LogBroadcaster {
    inner: Arc<Inner>,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        LogBroadcaster {
            inner: Arc::new(Inner {
                ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
                subscribers: Mutex::new(Vec::new()),
                terminal: Mutex::new(None),
            }),
        }
    }

    /// Appends a line of container output, evicting the oldest ring entry
    /// past `RING_CAPACITY`, and fans it out to every live subscriber.
    pub fn push_line(&self, line: String) {
        {
            let mut ring = self.inner.ring.lock().unwrap();
            if ring.len() >= RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(line.clone());
        }
        for subscriber in self.inner.subscribers.lock().unwrap().iter() {
            subscriber.push(LogEvent::Line(line.clone()));
        }
    }

    /// Marks the stream terminal (container exited) and closes every
    /// subscriber after delivering the final status.
    pub fn close(&self, status: String) {
        *self.inner.terminal.lock().unwrap() = Some(status.clone());
        let subscribers = self.inner.subscribers.lock().unwrap();
        for subscriber in subscribers.iter() {
            subscriber.push(LogEvent::Terminal {
                status: status.clone(),
            });
            subscriber.close();
        }
    }

    /// Subscribes, replaying the current ring buffer first so a late
    /// subscriber still sees the task's output from the start (spec §4.8).
    pub fn subscribe(&self) -> LogSubscription {
        let subscriber = Arc::new(Subscriber::new());
        {
            let ring = self.inner.ring.lock().unwrap();
            let mut queue = subscriber.queue.lock().unwrap();
            for line in ring.iter() {
                queue.push_back(LogEvent::Line(line.clone()));
            }
        }
        if let Some(status) = self.inner.terminal.lock().unwrap().clone() {
            subscriber.push(LogEvent::Terminal { status });
            subscriber.close();
        } else {
            self.inner.subscribers.lock().unwrap().push(subscriber.clone());
        }
        LogSubscription { subscriber }
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
