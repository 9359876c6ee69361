//! Flow fibers.
//!
//! A fiber is the execution unit hosting one flow. The executor only ever
//! touches the cloneable [`FlowFiber`] handle: it schedules [`FlowEvent`]s
//! into the fiber's mailbox and arms timed sleeps. The state machine side
//! drains the matching [`FlowEventReceiver`] in FIFO order, single-consumer.
//!
//! Sleep is modelled as an explicit wakeup event rather than a blocked
//! thread: arming a sleep spawns a timer task that delivers
//! [`FlowEvent::Wakeup`] at the deadline, and [`FlowFiber::interrupt_sleep`]
//! delivers it early (shutdown). Exactly one `Wakeup` is delivered per armed
//! sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::events::FlowEvent;
use crate::types::FlowId;

/// Create a fiber handle and the receiving end of its mailbox.
#[must_use]
pub fn fiber_channel(id: FlowId) -> (FlowFiber, FlowEventReceiver) {
    let (tx, rx) = flume::unbounded();
    (
        FlowFiber {
            id,
            mailbox: tx,
            sleep: Arc::new(Mutex::new(None)),
        },
        FlowEventReceiver { inner: rx },
    )
}

struct SleepState {
    armed: Arc<AtomicBool>,
    timer: JoinHandle<()>,
}

/// Handle to one flow's fiber.
#[derive(Clone)]
pub struct FlowFiber {
    id: FlowId,
    mailbox: flume::Sender<FlowEvent>,
    sleep: Arc<Mutex<Option<SleepState>>>,
}

impl FlowFiber {
    pub fn id(&self) -> FlowId {
        self.id
    }

    /// Enqueue an event for the state machine. FIFO relative to other
    /// `schedule_event` calls.
    ///
    /// A closed mailbox means the flow is being torn down; the event is
    /// logged and dropped rather than treated as a failure, because the
    /// asynchronous completion paths (transaction tracking, async
    /// operations) can outlive the flow they belong to.
    pub fn schedule_event(&self, event: FlowEvent) {
        if self.mailbox.send(event).is_err() {
            tracing::warn!(
                target: "spindle::fiber",
                flow_id = %self.id,
                "event dropped: fiber mailbox closed"
            );
        }
    }

    /// Arm a sleep that delivers [`FlowEvent::Wakeup`] after `delay`.
    ///
    /// Re-arming replaces a previous sleep without delivering its wakeup.
    pub fn arm_sleep(&self, delay: Duration) {
        let armed = Arc::new(AtomicBool::new(true));
        let task_armed = Arc::clone(&armed);
        let task_fiber = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The swap decides the single deliverer between the timer and
            // interrupt_sleep.
            if task_armed.swap(false, Ordering::AcqRel) {
                task_fiber.schedule_event(FlowEvent::Wakeup);
            }
        });
        let previous = self.sleep.lock().replace(SleepState { armed, timer });
        if let Some(previous) = previous {
            previous.armed.store(false, Ordering::Release);
            previous.timer.abort();
        }
    }

    /// Whether a sleep is armed and its wakeup not yet delivered.
    pub fn is_sleeping(&self) -> bool {
        self.sleep
            .lock()
            .as_ref()
            .is_some_and(|s| s.armed.load(Ordering::Acquire))
    }

    /// Deliver a pending sleep's wakeup immediately (e.g. on shutdown).
    /// No-op if no sleep is armed.
    pub fn interrupt_sleep(&self) {
        let taken = self.sleep.lock().take();
        if let Some(state) = taken {
            state.timer.abort();
            if state.armed.swap(false, Ordering::AcqRel) {
                self.schedule_event(FlowEvent::Wakeup);
            }
        }
    }
}

impl std::fmt::Debug for FlowFiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowFiber")
            .field("id", &self.id)
            .field("sleeping", &self.is_sleeping())
            .finish()
    }
}

/// Receiving end of a fiber's mailbox. Single consumer, FIFO.
pub struct FlowEventReceiver {
    inner: flume::Receiver<FlowEvent>,
}

impl FlowEventReceiver {
    /// Await the next event. `None` once every fiber handle is dropped and
    /// the mailbox is drained.
    pub async fn recv(&mut self) -> Option<FlowEvent> {
        self.inner.recv_async().await.ok()
    }

    /// Non-blocking poll.
    pub fn try_recv(&mut self) -> Option<FlowEvent> {
        self.inner.try_recv().ok()
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
