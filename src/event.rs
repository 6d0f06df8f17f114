//! Counted readiness events.
//!
//! Every task owns four events; readiness propagates along follower
//! edges. The counter encodes three logical states:
//!
//! - `0` — reached: the event fired, followers were notified.
//! - `1` — ready: one step away; for a pre-event this means the task is
//!   dispatchable.
//! - `>= 2` — blocked on that many predecessors.
//!
//! `add_follower` and the final decrement race by design; the follower
//! bag's lock makes "check not-reached, then increment" atomic against
//! the reach-side drain, so an edge is either fully installed or refused.

use crate::task::Task;
use crate::WorkerId;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) const WAKER_NONE: i64 = -1;
pub(crate) const WAKER_ROOT: i64 = -2;

pub(crate) struct Event {
    state: AtomicUsize,
    followers: Mutex<SmallVec<[EventPtr; 2]>>,
    /// Who to nudge when this event becomes ready or reached. Workers use
    /// their global id; the root thread uses [`WAKER_ROOT`].
    waker: AtomicI64,
}

impl Event {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicUsize::new(1),
            followers: Mutex::new(SmallVec::new()),
            waker: AtomicI64::new(WAKER_NONE),
        }
    }

    pub(crate) fn up(&self) {
        self.state.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn is_reached(&self) -> bool {
        self.state.load(Ordering::Acquire) == 0
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == 1
    }

    pub(crate) fn set_waker(&self, waker: i64) {
        self.waker.store(waker, Ordering::Release);
    }

    pub(crate) fn set_worker_waker(&self, worker: WorkerId) {
        self.set_waker(worker as i64);
    }

    fn take_waker(&self) -> Option<i64> {
        let waker = self.waker.swap(WAKER_NONE, Ordering::AcqRel);
        (waker != WAKER_NONE).then_some(waker)
    }
}

/// Which of a task's events a pointer names.
#[derive(Clone)]
pub(crate) enum EventTag {
    Pre,
    Post,
    ResultSet,
    ResultGet,
    /// An externally completed event the owning task's post-event waits
    /// on. Allocated on demand by `create_event`.
    External(Arc<Event>),
}

/// A task-anchored event reference: cheap to clone, carries everything a
/// notification needs (the counter, the followers, and the task whose
/// lifecycle hangs off the transition).
#[derive(Clone)]
pub(crate) struct EventPtr {
    pub(crate) task: Arc<Task>,
    pub(crate) tag: EventTag,
}

impl EventPtr {
    pub(crate) fn event(&self) -> &Event {
        match &self.tag {
            EventTag::Pre => self.task.pre_event(),
            EventTag::Post => self.task.post_event(),
            EventTag::ResultSet => self.task.result_set_event(),
            EventTag::ResultGet => self.task.result_get_event(),
            EventTag::External(event) => event,
        }
    }

    /// Registers `follower` to be notified when `self` reaches, bumping
    /// its counter. Returns false (and does nothing) when `self` already
    /// reached — the dependency is then vacuously satisfied.
    pub(crate) fn add_follower(&self, follower: EventPtr) -> bool {
        let event = self.event();
        let mut followers = event.followers.lock();
        if event.state.load(Ordering::Acquire) == 0 {
            return false;
        }
        follower.event().up();
        followers.push(follower);
        true
    }

    /// Decrements the counter and acts on the transition.
    ///
    /// `claimed` tells the ready-branch that the caller already owns the
    /// task for execution, so it must not be handed to the scheduler a
    /// second time. Returns true when the event is now ready or reached.
    pub(crate) fn notify(&self, claimed: bool) -> bool {
        let event = self.event();
        let prev = event.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "event counter underflow");

        match prev - 1 {
            0 => {
                self.on_reached();
                true
            }
            1 => {
                if matches!(self.tag, EventTag::Pre) {
                    if let Some(waker) = event.take_waker() {
                        self.task.shared().wake(waker);
                    }
                    if !claimed {
                        self.task.sched().activate_task(Arc::clone(&self.task));
                    }
                }
                true
            }
            _ => false,
        }
    }

    fn on_reached(&self) {
        let event = self.event();

        if let Some(waker) = event.take_waker() {
            self.task.shared().wake(waker);
        }

        // Drain under the lock, notify outside it. Reverse order matches
        // edge-installation order and keeps the hot predecessor last.
        let followers: SmallVec<[EventPtr; 2]> = {
            let mut followers = event.followers.lock();
            followers.drain(..).collect()
        };
        for follower in followers.into_iter().rev() {
            follower.notify(false);
        }

        match &self.tag {
            EventTag::Post => {
                self.task.remove_from_resources();
                self.task.countdown();
            }
            EventTag::ResultGet => self.task.countdown(),
            EventTag::Pre | EventTag::ResultSet | EventTag::External(_) => {}
        }
    }
}
