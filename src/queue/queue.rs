use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::core::StatusChange;
use crate::error::SubmitError;
use crate::events::{Event, EventKind};
use crate::tasks::{RunnableRef, TaskEvent};

/// Decision of [`TaskQueue::next_runnable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextRunnable {
    /// A hot task is pending (pull it with `poll_hot`).
    Hot,
    /// The main lane has a head (pull it with `poll`).
    Default,
    /// An idle-triggered entry is due (pull it with `poll`).
    Other,
    /// Nothing to run.
    None,
}

/// Notification produced under the lock, delivered after it is released.
pub(crate) enum Outgoing {
    Event(Event),
    Status(StatusChange),
    Notice(RunnableRef, TaskEvent),
}

struct IdleEntry {
    runnable: RunnableRef,
    timeout: Duration,
    fired: bool,
}

pub(crate) struct TaskQueue {
    list: VecDeque<RunnableRef>,
    /// Number of suspend markers at the front of `list`.
    markers: usize,
    /// Insertion point for tasks added while markers are present.
    insert_at: usize,
    hot: VecDeque<RunnableRef>,
    on_idle: Vec<IdleEntry>,
    last_activity: Instant,
    paused: bool,
    closed: bool,
    outbox: Vec<Outgoing>,
    /// Changed without producing a notification.
    touched: bool,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            list: VecDeque::new(),
            markers: 0,
            insert_at: 0,
            hot: VecDeque::new(),
            on_idle: Vec::new(),
            last_activity: Instant::now(),
            paused: false,
            closed: false,
            outbox: Vec::new(),
            touched: false,
        }
    }

    pub(crate) fn emit(&mut self, ev: Event) {
        self.outbox.push(Outgoing::Event(ev));
    }

    pub(crate) fn push_status(&mut self, change: StatusChange) {
        self.outbox.push(Outgoing::Status(change));
    }

    pub(crate) fn notice(&mut self, runnable: &RunnableRef, event: TaskEvent) {
        self.outbox
            .push(Outgoing::Notice(RunnableRef::clone(runnable), event));
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Records a silent change so the change stamp still moves.
    pub(crate) fn touch(&mut self) {
        self.touched = true;
    }

    pub(crate) fn take_touched(&mut self) -> bool {
        std::mem::take(&mut self.touched)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Appends to the main lane, or inserts after the markers while a suspend level is served.
    pub(crate) fn add(&mut self, runnable: RunnableRef) -> Result<usize, SubmitError> {
        self.insert(runnable, TaskEvent::AddingTo, EventKind::TaskAdded)
    }

    /// Like [`add`](Self::add) for tasks handed over by another controller.
    pub(crate) fn add_moved(&mut self, runnable: RunnableRef) -> Result<usize, SubmitError> {
        self.insert(runnable, TaskEvent::MovingTo, EventKind::TaskMovedIn)
    }

    fn insert(
        &mut self,
        runnable: RunnableRef,
        event: TaskEvent,
        kind: EventKind,
    ) -> Result<usize, SubmitError> {
        if self.closed {
            return Err(SubmitError::Closed);
        }
        let pos = if self.markers > 0 {
            let pos = self.insert_at.clamp(self.markers, self.list.len());
            self.list.insert(pos, RunnableRef::clone(&runnable));
            self.insert_at = pos + 1;
            pos
        } else {
            self.list.push_back(RunnableRef::clone(&runnable));
            self.list.len() - 1
        };
        self.notice(&runnable, event);
        self.emit(Event::for_runnable(kind, &runnable).with_position(pos));
        Ok(pos)
    }

    pub(crate) fn add_hot(&mut self, runnable: RunnableRef) -> Result<(), SubmitError> {
        if self.closed {
            return Err(SubmitError::Closed);
        }
        self.hot.push_back(RunnableRef::clone(&runnable));
        self.notice(&runnable, TaskEvent::AddingTo);
        self.emit(Event::for_runnable(EventKind::TaskAdded, &runnable).with_reason("hot"));
        Ok(())
    }

    /// Removes the given entries wherever they are pending. Markers are skipped.
    ///
    /// Returns the entries actually removed; unknown entries are ignored.
    pub(crate) fn remove(&mut self, runnables: &[RunnableRef]) -> Vec<RunnableRef> {
        self.take(runnables, TaskEvent::RemovingFrom, EventKind::TaskRemoved)
    }

    /// Removes entries handed over to another controller.
    pub(crate) fn take_for_move(&mut self, runnables: &[RunnableRef]) -> Vec<RunnableRef> {
        self.take(runnables, TaskEvent::MovingFrom, EventKind::TaskMovedOut)
    }

    fn take(
        &mut self,
        runnables: &[RunnableRef],
        event: TaskEvent,
        kind: EventKind,
    ) -> Vec<RunnableRef> {
        let mut removed = Vec::new();
        for r in runnables {
            if r.is_marker() {
                continue;
            }
            if let Some(pos) = self.list.iter().position(|x| x.id() == r.id()) {
                if let Some(x) = self.list.remove(pos) {
                    if pos < self.insert_at {
                        self.insert_at -= 1;
                    }
                    // MovingFrom is asked before the lock is taken.
                    if event != TaskEvent::MovingFrom {
                        self.notice(&x, event);
                    }
                    self.emit(Event::for_runnable(kind, &x).with_position(pos));
                    removed.push(x);
                }
            } else if let Some(pos) = self.hot.iter().position(|x| x.id() == r.id()) {
                if let Some(x) = self.hot.remove(pos) {
                    if event != TaskEvent::MovingFrom {
                        self.notice(&x, event);
                    }
                    self.emit(Event::for_runnable(kind, &x).with_reason("hot"));
                    removed.push(x);
                }
            }
        }
        removed
    }

    /// Removes every pending main-lane task (markers stay).
    pub(crate) fn remove_all(&mut self) -> Vec<RunnableRef> {
        let pending: Vec<RunnableRef> = self.list.iter().skip(self.markers).cloned().collect();
        self.remove(&pending)
    }

    /// Places a suspend marker at the front of the main lane.
    pub(crate) fn insert_at_front(&mut self, marker: RunnableRef) {
        let level = match marker.kind() {
            crate::tasks::RunnableKind::SuspendedInsert { level, .. } => *level,
            _ => 0,
        };
        self.list.push_front(RunnableRef::clone(&marker));
        self.markers += 1;
        self.insert_at = self.markers;
        self.notice(&marker, TaskEvent::AddingTo);
        self.emit(
            Event::for_runnable(EventKind::MarkerInserted, &marker)
                .with_position(0)
                .with_level(level),
        );
    }

    /// Removes a marker placed by [`insert_at_front`](Self::insert_at_front).
    pub(crate) fn remove_inserted(&mut self, marker: &RunnableRef) {
        let Some(pos) = self.list.iter().position(|x| x.id() == marker.id()) else {
            return;
        };
        if pos >= self.markers {
            return;
        }
        self.list.remove(pos);
        self.markers -= 1;
        if pos < self.insert_at {
            self.insert_at -= 1;
        }
        self.insert_at = self.insert_at.max(self.markers);
        self.notice(marker, TaskEvent::RemovingFrom);
        self.emit(Event::for_runnable(EventKind::MarkerRemoved, marker).with_position(pos));
    }

    pub(crate) fn next_runnable(&self, now: Instant) -> NextRunnable {
        if !self.hot.is_empty() {
            return NextRunnable::Hot;
        }
        if self.paused {
            return NextRunnable::None;
        }
        if self.list.len() > self.markers {
            return NextRunnable::Default;
        }
        if self.due_idle(now).is_some() {
            return NextRunnable::Other;
        }
        NextRunnable::None
    }

    /// Removes and returns the main-lane head, or a due idle entry.
    pub(crate) fn poll(&mut self, now: Instant) -> Option<RunnableRef> {
        if self.paused {
            return None;
        }
        if self.list.len() > self.markers {
            let r = self.list.remove(self.markers)?;
            if self.markers < self.insert_at {
                self.insert_at -= 1;
            }
            self.insert_at = self.insert_at.max(self.markers);
            self.reset_idle(now);
            self.notice(&r, TaskEvent::Starting);
            self.emit(Event::for_runnable(EventKind::TaskStarting, &r).with_reason("main"));
            return Some(r);
        }
        let idx = self.due_idle(now)?;
        let entry = &mut self.on_idle[idx];
        entry.fired = true;
        let r = RunnableRef::clone(&entry.runnable);
        self.notice(&r, TaskEvent::Starting);
        self.emit(Event::for_runnable(EventKind::TaskStarting, &r).with_reason("idle"));
        Some(r)
    }

    pub(crate) fn poll_hot(&mut self) -> Option<RunnableRef> {
        let r = self.hot.pop_front()?;
        self.notice(&r, TaskEvent::Starting);
        self.emit(Event::for_runnable(EventKind::TaskStarting, &r).with_reason("hot"));
        Some(r)
    }

    /// Records the start of a control-lane runnable.
    pub(crate) fn starting_control(&mut self, runnable: &RunnableRef) {
        self.notice(runnable, TaskEvent::Starting);
        self.emit(Event::for_runnable(EventKind::TaskStarting, runnable).with_reason("control"));
    }

    /// Records the outcome of a runnable.
    pub(crate) fn finished(&mut self, runnable: &RunnableRef, outcome: TaskEvent, reason: Option<&str>) {
        self.notice(runnable, outcome);
        let mut ev = Event::for_runnable(EventKind::TaskFinished, runnable).with_outcome(outcome);
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }
        self.emit(ev);
    }

    pub(crate) fn pause(&mut self) {
        self.paused = true;
        self.touched = true;
    }

    pub(crate) fn resume(&mut self) {
        self.paused = false;
        self.touched = true;
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn add_on_idle(&mut self, runnable: RunnableRef, timeout: Duration) {
        self.on_idle.retain(|e| e.runnable.id() != runnable.id());
        self.on_idle.push(IdleEntry {
            runnable,
            timeout,
            fired: false,
        });
        self.touched = true;
    }

    pub(crate) fn remove_on_idle(&mut self, runnable: &RunnableRef) {
        let before = self.on_idle.len();
        self.on_idle.retain(|e| e.runnable.id() != runnable.id());
        self.touched |= self.on_idle.len() != before;
    }

    /// Restarts the idle clock; every idle entry may fire again.
    pub(crate) fn reset_idle(&mut self, now: Instant) {
        self.last_activity = now;
        for e in &mut self.on_idle {
            e.fired = false;
        }
    }

    fn due_idle(&self, now: Instant) -> Option<usize> {
        let idle_for = now.saturating_duration_since(self.last_activity);
        self.on_idle
            .iter()
            .position(|e| !e.fired && idle_for >= e.timeout)
    }

    /// Earliest instant at which an idle entry becomes due.
    pub(crate) fn next_idle_deadline(&self) -> Option<Instant> {
        self.on_idle
            .iter()
            .filter(|e| !e.fired)
            .map(|e| self.last_activity + e.timeout)
            .min()
    }

    /// Closes the queue and abandons everything still pending.
    pub(crate) fn close(&mut self) -> Vec<RunnableRef> {
        self.closed = true;
        self.on_idle.clear();
        let list = std::mem::take(&mut self.list);
        let hot = std::mem::take(&mut self.hot);
        self.markers = 0;
        self.insert_at = 0;
        let mut abandoned = Vec::new();
        for r in list.into_iter().chain(hot) {
            if r.is_marker() {
                continue;
            }
            self.notice(&r, TaskEvent::BeingAbandoned);
            self.emit(Event::for_runnable(EventKind::TaskAbandoned, &r));
            abandoned.push(r);
        }
        abandoned
    }

    /// Pending main-lane tasks, markers excluded, in execution order.
    pub(crate) fn pending(&self) -> Vec<RunnableRef> {
        self.list.iter().skip(self.markers).cloned().collect()
    }

    /// Whole main lane including markers.
    pub(crate) fn snapshot(&self) -> Vec<RunnableRef> {
        self.list.iter().cloned().collect()
    }

    pub(crate) fn contains(&self, runnable: &RunnableRef) -> bool {
        self.list.iter().chain(self.hot.iter()).any(|x| x.id() == runnable.id())
    }

    /// Structural invariants: markers lead the lane and nothing else is a marker.
    pub(crate) fn check(&self) -> bool {
        let leading = self.list.iter().take_while(|r| r.is_marker()).count();
        leading == self.markers && self.list.iter().filter(|r| r.is_marker()).count() == self.markers
    }
}
