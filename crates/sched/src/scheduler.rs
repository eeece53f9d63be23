//! Execution stack of one platform.
//!
//! The top frame is the one executing. A frame whose remaining execution
//! time has elapsed on the physical clock is finished; the frame below it
//! resumes from the same instant.

use ptides_core::trace::{self, records::sched, RecordBuilder, TraceHook};
use ptides_core::{Event, EventId, NodeId, Tag, Time};

/// Events of one firing while they execute.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Id of the event that was selected as safe.
    pub id: EventId,
    pub node: NodeId,
    pub tag: Tag,
    pub events: Vec<Event>,
    /// Earliest absolute deadline among `events`.
    pub deadline: Time,
    /// Execution time still owed, measured from the stack cursor.
    pub remaining: Time,
    pub pure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Idle,
    Running { node: NodeId, finish: Time },
}

pub struct ExecutionStack {
    frames: Vec<Frame>,
    /// Physical time at which the top frame started or last resumed.
    cursor: Time,
    trace: Option<TraceHook>,
}

impl ExecutionStack {
    pub fn new(trace: Option<TraceHook>) -> Self {
        Self {
            frames: Vec::new(),
            cursor: Time::ZERO,
            trace,
        }
    }

    pub fn set_trace_hook(&mut self, trace: Option<TraceHook>) {
        self.trace = trace;
    }

    pub fn state(&self) -> StackState {
        match (self.top(), self.finish_time()) {
            (Some(top), Some(finish)) => StackState::Running {
                node: top.node,
                finish,
            },
            _ => StackState::Idle,
        }
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_idle(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn cursor(&self) -> Time {
        self.cursor
    }

    /// Whether `node` has a frame anywhere on the stack.
    pub fn is_executing(&self, node: NodeId) -> bool {
        self.frames.iter().any(|frame| frame.node == node)
    }

    /// Physical time at which the top frame will finish.
    pub fn finish_time(&self) -> Option<Time> {
        self.top()
            .map(|top| self.cursor.saturating_add(top.remaining))
    }

    /// Starts `frame` at `now`, suspending the current top frame if any.
    pub fn push(&mut self, frame: Frame, now: Time) {
        let node = frame.node;
        match self.frames.last_mut() {
            Some(suspended) => {
                let elapsed = now - self.cursor;
                suspended.remaining = (suspended.remaining - elapsed).max(Time::ZERO);
                log::debug!(
                    "{} preempts {} at {now}, {} left",
                    node,
                    suspended.node,
                    suspended.remaining
                );
                let payload = node_pair(node, suspended.node);
                self.emit_record(sched::PREEMPT, &payload, true);
            }
            None => {
                let payload = RecordBuilder::new().u32(node.index() as u32).finish();
                self.emit_record(sched::NEXT, &payload, true);
            }
        }
        self.frames.push(frame);
        self.cursor = now;
    }

    /// Pops the top frame if it has finished by `now`.
    pub fn complete_top(&mut self, now: Time) -> Option<Frame> {
        if self.finish_time()? > now {
            return None;
        }
        let finished = self.frames.pop()?;
        self.cursor = now;
        match self.frames.last() {
            Some(resumed) => {
                log::debug!("{} resumes at {now}", resumed.node);
                let payload = node_pair(resumed.node, finished.node);
                self.emit_record(sched::RESUME, &payload, true);
            }
            None => {
                let payload = RecordBuilder::new()
                    .u32(finished.node.index() as u32)
                    .finish();
                self.emit_record(sched::IDLE, &payload, true);
            }
        }
        Some(finished)
    }

    /// Drops every frame without completing it.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    fn emit_record(&self, record: u8, payload: &[u8], timestamp: bool) {
        trace::emit(&self.trace, record, payload, timestamp);
    }
}

fn node_pair(next: NodeId, previous: NodeId) -> Vec<u8> {
    RecordBuilder::new()
        .u32(next.index() as u32)
        .u32(previous.index() as u32)
        .finish()
}
