//! Preemption tests.
//!
//! A policy is a pure function of the executing frame and the candidate.
//! Pure candidates preempt any data frame; a data candidate never preempts a
//! pure frame. The remaining cases are what distinguishes the policies.

use std::fmt;
use std::sync::Arc;

use ptides_core::{PolicyKind, Tag, Time};

use crate::scheduler::Frame;

/// What a policy knows about an event that is safe to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub tag: Tag,
    /// Absolute deadline in model time.
    pub deadline: Time,
    pub pure: bool,
}

pub trait PreemptionPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Policy-specific test, consulted only when neither side is pure.
    fn preempts(&self, running: &Frame, candidate: &Candidate) -> bool;

    /// Whether `a` should start before `b` when both are safe.
    fn precedes(&self, a: &Candidate, b: &Candidate) -> bool {
        a.tag < b.tag
    }

    fn should_preempt(&self, running: &Frame, candidate: &Candidate) -> bool {
        if candidate.pure {
            return true;
        }
        if running.pure {
            return false;
        }
        self.preempts(running, candidate)
    }
}

/// Preempts when the candidate carries an earlier tag.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampPolicy;

impl PreemptionPolicy for TimestampPolicy {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn preempts(&self, running: &Frame, candidate: &Candidate) -> bool {
        candidate.tag < running.tag
    }
}

/// Earliest deadline first.
///
/// The candidate wins only against a frame whose every event has a later
/// deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct EdfPolicy;

impl PreemptionPolicy for EdfPolicy {
    fn name(&self) -> &'static str {
        "edf"
    }

    fn preempts(&self, running: &Frame, candidate: &Candidate) -> bool {
        candidate.deadline < running.deadline
    }

    fn precedes(&self, a: &Candidate, b: &Candidate) -> bool {
        (a.deadline, a.tag) < (b.deadline, b.tag)
    }
}

/// Frames always run to completion.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonPreemptive;

impl PreemptionPolicy for NonPreemptive {
    fn name(&self) -> &'static str {
        "non-preemptive"
    }

    fn preempts(&self, _running: &Frame, _candidate: &Candidate) -> bool {
        false
    }

    fn should_preempt(&self, _running: &Frame, _candidate: &Candidate) -> bool {
        false
    }
}

pub fn policy_for(kind: PolicyKind) -> Arc<dyn PreemptionPolicy> {
    match kind {
        PolicyKind::Timestamp => Arc::new(TimestampPolicy),
        PolicyKind::Edf => Arc::new(EdfPolicy),
        PolicyKind::NonPreemptive => Arc::new(NonPreemptive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptides_core::{Event, NodeId};

    fn frame(deadline: i64, tag: i64, pure: bool) -> Frame {
        Frame {
            id: Event::pure(NodeId::new(0), Tag::ZERO).id(),
            node: NodeId::new(0),
            tag: Tag::at(Time::from_secs(tag)),
            events: Vec::new(),
            deadline: Time::from_secs(deadline),
            remaining: Time::from_secs(1),
            pure,
        }
    }

    fn candidate(deadline: i64, tag: i64, pure: bool) -> Candidate {
        Candidate {
            tag: Tag::at(Time::from_secs(tag)),
            deadline: Time::from_secs(deadline),
            pure,
        }
    }

    #[test]
    fn edf_preempts_only_for_earlier_deadlines() {
        let running = frame(10, 0, false);
        assert!(EdfPolicy.should_preempt(&running, &candidate(7, 5, false)));
        assert!(!EdfPolicy.should_preempt(&running, &candidate(12, 0, false)));
        assert!(!EdfPolicy.should_preempt(&running, &candidate(10, 0, false)));
    }

    #[test]
    fn edf_selection_ignores_arrival_order() {
        let early = candidate(3, 9, false);
        let late = candidate(8, 1, false);
        assert!(EdfPolicy.precedes(&early, &late));
        assert!(!EdfPolicy.precedes(&late, &early));
    }

    #[test]
    fn timestamp_policy_compares_tags() {
        let running = frame(0, 5, false);
        assert!(TimestampPolicy.should_preempt(&running, &candidate(100, 4, false)));
        assert!(!TimestampPolicy.should_preempt(&running, &candidate(0, 5, false)));
    }

    #[test]
    fn pure_events_preempt_and_are_never_preempted_by_data() {
        let data = frame(10, 5, false);
        let pure = frame(10, 5, true);
        for policy in [policy_for(PolicyKind::Timestamp), policy_for(PolicyKind::Edf)] {
            assert!(policy.should_preempt(&data, &candidate(50, 50, true)), "{}", policy.name());
            assert!(!policy.should_preempt(&pure, &candidate(1, 1, false)), "{}", policy.name());
        }
    }

    #[test]
    fn non_preemptive_never_preempts() {
        let running = frame(10, 5, false);
        assert!(!NonPreemptive.should_preempt(&running, &candidate(1, 1, true)));
        assert!(!NonPreemptive.should_preempt(&running, &candidate(1, 1, false)));
    }
}
