//! The dispatch loop of one platform.
//!
//! A platform owns its event store and execution stack and is their only
//! writer. Other threads reach it through [`Producer`] handles; their
//! messages are drained at the start of every [`Platform::step`].

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use ptides_core::trace::{self, records, RecordBuilder, TraceHook};
use ptides_core::{
    CausalityAnalysis, ConfigurationError, Destination, Event, EventHandle, EventId, EventStore,
    Graph, InvariantViolation, NodeId, Oracle, Payload, PhysicalClock, PlatformConfig, PortId,
    SystemClock, Tag, Time,
};

use crate::error::PlatformError;
use crate::firing::{Emission, Firing, FiringContext, FiringHandler};
use crate::policy::{policy_for, Candidate, PreemptionPolicy};
use crate::producer::{Message, Producer};
use crate::scheduler::{ExecutionStack, Frame};

/// Outcome of one dispatch step.
#[derive(Debug, Clone)]
pub enum Step {
    /// A firing finished executing and must be handled and committed.
    Ready(Firing),
    /// A frame is executing; nothing changes before `until`.
    Busy { until: Time },
    /// Events are pending but none is safe. `wake_at` is the earliest
    /// physical time at which one may become safe.
    Waiting { wake_at: Option<Time> },
    Idle,
}

pub struct PlatformBuilder {
    graph: Arc<Graph>,
    config: PlatformConfig,
    clock: Option<Arc<dyn PhysicalClock>>,
    policy: Option<Arc<dyn PreemptionPolicy>>,
    trace: Option<TraceHook>,
}

impl PlatformBuilder {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self {
            graph,
            config: PlatformConfig::default(),
            clock: None,
            policy: None,
            trace: None,
        }
    }

    pub fn with_config(mut self, config: PlatformConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn PhysicalClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Overrides the policy selected by the configuration.
    pub fn with_policy(mut self, policy: Arc<dyn PreemptionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    pub fn build(self) -> Result<Platform, PlatformError> {
        self.config.validate()?;
        let PlatformBuilder {
            graph,
            config,
            clock,
            policy,
            trace,
        } = self;

        let mut store = EventStore::new(
            config.tie_break_strategy(),
            config.queue_capacity,
            config.receiver_capacity,
        );
        store.set_trace_hook(trace.clone());
        let mut oracle = Oracle::new(
            CausalityAnalysis::with_boundary(Arc::clone(&graph), config.boundary),
            config.margins(),
        );
        oracle.set_trace_hook(trace.clone());

        let policy = policy.unwrap_or_else(|| policy_for(config.policy));
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn PhysicalClock>);
        let (sender, inbox) = crossbeam_channel::unbounded();
        log::debug!(
            "platform {} built with {} policy over {} nodes",
            config.name,
            policy.name(),
            graph.node_count()
        );

        Ok(Platform {
            stack: ExecutionStack::new(trace.clone()),
            graph,
            config,
            store,
            oracle,
            policy,
            clock,
            sender,
            inbox,
            outstanding: HashSet::new(),
            trace,
        })
    }
}

pub struct Platform {
    graph: Arc<Graph>,
    config: PlatformConfig,
    store: EventStore,
    oracle: Oracle,
    stack: ExecutionStack,
    policy: Arc<dyn PreemptionPolicy>,
    clock: Arc<dyn PhysicalClock>,
    sender: Sender<Message>,
    inbox: Receiver<Message>,
    /// Firings handed out but not committed yet.
    outstanding: HashSet<EventId>,
    trace: Option<TraceHook>,
}

impl Platform {
    pub fn builder(graph: Arc<Graph>) -> PlatformBuilder {
        PlatformBuilder::new(graph)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn clock(&self) -> &Arc<dyn PhysicalClock> {
        &self.clock
    }

    pub fn policy(&self) -> &dyn PreemptionPolicy {
        self.policy.as_ref()
    }

    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn stack(&self) -> &ExecutionStack {
        &self.stack
    }

    pub fn trace_hook(&self) -> Option<TraceHook> {
        self.trace.clone()
    }

    pub fn producer(&self) -> Producer {
        Producer::new(self.sender.clone())
    }

    /// Events queued and not yet admitted.
    pub fn pending(&self) -> usize {
        self.store.len()
    }

    pub fn is_idle(&self) -> bool {
        self.store.is_empty() && self.stack.is_idle() && self.inbox.is_empty()
    }

    pub fn produce(
        &mut self,
        port: PortId,
        tag: Tag,
        payload: impl Into<Payload>,
    ) -> Result<EventHandle, PlatformError> {
        self.admit(Event::data(port, tag, payload.into()))
    }

    /// Queues a pure event that no firing triggered.
    pub fn schedule_pure(&mut self, node: NodeId, tag: Tag) -> Result<EventHandle, PlatformError> {
        self.admit(Event::pure(node, tag))
    }

    /// Queues a prepared event. Events without a deadline get the one their
    /// destination implies.
    pub fn admit(&mut self, event: Event) -> Result<EventHandle, PlatformError> {
        let event = self.prepare(event)?;
        Ok(self.store.insert(event)?)
    }

    /// Withdraws a pending pure event. Admitted and data events stay.
    pub fn cancel(&mut self, id: EventHandle) -> Option<Event> {
        let event = self.store.withdraw(id);
        if event.is_none() {
            log::warn!("{}: cannot cancel {id}", self.config.name);
        }
        event
    }

    /// Advances the dispatch loop by one decision at the current clock
    /// reading.
    pub fn step(&mut self) -> Result<Step, PlatformError> {
        self.drain_inbox();
        let now = self.clock.now();

        if let Some(frame) = self.stack.complete_top(now.timestamp) {
            return Ok(Step::Ready(self.hand_out(frame)?));
        }

        let (selected, wake_at) = self.select(now)?;
        let Some((id, candidate)) = selected else {
            if !self.stack.is_idle() {
                return Ok(self.busy(wake_at));
            }
            if self.store.is_empty() {
                return Ok(Step::Idle);
            }
            return Ok(Step::Waiting { wake_at });
        };
        if let Some(top) = self.stack.top() {
            if !self.policy.should_preempt(top, &candidate) {
                return Ok(self.busy(wake_at));
            }
        }

        self.start(id, now.timestamp)?;
        match self.stack.complete_top(now.timestamp) {
            Some(frame) => Ok(Step::Ready(self.hand_out(frame)?)),
            None => Ok(self.busy(wake_at)),
        }
    }

    /// Steps once and returns the firing if one completed.
    pub fn next_ready(&mut self) -> Result<Option<Firing>, PlatformError> {
        match self.step()? {
            Step::Ready(firing) => Ok(Some(firing)),
            _ => Ok(None),
        }
    }

    /// Marks a handed-out firing as processed.
    pub fn commit(&mut self, firing: &Firing) -> Result<(), PlatformError> {
        if !self.outstanding.remove(&firing.id) {
            return Err(InvariantViolation::NotExecuting(firing.id).into());
        }
        log::debug!(
            "{}: committed {} for {} at {}",
            self.config.name,
            firing.id,
            firing.node,
            firing.tag
        );
        let payload = trace::tag_fields(
            RecordBuilder::new()
                .i64(firing.id.raw() as i64)
                .u32(firing.node.index() as u32),
            firing.tag,
        )
        .finish();
        trace::emit(&self.trace, records::sched::COMMIT, &payload, true);
        Ok(())
    }

    /// Commits `firing` and delivers what its handler produced.
    ///
    /// Nothing is committed or queued unless every produced event is
    /// accepted, so a refused completion can be retried.
    pub fn complete(&mut self, firing: &Firing, ctx: FiringContext) -> Result<(), PlatformError> {
        if !self.outstanding.contains(&firing.id) {
            return Err(InvariantViolation::NotExecuting(firing.id).into());
        }
        let (emissions, schedules) = ctx.into_parts();
        let mut produced = self.route(firing, emissions)?;
        for tag in schedules {
            if tag < firing.tag {
                return Err(PlatformError::ScheduledInPast {
                    node: firing.node,
                    current: firing.tag,
                    requested: tag,
                });
            }
            let deadline = self.pure_deadline(firing, tag)?;
            produced.push(
                Event::pure(firing.node, tag)
                    .with_source(firing.node)
                    .with_deadline(deadline),
            );
        }
        let produced = produced
            .into_iter()
            .map(|event| self.prepare(event))
            .collect::<Result<Vec<_>, _>>()?;
        let destinations: Vec<Destination> = produced.iter().map(Event::destination).collect();
        self.store.check_room(&destinations)?;

        self.commit(firing)?;
        for event in produced {
            self.store.insert(event)?;
        }
        Ok(())
    }

    /// Runs until no event is pending or the clock cannot wait any longer.
    ///
    /// Returns the number of firings handled. The causality memo is cleared
    /// when the run ends.
    pub fn run_until_idle<H>(&mut self, handler: &mut H) -> Result<usize, PlatformError>
    where
        H: FiringHandler + ?Sized,
    {
        let result = self.run_loop(handler);
        if let Some(idle) = self.config.idle_callback {
            idle();
        }
        self.oracle.causality().invalidate();
        result
    }

    fn run_loop<H>(&mut self, handler: &mut H) -> Result<usize, PlatformError>
    where
        H: FiringHandler + ?Sized,
    {
        let mut fired = 0;
        loop {
            match self.step()? {
                Step::Ready(firing) => {
                    let mut ctx = FiringContext::new(&firing);
                    handler
                        .fire(&firing, &mut ctx)
                        .map_err(|source| PlatformError::Handler {
                            firing: firing.id,
                            source,
                        })?;
                    self.complete(&firing, ctx)?;
                    fired += 1;
                }
                Step::Busy { until }
                | Step::Waiting {
                    wake_at: Some(until),
                } => {
                    if !self.clock.sleep_until(until) {
                        break;
                    }
                }
                Step::Waiting { wake_at: None } => {
                    log::warn!(
                        "{}: {} event(s) pending but none can become safe",
                        self.config.name,
                        self.store.len()
                    );
                    break;
                }
                Step::Idle => break,
            }
        }
        Ok(fired)
    }

    /// Drops pending events and frames and forgets consumed tags.
    pub fn reset(&mut self) {
        self.drain_inbox();
        self.store.clear();
        self.stack.clear();
        self.outstanding.clear();
        self.oracle.causality().invalidate();
    }

    fn drain_inbox(&mut self) {
        while let Ok(message) = self.inbox.try_recv() {
            match message {
                Message::Produce(event) => {
                    let id = event.id();
                    if let Err(err) = self.admit(event) {
                        log::warn!("{}: dropping produced event {id}: {err}", self.config.name);
                    }
                }
                Message::Cancel(id) => {
                    self.cancel(id);
                }
            }
        }
    }

    /// Best safe event under the policy, plus the earliest wake-up of the
    /// blocked ones.
    fn select(&self, now: Tag) -> Result<(Option<(EventId, Candidate)>, Option<Time>), PlatformError> {
        let graph = &self.graph;
        let stack = &self.stack;
        let scan = self.oracle.scan(&self.store, now, |event| {
            node_of(graph, event).map_or(false, |node| stack.is_executing(node))
        })?;

        let mut best: Option<(EventId, Candidate)> = None;
        for id in scan.safe {
            let Some(event) = self.store.get(id) else {
                continue;
            };
            let candidate = Candidate {
                tag: event.tag(),
                deadline: self.deadline_of(event)?,
                pure: event.is_pure(),
            };
            let better = match &best {
                Some((_, current)) => self.policy.precedes(&candidate, current),
                None => true,
            };
            if better {
                best = Some((id, candidate));
            }
        }
        Ok((best, scan.wake_at))
    }

    fn start(&mut self, id: EventId, now: Time) -> Result<(), PlatformError> {
        let batch = self.oracle.take_batch(&mut self.store, id)?;
        let first = batch.first().ok_or(InvariantViolation::NotQueued(id))?;
        let node = self.node_of(first)?;
        let (tag, pure) = (first.tag(), first.is_pure());
        let remaining = if self.is_actuation(first)? {
            Time::ZERO
        } else {
            self.graph.execution_time(node)?
        };
        let mut deadline = Time::POSITIVE_INFINITY;
        for event in &batch {
            deadline = deadline.min(self.deadline_of(event)?);
        }

        log::debug!(
            "{}: starting {node} at {tag} ({} event(s), deadline {deadline})",
            self.config.name,
            batch.len()
        );
        self.stack.push(
            Frame {
                id,
                node,
                tag,
                events: batch,
                deadline,
                remaining,
                pure,
            },
            now,
        );
        Ok(())
    }

    fn hand_out(&mut self, frame: Frame) -> Result<Firing, PlatformError> {
        let actuation = match frame.events.first() {
            Some(event) => self.is_actuation(event)?,
            None => false,
        };
        self.outstanding.insert(frame.id);
        Ok(Firing {
            id: frame.id,
            node: frame.node,
            tag: frame.tag,
            deadline: frame.deadline,
            events: frame.events,
            pure: frame.pure,
            actuation,
        })
    }

    fn busy(&self, wake_at: Option<Time>) -> Step {
        match (self.stack.finish_time(), wake_at) {
            (Some(finish), Some(wake)) => Step::Busy {
                until: finish.min(wake),
            },
            (Some(finish), None) => Step::Busy { until: finish },
            (None, wake_at) => Step::Waiting { wake_at },
        }
    }

    /// Turns emissions into events for every port that receives them.
    fn route(&self, firing: &Firing, emissions: Vec<Emission>) -> Result<Vec<Event>, PlatformError> {
        let mut events = Vec::new();
        for Emission { port, tag, payload } in emissions {
            let data = self.graph.port(port)?;
            if data.node != firing.node || self.graph.is_input(port)? {
                return Err(ConfigurationError::NotAnOutput(port).into());
            }
            if tag < firing.tag {
                return Err(PlatformError::ScheduledInPast {
                    node: firing.node,
                    current: firing.tag,
                    requested: tag,
                });
            }
            let targets = self.graph.destinations(port)?;
            if targets.is_empty() && self.graph.downstream(port)?.is_empty() {
                events.push(Event::data(port, tag, payload).with_source(firing.node));
                continue;
            }
            for target in targets {
                events.push(Event::data(target, tag, payload.clone()).with_source(firing.node));
            }
        }
        Ok(events)
    }

    /// Deadline of a pure event scheduled by `firing` for `tag`.
    ///
    /// The trigger's deadline moves with the gap between the two tags, less
    /// the node's smallest internal delay, and never moves earlier.
    fn pure_deadline(&self, firing: &Firing, tag: Tag) -> Result<Time, PlatformError> {
        let delta = self
            .oracle
            .causality()
            .interface(firing.node)?
            .minimum_internal_delay()?
            .unwrap_or(Time::ZERO);
        let slack = tag.timestamp - firing.tag.timestamp - delta;
        if slack < Time::ZERO {
            Ok(firing.deadline)
        } else {
            Ok(firing.deadline.saturating_add(slack))
        }
    }

    /// Validates `event` against the graph and the clock and fills in its
    /// deadline.
    fn prepare(&self, event: Event) -> Result<Event, PlatformError> {
        let node = self.node_of(&event)?;
        let actuation = self.is_actuation(&event)?;
        if !actuation && self.graph.is_composite(node)? {
            return Err(ConfigurationError::CompositeDestination(node).into());
        }
        if let Destination::Port(port) = event.destination() {
            let (tag, now) = (event.tag(), self.clock.now().timestamp);
            if actuation && now > tag.timestamp {
                return Err(InvariantViolation::MissedActuation { port, tag, now }.into());
            }
            if let Some(latency) = self.graph.port(port)?.latency {
                if now > tag.timestamp.saturating_add(latency) {
                    return Err(InvariantViolation::MissedSensor { port, tag, now }.into());
                }
            }
        }
        match event.deadline() {
            Some(_) => Ok(event),
            None => {
                let deadline = self.default_deadline(&event)?;
                Ok(event.with_deadline(deadline))
            }
        }
    }

    fn default_deadline(&self, event: &Event) -> Result<Time, PlatformError> {
        match event.destination() {
            Destination::Port(port) => Ok(event
                .tag()
                .timestamp
                .saturating_add(self.graph.relative_deadline(port)?)),
            // nothing triggered it, so it is as urgent as it gets
            Destination::Node(_) => Ok(Time::NEGATIVE_INFINITY),
        }
    }

    fn deadline_of(&self, event: &Event) -> Result<Time, PlatformError> {
        match event.deadline() {
            Some(deadline) => Ok(deadline),
            None => self.default_deadline(event),
        }
    }

    fn node_of(&self, event: &Event) -> Result<NodeId, PlatformError> {
        Ok(node_of(&self.graph, event)?)
    }

    fn is_actuation(&self, event: &Event) -> Result<bool, PlatformError> {
        match event.destination() {
            Destination::Port(port) => Ok(!self.graph.is_input(port)?),
            Destination::Node(_) => Ok(false),
        }
    }
}

fn node_of(graph: &Graph, event: &Event) -> Result<NodeId, ConfigurationError> {
    match event.destination() {
        Destination::Port(port) => graph.owner(port),
        Destination::Node(node) => {
            graph.node(node)?;
            Ok(node)
        }
    }
}
