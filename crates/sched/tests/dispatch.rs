//! End-to-end dispatch: routing, batching, producers, cancellation, tracing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use ptides_core::trace::records;
use ptides_core::{
    CoreError, Graph, GraphBuilder, InvariantViolation, NodeId, Payload, PhysicalClock,
    PlatformConfig, PortId, SimulatedClock, Tag, Time, TraceHook,
};
use ptides_sched::{Firing, FiringContext, HandlerError, Platform, PlatformError, Step};

fn secs(s: i64) -> Time {
    Time::from_secs(s)
}

/// `source -> proc (2s) -> sink`, with `sink.display` as actuator.
struct Pipeline {
    graph: Arc<Graph>,
    source: NodeId,
    source_out: PortId,
    proc_node: NodeId,
    proc_out: PortId,
    sink: NodeId,
    sink_in: PortId,
    display: PortId,
}

fn pipeline() -> Pipeline {
    let mut b = GraphBuilder::new();
    let source = b.node("source");
    let source_out = b.output(source, "out");
    let proc_node = b.node("proc");
    let proc_in = b.input(proc_node, "in");
    let proc_out = b.output(proc_node, "out");
    let sink = b.node("sink");
    let sink_in = b.input(sink, "in");
    let display = b.output(sink, "display");
    b.depends(proc_in, proc_out, secs(2))
        .connect(source_out, proc_in)
        .connect(proc_out, sink_in);
    Pipeline {
        graph: Arc::new(b.build().expect("pipeline graph")),
        source,
        source_out,
        proc_node,
        proc_out,
        sink,
        sink_in,
        display,
    }
}

fn simulated(graph: &Arc<Graph>, config: PlatformConfig) -> (Platform, Arc<SimulatedClock>) {
    let clock = Arc::new(SimulatedClock::default());
    let platform = Platform::builder(Arc::clone(graph))
        .with_config(config)
        .with_clock(clock.clone())
        .build()
        .expect("platform should build");
    (platform, clock)
}

#[test]
fn pipeline_runs_to_the_actuator() {
    let p = pipeline();
    let (mut platform, clock) = simulated(&p.graph, PlatformConfig::default());
    platform.schedule_pure(p.source, Tag::at(secs(1))).unwrap();

    let actuated = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&actuated);
    let mut handler = |firing: &Firing, ctx: &mut FiringContext| -> Result<(), HandlerError> {
        if firing.actuation {
            let value = firing.payload(p.display).and_then(Payload::as_int);
            seen.lock().unwrap().push((firing.tag, value));
        } else if firing.node == p.source {
            ctx.emit(p.source_out, 4i64);
        } else if firing.node == p.proc_node {
            let input = firing.events[0].payload().and_then(Payload::as_int).unwrap_or(0);
            ctx.emit_after(p.proc_out, secs(2), input * 10);
        } else if firing.node == p.sink {
            let input = firing.payload(p.sink_in).cloned().ok_or("sink fired without input")?;
            ctx.emit(p.display, input);
        }
        Ok(())
    };

    let fired = platform.run_until_idle(&mut handler).unwrap();
    assert_eq!(fired, 4);
    assert_eq!(*actuated.lock().unwrap(), vec![(Tag::at(secs(3)), Some(40))]);
    // the actuator output waits for its timestamp
    assert_eq!(clock.now(), Tag::at(secs(3)));
    assert!(platform.is_idle());
    assert_eq!(platform.oracle().causality().memoized(), 0);
}

#[test]
fn same_tag_inputs_fire_together() {
    let mut b = GraphBuilder::new();
    let join = b.node("join");
    let left = b.input(join, "left");
    let right = b.input(join, "right");
    let _out = b.output(join, "out");
    let graph = Arc::new(b.build().unwrap());
    let (mut platform, _clock) = simulated(&graph, PlatformConfig::default());

    platform.produce(left, Tag::ZERO, 1i64).unwrap();
    platform.produce(right, Tag::ZERO, 2i64).unwrap();
    platform.produce(right, Tag::new(Time::ZERO, 1), 3i64).unwrap();

    let first = platform.next_ready().unwrap().unwrap();
    assert_eq!(first.events.len(), 2);
    assert_eq!(first.payload(left), Some(&Payload::Int(1)));
    assert_eq!(first.payload(right), Some(&Payload::Int(2)));
    platform.commit(&first).unwrap();

    let second = platform.next_ready().unwrap().unwrap();
    assert_eq!(second.tag, Tag::new(Time::ZERO, 1));
    assert_eq!(second.events.len(), 1);
}

#[test]
fn pure_event_fires_once_with_same_tag_data() {
    let p = pipeline();
    let (mut platform, clock) = simulated(&p.graph, PlatformConfig::default());
    clock.set_time(secs(10)).unwrap();
    platform.schedule_pure(p.sink, Tag::at(secs(5))).unwrap();
    platform.produce(p.sink_in, Tag::at(secs(5)), 7i64).unwrap();

    let firing = platform.next_ready().unwrap().expect("sink fires");
    assert_eq!(firing.node, p.sink);
    assert_eq!(firing.tag, Tag::at(secs(5)));
    assert!(firing.pure);
    assert_eq!(firing.events.len(), 2);
    assert_eq!(firing.payload(p.sink_in), Some(&Payload::Int(7)));
    platform.commit(&firing).unwrap();
    assert!(matches!(platform.step().unwrap(), Step::Idle));
}

#[test]
fn late_actuation_is_a_missed_deadline() {
    let p = pipeline();
    let (mut platform, clock) = simulated(&p.graph, PlatformConfig::default());
    clock.set_time(secs(1)).unwrap();
    platform.produce(p.sink_in, Tag::at(secs(1)), 1i64).unwrap();
    let firing = platform.next_ready().unwrap().expect("sink fires");

    clock.set_time(secs(2)).unwrap();
    let mut ctx = FiringContext::new(&firing);
    ctx.emit(p.display, 1i64);
    let err = platform.complete(&firing, ctx).unwrap_err();
    assert!(matches!(
        err,
        PlatformError::Core(CoreError::Invariant(InvariantViolation::MissedActuation { port, now, .. }))
            if port == p.display && now == secs(2)
    ));
    assert!(!err.is_recoverable());
    assert_eq!(platform.pending(), 0);
}

#[test]
fn late_sensor_readings_are_rejected() {
    let mut b = GraphBuilder::new();
    let sensor = b.node("sensor");
    let reading = b.input(sensor, "reading");
    b.latency(reading, Time::from_millis(500));
    let graph = Arc::new(b.build().unwrap());
    let (mut platform, clock) = simulated(&graph, PlatformConfig::default());
    clock.set_time(secs(2)).unwrap();

    let err = platform.produce(reading, Tag::at(secs(1)), 0.5).unwrap_err();
    assert!(matches!(
        err,
        PlatformError::Core(CoreError::Invariant(InvariantViolation::MissedSensor { port, .. }))
            if port == reading
    ));
    platform
        .produce(reading, Tag::at(Time::from_millis(1500)), 0.5)
        .unwrap();
    assert_eq!(platform.pending(), 1);
}

#[test]
fn refused_completion_leaves_the_firing_outstanding() {
    let mut b = GraphBuilder::new();
    let source = b.node("source");
    let out = b.output(source, "out");
    let left = b.node("left");
    let left_in = b.input(left, "in");
    let right = b.node("right");
    let right_in = b.input(right, "in");
    b.connect(out, left_in).connect(out, right_in);
    let graph = Arc::new(b.build().unwrap());
    let config = PlatformConfig::builder().queue_capacity(1).build();
    let (mut platform, _clock) = simulated(&graph, config);
    platform.schedule_pure(source, Tag::ZERO).unwrap();
    let firing = platform.next_ready().unwrap().expect("source fires");

    let mut ctx = FiringContext::new(&firing);
    ctx.emit(out, 1i64);
    let err = platform.complete(&firing, ctx).unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(platform.pending(), 0);

    let mut ctx = FiringContext::new(&firing);
    ctx.schedule_after(secs(1));
    platform.complete(&firing, ctx).unwrap();
    assert_eq!(platform.pending(), 1);
}

#[test]
fn producer_threads_feed_the_inbox() {
    let p = pipeline();
    let (mut platform, _clock) = simulated(&p.graph, PlatformConfig::default());
    let producer = platform.producer();

    let workers: Vec<_> = (0..3i64)
        .map(|i| {
            let producer = producer.clone();
            let port = p.sink_in;
            thread::spawn(move || producer.produce(port, Tag::at(secs(3 - i)), i).unwrap())
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&order);
    let mut handler = move |firing: &Firing, _ctx: &mut FiringContext| -> Result<(), HandlerError> {
        seen.lock().unwrap().push(firing.tag.timestamp);
        Ok(())
    };
    assert_eq!(platform.run_until_idle(&mut handler).unwrap(), 3);
    assert_eq!(*order.lock().unwrap(), vec![secs(1), secs(2), secs(3)]);
}

#[test]
fn only_pending_pure_events_can_be_cancelled() {
    let p = pipeline();
    let (mut platform, _clock) = simulated(&p.graph, PlatformConfig::default());

    let pure = platform.schedule_pure(p.sink, Tag::at(secs(5))).unwrap();
    let data = platform.produce(p.sink_in, Tag::at(secs(5)), 1i64).unwrap();
    assert!(platform.cancel(pure).is_some());
    assert!(platform.cancel(pure).is_none());
    assert!(platform.cancel(data).is_none());
    assert_eq!(platform.pending(), 1);

    let again = platform.schedule_pure(p.source, Tag::at(secs(9))).unwrap();
    platform.producer().cancel(again).unwrap();
    assert!(matches!(platform.step().unwrap(), Step::Waiting { .. }));
    assert_eq!(platform.pending(), 1);
}

#[test]
fn committing_twice_is_an_invariant_violation() {
    let p = pipeline();
    let (mut platform, _clock) = simulated(&p.graph, PlatformConfig::default());
    platform.schedule_pure(p.source, Tag::ZERO).unwrap();

    let firing = platform.next_ready().unwrap().unwrap();
    platform.commit(&firing).unwrap();
    let err = platform.commit(&firing).unwrap_err();
    assert!(matches!(
        err,
        PlatformError::Core(CoreError::Invariant(InvariantViolation::NotExecuting(id))) if id == firing.id
    ));
}

#[test]
fn scheduling_into_the_past_is_rejected() {
    let p = pipeline();
    let (mut platform, clock) = simulated(&p.graph, PlatformConfig::default());
    clock.set_time(secs(5)).unwrap();
    platform.schedule_pure(p.source, Tag::at(secs(5))).unwrap();

    let mut handler = |_: &Firing, ctx: &mut FiringContext| -> Result<(), HandlerError> {
        ctx.schedule_at(Tag::at(secs(4)));
        Ok(())
    };
    let err = platform.run_until_idle(&mut handler).unwrap_err();
    assert!(matches!(err, PlatformError::ScheduledInPast { .. }));
}

#[test]
fn handler_errors_abort_the_run() {
    let p = pipeline();
    let (mut platform, _clock) = simulated(&p.graph, PlatformConfig::default());
    platform.schedule_pure(p.source, Tag::ZERO).unwrap();

    let mut handler = |_: &Firing, _: &mut FiringContext| -> Result<(), HandlerError> {
        Err("sensor offline".into())
    };
    let err = platform.run_until_idle(&mut handler).unwrap_err();
    assert!(matches!(err, PlatformError::Handler { .. }));
    assert!(err.to_string().contains("sensor offline"));
}

#[test]
fn bounded_queue_refusal_is_recoverable() {
    let p = pipeline();
    let config = PlatformConfig::builder().queue_capacity(1).build();
    let (mut platform, _clock) = simulated(&p.graph, config);

    platform.produce(p.sink_in, Tag::ZERO, 1i64).unwrap();
    let err = platform.produce(p.sink_in, Tag::at(secs(1)), 2i64).unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(platform.pending(), 1);
}

#[test]
fn self_scheduled_pure_events_inherit_the_trigger_deadline() {
    let p = pipeline();
    let (mut platform, clock) = simulated(&p.graph, PlatformConfig::default());
    clock.set_time(secs(1)).unwrap();
    platform.produce(p.sink_in, Tag::at(secs(1)), 1i64).unwrap();

    let firing = platform.next_ready().unwrap().unwrap();
    assert_eq!(firing.deadline, secs(1));
    let mut ctx = FiringContext::new(&firing);
    ctx.schedule_after(secs(3));
    platform.complete(&firing, ctx).unwrap();

    let pending = platform.store().queue().peek_min().unwrap();
    assert!(pending.is_pure());
    assert_eq!(pending.tag(), Tag::at(secs(4)));
    // sink has no internal delay, so the deadline moves with the tag
    assert_eq!(pending.deadline(), Some(secs(4)));
}

static IDLE_CALLS: AtomicUsize = AtomicUsize::new(0);

fn count_idle() {
    IDLE_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn run_records_trace_and_calls_idle_callback() {
    let p = pipeline();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    let hook: TraceHook = Arc::new(move |id: u8, payload: &[u8], timestamp: bool| {
        sink.lock().unwrap().push((id, payload.to_vec(), timestamp));
        Ok(())
    });

    let clock = Arc::new(SimulatedClock::default());
    let mut platform = Platform::builder(Arc::clone(&p.graph))
        .with_config(PlatformConfig::builder().idle_callback(count_idle).build())
        .with_clock(clock)
        .with_trace_hook(hook)
        .build()
        .unwrap();
    platform.schedule_pure(p.source, Tag::ZERO).unwrap();

    let mut handler = |_: &Firing, _: &mut FiringContext| -> Result<(), HandlerError> { Ok(()) };
    assert_eq!(platform.run_until_idle(&mut handler).unwrap(), 1);
    assert_eq!(IDLE_CALLS.load(Ordering::SeqCst), 1);

    let ids: Vec<u8> = captured.lock().unwrap().iter().map(|(id, _, _)| *id).collect();
    assert_eq!(
        ids,
        vec![
            records::queue::INSERT,
            records::safe::SAFE,
            records::queue::TAKE,
            records::safe::BATCH,
            records::sched::NEXT,
            records::sched::IDLE,
            records::sched::COMMIT,
            records::causality::INVALIDATE,
        ]
    );
}
