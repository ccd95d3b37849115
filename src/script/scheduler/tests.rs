use crossbeam::channel::{self, Receiver, Sender};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime;

use super::Scheduler;
use crate::config::ExecutionConfig;
use crate::resource::ResourceKey;
use crate::script::processor::{
    Completion, ContinuationProcessor, ProcessorRegistry, TimerProcessor, TriggerRequest,
};
use crate::script::testing::{FnProgram, RecordingRequest, WAIT, activation, wait_until};
use crate::script::{
    Entry, ResumeError, ResumeOutcome, Resumption, ScriptContext, ScriptEnvironment, ScriptError,
    Step, Trigger, TriggerKind,
};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn scheduler(rt: &Runtime, processors: ProcessorRegistry) -> Scheduler {
    let config = ExecutionConfig {
        workers: 4,
        ..ExecutionConfig::default()
    };
    Scheduler::new(&config, rt.handle().clone(), processors).unwrap()
}

/// Hands every completion to the test.
struct CapturingProcessor {
    kind: TriggerKind,
    sender: Sender<(Trigger, Completion)>,
}

impl CapturingProcessor {
    fn registry(kind: TriggerKind) -> (ProcessorRegistry, Receiver<(Trigger, Completion)>) {
        let (sender, receiver) = channel::unbounded();
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(Self { kind, sender }));
        (registry, receiver)
    }
}

impl ContinuationProcessor for CapturingProcessor {
    fn kind(&self) -> TriggerKind {
        self.kind
    }

    fn perform(&self, request: TriggerRequest, completion: Completion) {
        let _ = self.sender.send((request.trigger, completion));
    }
}

fn environment(name: &str, program: impl crate::script::Program + 'static) -> Arc<ScriptEnvironment> {
    Arc::new(ScriptEnvironment::new(
        ResourceKey::script(name),
        Arc::new(program),
        "",
    ))
}

fn request_context(env: &ScriptEnvironment) -> (Arc<RecordingRequest>, Arc<ScriptContext>) {
    let request = RecordingRequest::new("GET /test");
    let context = ScriptContext::document_request(env.key().clone(), request.clone());
    (request, context)
}

/// Suspends once on an HTTP call, counts how often it was resumed.
fn http_once(resumes: Arc<AtomicUsize>) -> impl crate::script::Program {
    FnProgram(move |_: &Entry| {
        let resumes = Arc::clone(&resumes);
        Some(activation(move |_, input| match input {
            Resumption::Start => Step::Suspend(Trigger::HttpCall(crate::script::HttpCall {
                method: "GET".into(),
                url: "http://example.invalid/".into(),
                body: None,
            })),
            Resumption::Value(value) => {
                resumes.fetch_add(1, Ordering::SeqCst);
                Step::Complete(value)
            }
            Resumption::Failure(err) => Step::Failed(ScriptError::new(err.to_string())),
        }))
    })
}

#[test]
fn test_same_environment_never_interleaves() {
    let rt = runtime();
    let mut processors = ProcessorRegistry::new();
    processors.register(Arc::new(TimerProcessor::new(rt.handle().clone())));
    let scheduler = scheduler(&rt, processors);

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let program = {
        let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
        FnProgram(move |_: &Entry| {
            let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
            Some(activation(move |_, input| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                active.fetch_sub(1, Ordering::SeqCst);
                match input {
                    Resumption::Start => Step::Suspend(Trigger::Timer {
                        delay: Duration::from_millis(1),
                    }),
                    _ => Step::Complete(Value::Null),
                }
            }))
        })
    };
    let env = environment("serial.js", program);

    let submitters: Vec<_> = (0..8)
        .map(|_| {
            let (scheduler, env) = (scheduler.clone(), Arc::clone(&env));
            thread::spawn(move || {
                let context = ScriptContext::internal(env.key().clone(), "test");
                scheduler.submit(env, context, Entry::handler("run", Value::Null));
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    assert!(wait_until(|| scheduler.stats().completed == 8));
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    let stats = scheduler.stats();
    assert_eq!(stats.suspended, 8);
    assert_eq!(stats.resumed, 8);
    assert_eq!(stats.pending, 0);
}

#[test]
fn test_token_resumes_exactly_once() {
    let rt = runtime();
    let (processors, completions) = CapturingProcessor::registry(TriggerKind::HttpCall);
    let scheduler = scheduler(&rt, processors);
    let resumes = Arc::new(AtomicUsize::new(0));
    let env = environment("once.js", http_once(Arc::clone(&resumes)));

    let context = ScriptContext::internal(env.key().clone(), "test");
    scheduler.submit(Arc::clone(&env), context, Entry::handler("run", Value::Null));

    let (_, completion) = completions.recv_timeout(WAIT).unwrap();
    let token = completion.token();
    assert_eq!(scheduler.outstanding(), 1);
    assert_eq!(completion.complete(Ok(json!(1))), Ok(ResumeOutcome::Resumed));
    assert!(wait_until(|| scheduler.stats().completed == 1));

    assert_eq!(
        scheduler.resume(token, Ok(json!(2))),
        Err(ResumeError::AlreadyConsumed(token))
    );
    thread::sleep(Duration::from_millis(50));
    assert_eq!(resumes.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.stats().resumed, 1);
}

#[test]
fn test_result_for_invalidated_environment_is_discarded() {
    let rt = runtime();
    let (processors, completions) = CapturingProcessor::registry(TriggerKind::HttpCall);
    let scheduler = scheduler(&rt, processors);
    let resumes = Arc::new(AtomicUsize::new(0));
    let env = environment("gone.js", http_once(Arc::clone(&resumes)));

    let context = ScriptContext::internal(env.key().clone(), "test");
    scheduler.submit(Arc::clone(&env), context, Entry::handler("run", Value::Null));
    let (_, completion) = completions.recv_timeout(WAIT).unwrap();

    scheduler.environment_invalidated(&env);
    assert!(!env.is_alive());
    assert_eq!(scheduler.outstanding(), 0);
    assert_eq!(scheduler.stats().stale, 1);

    assert_eq!(completion.complete(Ok(json!("late"))), Ok(ResumeOutcome::Discarded));
    assert_eq!(scheduler.stats().stale, 0);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(resumes.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.stats().discarded, 1);
}

#[test]
fn test_results_after_shutdown_are_discarded() {
    let rt = runtime();
    let (processors, completions) = CapturingProcessor::registry(TriggerKind::HttpCall);
    let scheduler = scheduler(&rt, processors);
    let resumes = Arc::new(AtomicUsize::new(0));
    let env = environment("late.js", http_once(Arc::clone(&resumes)));

    for _ in 0..2 {
        let context = ScriptContext::internal(env.key().clone(), "test");
        scheduler.submit(Arc::clone(&env), context, Entry::handler("run", Value::Null));
    }
    let (_, first) = completions.recv_timeout(WAIT).unwrap();
    let (_, second) = completions.recv_timeout(WAIT).unwrap();

    scheduler.shutdown();
    assert_eq!(scheduler.outstanding(), 0);

    assert_eq!(first.complete(Ok(json!("late"))), Ok(ResumeOutcome::Discarded));
    drop(second);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(resumes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_dropped_completion_fails_the_request() {
    let rt = runtime();
    let (processors, completions) = CapturingProcessor::registry(TriggerKind::HttpCall);
    let scheduler = scheduler(&rt, processors);
    let env = environment("drop.js", http_once(Arc::new(AtomicUsize::new(0))));

    let (request, context) = request_context(&env);
    scheduler.submit(Arc::clone(&env), context, Entry::handler("ready", Value::Null));
    let (_, completion) = completions.recv_timeout(WAIT).unwrap();
    drop(completion);

    let err = request.wait().unwrap_err();
    assert!(err.contains("without a result"), "{err}");
}

#[test]
fn test_missing_processor_resumes_with_failure() {
    let rt = runtime();
    let scheduler = scheduler(&rt, ProcessorRegistry::new());
    let env = environment("none.js", http_once(Arc::new(AtomicUsize::new(0))));

    let (request, context) = request_context(&env);
    scheduler.submit(env, context, Entry::handler("ready", Value::Null));

    let err = request.wait().unwrap_err();
    assert!(err.contains("no processor"), "{err}");
}

#[test]
fn test_handlers_wait_for_suspended_initialization() {
    let rt = runtime();
    let mut processors = ProcessorRegistry::new();
    processors.register(Arc::new(TimerProcessor::new(rt.handle().clone())));
    let scheduler = scheduler(&rt, processors);

    let inits = Arc::new(AtomicUsize::new(0));
    let program = {
        let inits = Arc::clone(&inits);
        FnProgram(move |entry: &Entry| {
            let inits = Arc::clone(&inits);
            let is_init = entry.is_init();
            Some(activation(move |scope, input| match (is_init, input) {
                (true, Resumption::Start) => Step::Suspend(Trigger::Timer {
                    delay: Duration::from_millis(30),
                }),
                (true, _) => {
                    inits.fetch_add(1, Ordering::SeqCst);
                    scope.set_global("greeting", json!("hello"));
                    Step::Complete(Value::Null)
                }
                (false, _) => {
                    let greeting = scope.global("greeting").cloned().unwrap_or_default();
                    scope.emit(greeting.as_str().unwrap_or("missing"));
                    Step::Complete(Value::Null)
                }
            }))
        })
    };
    let env = environment("init.js", program);

    let requests: Vec<_> = (0..3)
        .map(|_| {
            let (request, context) = request_context(&env);
            scheduler.start(Arc::clone(&env), context, Entry::handler("ready", Value::Null));
            request
        })
        .collect();

    for request in requests {
        assert_eq!(request.wait(), Ok("hello".to_string()));
    }
    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert!(env.is_initialized());
}

#[test]
fn test_failed_initialization_reaches_every_request() {
    let rt = runtime();
    let scheduler = scheduler(&rt, ProcessorRegistry::new());
    let program = FnProgram(|entry: &Entry| {
        let is_init = entry.is_init();
        Some(activation(move |_, _| {
            if is_init {
                Step::Failed(ScriptError::at(4, "boom"))
            } else {
                Step::Complete(Value::Null)
            }
        }))
    });
    let env = environment("broken.js", program);

    let requests: Vec<_> = (0..2)
        .map(|_| {
            let (request, context) = request_context(&env);
            scheduler.start(Arc::clone(&env), context, Entry::handler("ready", Value::Null));
            request
        })
        .collect();

    for request in requests {
        let err = request.wait().unwrap_err();
        assert!(err.contains("line 4: boom"), "{err}");
    }
    assert_eq!(scheduler.stats().failed, 1);
}

#[test]
fn test_panicking_step_fails_the_request() {
    let rt = runtime();
    let scheduler = scheduler(&rt, ProcessorRegistry::new());
    let program = FnProgram(|_: &Entry| Some(activation(|_, _| panic!("evaluator bug"))));
    let env = environment("panic.js", program);

    let (request, context) = request_context(&env);
    scheduler.submit(Arc::clone(&env), context, Entry::handler("ready", Value::Null));

    let err = request.wait().unwrap_err();
    assert!(err.contains("panicked"), "{err}");

    let (request, context) = request_context(&env);
    scheduler.submit(env, context, Entry::handler("ready", Value::Null));
    assert!(request.wait().is_err());
}

#[test]
fn test_invalidation_cancels_timers() {
    let rt = runtime();
    let scheduler = scheduler(&rt, ProcessorRegistry::new());

    let ticks = Arc::new(AtomicUsize::new(0));
    let program = {
        let ticks = Arc::clone(&ticks);
        FnProgram(move |entry: &Entry| {
            let ticks = Arc::clone(&ticks);
            let is_init = entry.is_init();
            Some(activation(move |scope, _| {
                if is_init {
                    scope.schedule(Duration::from_millis(10), "tick", true);
                } else {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
                Step::Complete(Value::Null)
            }))
        })
    };
    let env = environment("ticker.js", program);

    let context = ScriptContext::internal(env.key().clone(), "boot");
    scheduler.start(Arc::clone(&env), context, Entry::Init);
    assert!(wait_until(|| ticks.load(Ordering::SeqCst) >= 2));
    assert_eq!(scheduler.armed_timers(env.id()), 1);

    scheduler.environment_invalidated(&env);
    assert_eq!(scheduler.armed_timers(env.id()), 0);

    thread::sleep(Duration::from_millis(30));
    let settled = ticks.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(ticks.load(Ordering::SeqCst), settled);
}
