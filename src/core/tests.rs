//! Scenario tests driving a scripted tool through the controller.
//!
//! Console input understood by [`Script`]:
//! - `browser(..)`: the tool suspends one level deeper and serves it until resumed;
//! - `wait`: blocks until the progress tracker is cancelled;
//! - `fail`: fails with an execution error;
//! - `refused..`: not accepted as console input inside a suspend level;
//! - anything else succeeds immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::{
    CancelOptions, CommandArgs, CommandHandler, Controller, ControllerConfig, ControllerError,
    DebugDetail, Event, EventKind, HotTasksState, Progress, REPORT_STATUS, ResumeCommand,
    SCHEDULE_QUIT, StatusChange, StatusReport, SubmitError, SubmitType, Subscribe, TaskError,
    RunnableRef, TaskEvent, TaskFn, TaskRef, ToolBackend, ToolService, ToolStatus,
};

struct Script {
    alive: AtomicBool,
    fail_start: bool,
    log: Mutex<Vec<String>>,
}

impl Script {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(true),
            fail_start: false,
            log: Mutex::new(Vec::new()),
        })
    }

    fn failing_start() -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(true),
            fail_start: true,
            log: Mutex::new(Vec::new()),
        })
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn saw(&self, input: &str) -> bool {
        self.log.lock().iter().any(|l| l == input)
    }
}

#[async_trait]
impl ToolBackend for Script {
    async fn start(&self, _service: &ToolService, _progress: &Progress) -> Result<(), ControllerError> {
        if self.fail_start {
            return Err(ControllerError::startup("no interpreter found"));
        }
        Ok(())
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn interrupt(&self) -> Result<(), ControllerError> {
        Ok(())
    }

    async fn submit(&self, service: &ToolService, input: &str, progress: &Progress) -> Result<(), TaskError> {
        self.log.lock().push(input.to_string());
        if input.starts_with("browser") {
            service.set_suspended(service.requested_level() + 1, DebugDetail::Breakpoint);
            service.run_suspended_loop().await;
            self.log.lock().push(format!("resumed:{input}"));
            return Ok(());
        }
        match input {
            "wait" => {
                progress.canceled().await;
                Err(TaskError::Canceled)
            }
            "fail" => Err(TaskError::fail("boom")),
            _ => Ok(()),
        }
    }

    async fn quit(&self, _service: &ToolService, _progress: &Progress) -> Result<(), TaskError> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn run_console_command_in_suspend(&self, input: &str) -> bool {
        !input.starts_with("refused")
    }
}

fn quiet_config() -> ControllerConfig {
    ControllerConfig {
        name: "test".into(),
        suspend_update_idle: Duration::ZERO,
        ..ControllerConfig::default()
    }
}

fn controller(backend: &Arc<Script>) -> Controller {
    Controller::builder(Arc::clone(backend) as Arc<dyn ToolBackend>)
        .with_config(quiet_config())
        .build()
}

fn spawn_run(ctl: &Controller) -> JoinHandle<Result<i32, ControllerError>> {
    let ctl = ctl.clone();
    tokio::spawn(async move { ctl.run().await })
}

async fn eventually(cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

async fn wait_status(ctl: &Controller, status: ToolStatus) {
    let reached = tokio::time::timeout(
        Duration::from_secs(5),
        ctl.wait_for_status(|s| s == status),
    )
    .await;
    assert_eq!(reached, Ok(status), "status {status:?} not reached");
}

async fn quit_and_join(ctl: &Controller, run: JoinHandle<Result<i32, ControllerError>>) {
    assert!(ctl.schedule_quit().await);
    assert_eq!(run.await.unwrap(), Ok(0));
    assert_eq!(ctl.status(), ToolStatus::Terminated);
}

type Transitions = Arc<Mutex<Vec<(ToolStatus, ToolStatus)>>>;

fn record_transitions(ctl: &Controller) -> Transitions {
    let seen: Transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    ctl.add_status_listener(Arc::new(move |change: &StatusChange, _: &mut Vec<Event>| {
        if !change.is_same_status() {
            sink.lock().push((change.previous, change.status));
        }
    }));
    seen
}

type Journal = Arc<Mutex<Vec<String>>>;

/// Task appending its label to `journal` when it runs.
fn step(label: &'static str, journal: &Journal) -> TaskRef {
    let journal = Arc::clone(journal);
    Arc::new(TaskFn::new(label, move |_progress: Progress| {
        let journal = Arc::clone(&journal);
        async move {
            journal.lock().push(label.to_string());
            Ok::<(), TaskError>(())
        }
    }))
}

/// Task recording every lifecycle callback it receives.
fn observed(label: &'static str, events: &Arc<Mutex<Vec<TaskEvent>>>) -> TaskRef {
    let events = Arc::clone(events);
    Arc::new(
        TaskFn::new(label, |_progress: Progress| async { Ok::<(), TaskError>(()) }).on_changed(
            move |ev| {
                events.lock().push(ev);
                true
            },
        ),
    )
}

fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

/// Waits for the first event matching `pred`.
async fn next_event(rx: &mut broadcast::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("bus closed"),
            }
        }
    })
    .await;
    found.expect("event not published in time")
}

fn labels(runnables: &[RunnableRef]) -> Vec<String> {
    runnables.iter().map(|r| r.label().to_string()).collect()
}

#[tokio::test]
async fn test_fifo_order_and_status_sequence() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let seen = record_transitions(&ctl);

    for line in ["a <- 1", "b <- 2", "print(a + b)"] {
        ctl.submit_text(line, SubmitType::Console).unwrap();
    }
    assert_eq!(ctl.pending_tasks().len(), 3);

    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(backend.log(), ["a <- 1", "b <- 2", "print(a + b)"]);
    assert_eq!(ctl.task_counter(), 3);

    quit_and_join(&ctl, run).await;
    assert_eq!(
        *seen.lock(),
        vec![
            (ToolStatus::Starting, ToolStatus::StartedProcessing),
            (ToolStatus::StartedProcessing, ToolStatus::StartedIdling),
            (ToolStatus::StartedIdling, ToolStatus::StartedProcessing),
            (ToolStatus::StartedProcessing, ToolStatus::Terminated),
        ]
    );
    assert_eq!(ctl.exit_code(), Some(0));
}

#[tokio::test]
async fn test_task_callbacks_in_order() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let events = Arc::new(Mutex::new(Vec::new()));

    ctl.submit(observed("t1", &events)).unwrap();
    assert_eq!(*events.lock(), [TaskEvent::AddingTo]);

    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(
        *events.lock(),
        [TaskEvent::AddingTo, TaskEvent::Starting, TaskEvent::FinishingOk]
    );
    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_control_lane_runs_before_main_lane() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));

    ctl.submit(step("main-1", &journal)).unwrap();
    ctl.submit(step("main-2", &journal)).unwrap();
    let post = ctl.add_post_controller_runnable(step("post", &journal));
    ctl.schedule_controller_runnable(step("control", &journal));

    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(*journal.lock(), ["control", "main-1", "post", "main-2", "post"]);

    ctl.remove_post_controller_runnable(&post);
    ctl.submit(step("main-3", &journal)).unwrap();
    eventually(|| journal.lock().len() == 6).await;
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(journal.lock().last().map(String::as_str), Some("main-3"));

    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_cancel_current_moves_on_to_next_task() {
    let backend = Script::new();
    let ctl = controller(&backend);
    ctl.submit_text("wait", SubmitType::Console).unwrap();
    ctl.submit_text("after", SubmitType::Console).unwrap();

    let run = spawn_run(&ctl);
    eventually(|| backend.saw("wait")).await;
    assert_eq!(ctl.status(), ToolStatus::StartedProcessing);

    assert!(ctl.cancel_task(CancelOptions::CURRENT));
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(backend.log(), ["wait", "after"]);

    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_cancel_all_drops_pending_and_is_idempotent() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let mut rx = ctl.subscribe();
    for line in ["wait", "x", "y"] {
        ctl.submit_text(line, SubmitType::Console).unwrap();
    }

    let run = spawn_run(&ctl);
    eventually(|| backend.saw("wait")).await;
    assert_eq!(ctl.pending_tasks().len(), 2);

    ctl.cancel_task(CancelOptions::ALL);
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert!(ctl.pending_tasks().is_empty());
    assert_eq!(backend.log(), ["wait"]);

    ctl.cancel_task(CancelOptions::ALL);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ctl.status(), ToolStatus::StartedIdling);
    assert_eq!(backend.log(), ["wait"]);

    let removed = drain_events(&mut rx)
        .into_iter()
        .filter(|e| e.kind == EventKind::TaskRemoved)
        .count();
    assert_eq!(removed, 2);

    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_pause_holds_main_lane() {
    let backend = Script::new();
    let ctl = controller(&backend);
    assert!(ctl.pause(true));
    assert!(!ctl.pause(true));
    ctl.submit_text("a", SubmitType::Console).unwrap();

    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedPaused).await;
    assert!(backend.log().is_empty());
    assert_eq!(ctl.pending_tasks().len(), 1);

    assert!(ctl.pause(false));
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(backend.log(), ["a"]);

    ctl.cancel_task(CancelOptions::PAUSE);
    wait_status(&ctl, ToolStatus::StartedPaused).await;
    assert!(ctl.is_paused());

    // The quit command is a main-lane entry and waits for the resume as well.
    assert!(ctl.pause(false));
    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_failed_task_goes_through_status_gate() {
    struct Reporter(Mutex<Vec<StatusReport>>);

    #[async_trait]
    impl CommandHandler for Reporter {
        async fn execute(
            &self,
            _id: &str,
            _controller: &Controller,
            args: &CommandArgs,
            _progress: &Progress,
        ) -> Result<StatusReport, TaskError> {
            if let CommandArgs::Status(report) = args {
                self.0.lock().push(report.clone());
            }
            Ok(StatusReport::ok())
        }
    }

    let backend = Script::new();
    let reporter = Arc::new(Reporter(Mutex::new(Vec::new())));
    let ctl = Controller::builder(Arc::clone(&backend) as Arc<dyn ToolBackend>)
        .with_config(quiet_config())
        .with_command_handler(REPORT_STATUS, Arc::clone(&reporter) as Arc<dyn CommandHandler>)
        .build();
    ctl.submit_text("fail", SubmitType::Console).unwrap();
    ctl.submit_text("wait", SubmitType::Console).unwrap();
    ctl.submit_text("ok", SubmitType::Console).unwrap();

    let run = spawn_run(&ctl);
    eventually(|| backend.saw("wait")).await;
    ctl.cancel_task(CancelOptions::CURRENT);
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(backend.log(), ["fail", "wait", "ok"]);

    // The cancelled task is finished silently.
    let reports = reporter.0.lock().clone();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].message.contains("boom"));

    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_quit_veto_and_retry() {
    struct Veto {
        veto: AtomicBool,
        seen_quit_tasks: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl CommandHandler for Veto {
        async fn execute(
            &self,
            _id: &str,
            _controller: &Controller,
            args: &CommandArgs,
            _progress: &Progress,
        ) -> Result<StatusReport, TaskError> {
            if let CommandArgs::Tasks(tasks) = args {
                self.seen_quit_tasks.lock().push(tasks.len());
            }
            if self.veto.load(Ordering::SeqCst) {
                Ok(StatusReport::error("unsaved changes"))
            } else {
                Ok(StatusReport::ok())
            }
        }
    }

    let backend = Script::new();
    let veto = Arc::new(Veto {
        veto: AtomicBool::new(true),
        seen_quit_tasks: Mutex::new(Vec::new()),
    });
    let ctl = Controller::builder(Arc::clone(&backend) as Arc<dyn ToolBackend>)
        .with_config(quiet_config())
        .with_command_handler(SCHEDULE_QUIT, Arc::clone(&veto) as Arc<dyn CommandHandler>)
        .build();
    let mut rx = ctl.subscribe();

    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;

    assert!(!ctl.schedule_quit().await);
    let vetoed: Vec<Event> = drain_events(&mut rx)
        .into_iter()
        .filter(|e| e.kind == EventKind::QuitVetoed)
        .collect();
    assert_eq!(vetoed.len(), 1);
    assert_eq!(vetoed[0].reason.as_deref(), Some("unsaved changes"));
    assert_eq!(ctl.status(), ToolStatus::StartedIdling);

    veto.veto.store(false, Ordering::SeqCst);
    ctl.pause(true);
    wait_status(&ctl, ToolStatus::StartedPaused).await;
    assert!(ctl.schedule_quit().await);
    assert!(ctl.schedule_quit().await);
    assert_eq!(*veto.seen_quit_tasks.lock(), [0, 0, 1]);

    ctl.pause(false);
    assert_eq!(run.await.unwrap(), Ok(0));
    assert_eq!(ctl.status(), ToolStatus::Terminated);
}

#[tokio::test]
async fn test_cancel_quit_removes_pending_quit() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let mut rx = ctl.subscribe();

    assert!(ctl.schedule_quit().await);
    assert!(ctl.pending_tasks().iter().all(|r| r.is_quit()));
    ctl.cancel_quit();
    assert!(ctl.pending_tasks().is_empty());
    assert!(
        drain_events(&mut rx)
            .iter()
            .any(|e| e.kind == EventKind::QuitCanceled)
    );
}

#[tokio::test]
async fn test_terminated_is_final() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let events = Arc::new(Mutex::new(Vec::new()));

    assert!(ctl.schedule_quit().await);
    ctl.submit(observed("late", &events)).unwrap();

    assert_eq!(ctl.run().await, Ok(0));
    assert_eq!(ctl.status(), ToolStatus::Terminated);
    assert_eq!(*events.lock(), [TaskEvent::AddingTo, TaskEvent::BeingAbandoned]);

    assert_eq!(
        ctl.submit_text("1", SubmitType::Console).unwrap_err(),
        SubmitError::Closed
    );
    assert!(!ctl.schedule_quit().await);
    assert!(!ctl.pause(true));
    assert_eq!(ctl.run().await, Err(ControllerError::AlreadyStarted));
    assert_eq!(ctl.status(), ToolStatus::Terminated);
}

#[tokio::test]
async fn test_startup_failure_terminates() {
    let backend = Script::failing_start();
    let ctl = controller(&backend);
    let seen = record_transitions(&ctl);
    let events = Arc::new(Mutex::new(Vec::new()));
    ctl.submit(observed("queued", &events)).unwrap();

    let res = ctl.run().await;
    assert!(matches!(res, Err(ControllerError::Startup { .. })));
    assert_eq!(ctl.status(), ToolStatus::Terminated);
    assert_eq!(*seen.lock(), [(ToolStatus::Starting, ToolStatus::Terminated)]);
    assert_eq!(*events.lock(), [TaskEvent::AddingTo, TaskEvent::BeingAbandoned]);
}

#[tokio::test]
async fn test_kill_stops_blocked_tool() {
    let backend = Script::new();
    let ctl = controller(&backend);
    ctl.submit_text("wait", SubmitType::Console).unwrap();

    let run = spawn_run(&ctl);
    eventually(|| backend.saw("wait")).await;
    ctl.kill().await;

    assert_eq!(run.await.unwrap(), Ok(0));
    assert_eq!(ctl.status(), ToolStatus::Terminated);
}

#[tokio::test]
async fn test_nested_suspend_unwinds_lifo() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let seen = record_transitions(&ctl);
    assert!(!ctl.schedule_suspend_exit(ResumeCommand::Resume));

    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;

    ctl.submit_text("browser(1)", SubmitType::Console).unwrap();
    eventually(|| ctl.suspend_level() == 1 && ctl.status() == ToolStatus::StartedSuspended).await;
    assert!(ctl.is_suspended());
    assert_eq!(ctl.suspend_enter_detail(), DebugDetail::Breakpoint);

    // Input while suspended runs inside level 1 and suspends again.
    ctl.submit_text("browser(2)", SubmitType::Console).unwrap();
    eventually(|| ctl.suspend_level() == 2 && ctl.status() == ToolStatus::StartedSuspended).await;
    assert_eq!(labels(&ctl.queue_snapshot()), ["Suspended [2]", "Suspended [1]"]);

    assert!(ctl.schedule_suspend_exit(ResumeCommand::Resume));
    eventually(|| ctl.suspend_level() == 1 && ctl.status() == ToolStatus::StartedSuspended).await;
    assert_eq!(backend.log(), ["browser(1)", "browser(2)", "resumed:browser(2)"]);

    assert!(ctl.schedule_suspend_exit(ResumeCommand::StepOver));
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(
        backend.log(),
        ["browser(1)", "browser(2)", "resumed:browser(2)", "resumed:browser(1)"]
    );
    assert_eq!(ctl.suspend_level(), 0);
    assert!(!ctl.is_suspended());
    assert!(
        seen.lock()
            .contains(&(ToolStatus::StartedProcessing, ToolStatus::StartedSuspended))
    );

    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_cancel_leaves_suspend_level() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;

    ctl.submit_text("browser()", SubmitType::Console).unwrap();
    eventually(|| ctl.status() == ToolStatus::StartedSuspended).await;

    ctl.cancel_task(CancelOptions::CURRENT);
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(backend.log(), ["browser()", "resumed:browser()"]);
    assert!(!ctl.is_suspended());

    quit_and_join(&ctl, run).await;
}

#[tokio::test(start_paused = true)]
async fn test_suspend_updater_runs_when_level_idles() {
    let backend = Script::new();
    let ctl = Controller::builder(Arc::clone(&backend) as Arc<dyn ToolBackend>).build();
    let updates = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&updates);
    ctl.add_suspend_update_runnable(Arc::new(TaskFn::new("refresh frames", move |_p: Progress| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), TaskError>(())
        }
    })));

    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    ctl.submit_text("browser()", SubmitType::Console).unwrap();
    eventually(|| ctl.status() == ToolStatus::StartedSuspended).await;
    assert_eq!(updates.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    assert!(ctl.schedule_suspend_exit(ResumeCommand::Resume));
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_hot_task_keeps_status() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    let seen = record_transitions(&ctl);

    let observed_state = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed_state);
    let observer = ctl.clone();
    ctl.submit_hot(Arc::new(TaskFn::new("ls()", move |_p: Progress| {
        sink.lock().push((
            observer.status(),
            observer.hot_tasks_state(),
            observer.current_submit_type(),
        ));
        async { Ok::<(), TaskError>(()) }
    })))
    .unwrap();

    eventually(|| !observed_state.lock().is_empty()).await;
    eventually(|| ctl.hot_tasks_state() == HotTasksState::Inactive).await;
    assert_eq!(
        *observed_state.lock(),
        [(ToolStatus::StartedIdling, HotTasksState::Active, SubmitType::Other)]
    );
    assert!(seen.lock().is_empty());
    assert_eq!(ctl.status(), ToolStatus::StartedIdling);

    quit_and_join(&ctl, run).await;
}

#[tokio::test(start_paused = true)]
async fn test_on_idle_task_fires_per_idle_period() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    ctl.submit_on_idle(
        Arc::new(TaskFn::new("update", move |_p: Progress| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), TaskError>(())
            }
        })),
        Duration::from_secs(5),
    );

    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(ctl.status(), ToolStatus::StartedIdling);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_listener_event_bag_reaches_bus() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let mut rx = ctl.subscribe();

    ctl.add_status_listener(Arc::new(|_: &StatusChange, _: &mut Vec<Event>| {
        panic!("listener bug");
    }));
    ctl.add_status_listener(Arc::new(|change: &StatusChange, bag: &mut Vec<Event>| {
        if change.status == ToolStatus::StartedIdling {
            bag.push(Event::new(EventKind::Custom).with_reason("console ready"));
        }
    }));

    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;

    let events = drain_events(&mut rx);
    let status_at = events
        .iter()
        .position(|e| e.kind == EventKind::StatusChanged && e.status == Some(ToolStatus::StartedIdling));
    let custom_at = events
        .iter()
        .position(|e| e.kind == EventKind::Custom && e.reason.as_deref() == Some("console ready"));
    assert!(status_at.is_some());
    assert!(custom_at > status_at);

    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_subscribers_see_lifecycle_until_termination() {
    struct Collector(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Collector {
        async fn on_event(&self, event: &Event) {
            self.0.lock().push(event.kind);
        }

        fn name(&self) -> &'static str {
            "collector"
        }
    }

    let backend = Script::new();
    let collector = Arc::new(Collector(Mutex::new(Vec::new())));
    let ctl = Controller::builder(Arc::clone(&backend) as Arc<dyn ToolBackend>)
        .with_config(quiet_config())
        .with_subscribers(vec![Arc::clone(&collector) as Arc<dyn Subscribe>])
        .build();

    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    ctl.submit_text("x", SubmitType::Console).unwrap();
    quit_and_join(&ctl, run).await;

    let kinds = collector.0.lock().clone();
    assert!(kinds.contains(&EventKind::TaskStarting));
    assert!(kinds.contains(&EventKind::QuitScheduled));
    assert_eq!(kinds.last(), Some(&EventKind::ToolTerminated));
}

#[test]
fn test_move_tasks_between_controllers() {
    let from = controller(&Script::new());
    let to = controller(&Script::new());
    let moved_events = Arc::new(Mutex::new(Vec::new()));
    let staying_events = Arc::new(Mutex::new(Vec::new()));

    let moving = from.submit(observed("moving", &moved_events)).unwrap();
    let sink = Arc::clone(&staying_events);
    let staying = from
        .submit(Arc::new(
            TaskFn::new("pinned", |_p: Progress| async { Ok::<(), TaskError>(()) }).on_changed(
                move |ev| {
                    sink.lock().push(ev);
                    ev != TaskEvent::MovingFrom
                },
            ),
        ))
        .unwrap();

    let stamp = to.change_stamp();
    let moved = from.move_tasks_to(&[moving.clone(), staying.clone()], &to);
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].id(), moving.id());
    assert!(to.change_stamp() > stamp);

    assert_eq!(
        from.pending_tasks().iter().map(|r| r.id()).collect::<Vec<_>>(),
        [staying.id()]
    );
    assert_eq!(
        to.pending_tasks().iter().map(|r| r.id()).collect::<Vec<_>>(),
        [moving.id()]
    );
    assert_eq!(
        *moved_events.lock(),
        [TaskEvent::AddingTo, TaskEvent::MovingFrom, TaskEvent::MovingTo]
    );
    assert_eq!(*staying_events.lock(), [TaskEvent::AddingTo, TaskEvent::MovingFrom]);

    assert!(from.move_tasks_to(&[staying], &from).is_empty());
}

#[test]
fn test_submit_lines_respects_cancelled_progress() {
    let ctl = controller(&Script::new());
    let progress = Progress::new("paste");

    let lines = ctl
        .submit_lines(&["x <- 1", "y <- 2"], SubmitType::Editor, Some(&progress))
        .unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|r| r.submit_type() == SubmitType::Editor));

    progress.cancel();
    assert!(matches!(
        ctl.submit_lines(&["z"], SubmitType::Editor, Some(&progress)),
        Err(SubmitError::Canceled)
    ));
    assert_eq!(ctl.pending_tasks().len(), 2);

    let removed = ctl.remove(&lines[..1]);
    assert_eq!(removed.len(), 1);
    assert_eq!(ctl.pending_tasks().len(), 1);
}

#[tokio::test]
async fn test_dropped_schedule_quit_releases_loop() {
    struct Undecided;

    #[async_trait]
    impl CommandHandler for Undecided {
        async fn execute(
            &self,
            _id: &str,
            _controller: &Controller,
            _args: &CommandArgs,
            _progress: &Progress,
        ) -> Result<StatusReport, TaskError> {
            std::future::pending::<()>().await;
            Ok(StatusReport::ok())
        }
    }

    let backend = Script::new();
    let ctl = Controller::builder(Arc::clone(&backend) as Arc<dyn ToolBackend>)
        .with_config(quiet_config())
        .with_command_handler(SCHEDULE_QUIT, Arc::new(Undecided))
        .build();
    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;

    let asked = tokio::time::timeout(Duration::from_millis(20), ctl.schedule_quit()).await;
    assert!(asked.is_err());
    assert!(ctl.pending_tasks().is_empty());

    ctl.submit_text("after", SubmitType::Console).unwrap();
    eventually(|| backend.saw("after")).await;
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(backend.log(), ["after"]);

    ctl.remove_command_handler(SCHEDULE_QUIT);
    quit_and_join(&ctl, run).await;
}

#[test]
fn test_change_stamp_moves_on_silent_changes() {
    let ctl = controller(&Script::new());

    let before = ctl.change_stamp();
    assert!(ctl.pause(true));
    let paused = ctl.change_stamp();
    assert!(paused > before);
    assert!(ctl.pause(false));
    assert!(ctl.change_stamp() > paused);

    let before = ctl.change_stamp();
    let idle = ctl.submit_on_idle(
        TaskFn::arc("update", |_p: Progress| async { Ok::<(), TaskError>(()) }),
        Duration::from_secs(1),
    );
    let added = ctl.change_stamp();
    assert!(added > before);
    ctl.remove_on_idle(&idle);
    assert!(ctl.change_stamp() > added);

    let before = ctl.change_stamp();
    let post = ctl.add_post_controller_runnable(TaskFn::arc("post", |_p: Progress| async {
        Ok::<(), TaskError>(())
    }));
    let registered = ctl.change_stamp();
    assert!(registered > before);
    ctl.remove_post_controller_runnable(&post);
    assert!(ctl.change_stamp() > registered);

    // Lookups leave it alone.
    let stamp = ctl.change_stamp();
    let _ = ctl.pending_tasks();
    let _ = ctl.status();
    assert_eq!(ctl.change_stamp(), stamp);
}

#[tokio::test]
async fn test_console_input_refused_inside_suspend_level() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let mut rx = ctl.subscribe();
    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;

    ctl.request_suspend(1, DebugDetail::Breakpoint);
    eventually(|| ctl.suspend_level() == 1 && ctl.status() == ToolStatus::StartedSuspended).await;
    let submit_type = ctl.current_submit_type();

    let refused = ctl.submit_text("refused()", SubmitType::Editor).unwrap();
    let finished = next_event(&mut rx, |e| {
        e.kind == EventKind::TaskFinished && e.task_id == Some(refused.id())
    })
    .await;
    assert_eq!(finished.outcome, Some(TaskEvent::FinishingCancel));
    assert!(!backend.saw("refused()"));
    assert_eq!(ctl.status(), ToolStatus::StartedSuspended);
    assert_eq!(ctl.current_submit_type(), submit_type);

    // Other input is still served at this level.
    ctl.submit_text("ls()", SubmitType::Console).unwrap();
    eventually(|| backend.saw("ls()")).await;
    eventually(|| ctl.status() == ToolStatus::StartedSuspended).await;
    assert_eq!(ctl.suspend_level(), 1);

    assert!(ctl.schedule_suspend_exit(ResumeCommand::Resume));
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(ctl.suspend_level(), 0);
    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_deeper_request_serves_queued_task_in_nested_level() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;

    ctl.submit_text("browser(1)", SubmitType::Console).unwrap();
    eventually(|| ctl.suspend_level() == 1 && ctl.status() == ToolStatus::StartedSuspended).await;

    // T2 stays queued behind the pause until level 2 was requested.
    assert!(ctl.pause(true));
    let levels = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&levels);
    let observer = ctl.clone();
    ctl.submit(TaskFn::arc("t2", move |_p: Progress| {
        sink.lock().push(observer.suspend_level());
        async { Ok::<(), TaskError>(()) }
    }))
    .unwrap();
    ctl.request_suspend(2, DebugDetail::Breakpoint);
    eventually(|| ctl.suspend_level() == 2).await;
    assert!(levels.lock().is_empty());

    assert!(ctl.pause(false));
    eventually(|| !levels.lock().is_empty()).await;
    assert_eq!(*levels.lock(), [2]);
    eventually(|| ctl.status() == ToolStatus::StartedSuspended).await;

    // Leaving level 2 lands back in level 1, not in T1's caller.
    assert!(ctl.schedule_suspend_exit(ResumeCommand::Resume));
    eventually(|| ctl.suspend_level() == 1 && ctl.status() == ToolStatus::StartedSuspended).await;
    assert!(!backend.saw("resumed:browser(1)"));
    assert_eq!(labels(&ctl.queue_snapshot()), ["Suspended [1]"]);

    assert!(ctl.schedule_suspend_exit(ResumeCommand::Resume));
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert_eq!(backend.log(), ["browser(1)", "resumed:browser(1)"]);
    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_hot_request_deferred_until_started() {
    struct HotAtStart {
        alive: AtomicBool,
        started: AtomicBool,
        /// `(started, is_async)` per hot-mode request.
        requests: Mutex<Vec<(bool, bool)>>,
        seen: Arc<Mutex<Vec<ToolStatus>>>,
    }

    #[async_trait]
    impl ToolBackend for HotAtStart {
        async fn start(&self, service: &ToolService, _progress: &Progress) -> Result<(), ControllerError> {
            let seen = Arc::clone(&self.seen);
            let ctl = service.controller().clone();
            let submitted = service.controller().submit_hot(TaskFn::arc("vars", move |_p: Progress| {
                seen.lock().push(ctl.status());
                async { Ok::<(), TaskError>(()) }
            }));
            if let Err(err) = submitted {
                return Err(ControllerError::startup(err.to_string()));
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn kill(&self) {
            self.alive.store(false, Ordering::SeqCst);
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn submit(&self, _service: &ToolService, _input: &str, _progress: &Progress) -> Result<(), TaskError> {
            Ok(())
        }

        async fn quit(&self, _service: &ToolService, _progress: &Progress) -> Result<(), TaskError> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn request_hot_mode(&self, is_async: bool) {
            self.requests
                .lock()
                .push((self.started.load(Ordering::SeqCst), is_async));
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let backend = Arc::new(HotAtStart {
        alive: AtomicBool::new(true),
        started: AtomicBool::new(false),
        requests: Mutex::new(Vec::new()),
        seen: Arc::clone(&seen),
    });
    let ctl = Controller::builder(Arc::clone(&backend) as Arc<dyn ToolBackend>)
        .with_config(quiet_config())
        .build();

    let run = spawn_run(&ctl);
    eventually(|| !seen.lock().is_empty()).await;
    wait_status(&ctl, ToolStatus::StartedIdling).await;

    assert_eq!(*backend.requests.lock(), [(true, false)]);
    assert_eq!(*seen.lock(), [ToolStatus::StartedIdling]);
    quit_and_join(&ctl, run).await;
}

#[tokio::test]
async fn test_cancel_drops_deeper_request_before_leaving_level() {
    let backend = Script::new();
    let ctl = controller(&backend);
    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;

    ctl.submit_text("browser(1)", SubmitType::Console).unwrap();
    eventually(|| ctl.suspend_level() == 1 && ctl.status() == ToolStatus::StartedSuspended).await;

    // A task at level 1 asks for level 2, then blocks until cancelled.
    let requested = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&requested);
    let asking = ctl.clone();
    ctl.submit(TaskFn::arc("step into", move |progress: Progress| {
        let flag = Arc::clone(&flag);
        let asking = asking.clone();
        async move {
            asking.request_suspend(2, DebugDetail::StepInto);
            flag.store(true, Ordering::SeqCst);
            progress.canceled().await;
            Err::<(), TaskError>(TaskError::Canceled)
        }
    }))
    .unwrap();
    eventually(|| requested.load(Ordering::SeqCst)).await;

    ctl.cancel_task(CancelOptions::CURRENT);
    eventually(|| ctl.status() == ToolStatus::StartedSuspended).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ctl.suspend_level(), 1);
    assert_eq!(ctl.status(), ToolStatus::StartedSuspended);
    assert!(!backend.saw("resumed:browser(1)"));
    assert_eq!(labels(&ctl.queue_snapshot()), ["Suspended [1]"]);

    // A second cancel leaves level 1 itself.
    ctl.cancel_task(CancelOptions::CURRENT);
    wait_status(&ctl, ToolStatus::StartedIdling).await;
    assert!(backend.saw("resumed:browser(1)"));
    quit_and_join(&ctl, run).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_runner_under_concurrent_producers() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 10;

    let backend = Script::new();
    let ctl = controller(&backend);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    let run = spawn_run(&ctl);
    wait_status(&ctl, ToolStatus::StartedIdling).await;

    let mut producers = Vec::new();
    for _ in 0..PRODUCERS {
        let ctl = ctl.clone();
        let (in_flight, peak, done) = (Arc::clone(&in_flight), Arc::clone(&peak), Arc::clone(&done));
        producers.push(tokio::spawn(async move {
            for _ in 0..PER_PRODUCER {
                let (in_flight, peak, done) =
                    (Arc::clone(&in_flight), Arc::clone(&peak), Arc::clone(&done));
                ctl.submit(TaskFn::arc("work", move |progress: Progress| {
                    let (in_flight, peak, done) =
                        (Arc::clone(&in_flight), Arc::clone(&peak), Arc::clone(&done));
                    async move {
                        let running = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(running, Ordering::SeqCst);
                        tokio::select! {
                            _ = progress.canceled() => {}
                            _ = tokio::time::sleep(Duration::from_millis(1)) => {}
                        }
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), TaskError>(())
                    }
                }))
                .unwrap();
                ctl.cancel_task(CancelOptions::CURRENT);
                tokio::task::yield_now().await;
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    eventually(|| done.load(Ordering::SeqCst) == PRODUCERS * PER_PRODUCER).await;
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    quit_and_join(&ctl, run).await;
}
