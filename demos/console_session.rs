//! # Console session example
//!
//! Drives a fake interpreter through the controller:
//! - console lines run in submission order
//! - a variable viewer refreshes through the hot lane while the console is busy
//! - `browser()` suspends the tool; a step command resumes it
//! - the first quit is vetoed by a "save workspace?" handler, the second goes through
//!
//! ## Run
//! ```bash
//! RUST_LOG=toolvisor=debug cargo run --example console_session
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use toolvisor::{
    CommandArgs, CommandHandler, Controller, ControllerConfig, ControllerError, DebugDetail,
    Event, LogWriter, Progress, ResumeCommand, SCHEDULE_QUIT, StatusChange, StatusReport,
    SubmitType, Subscribe, TaskError, TaskFn, ToolBackend, ToolService, ToolStatus,
};

/// Interpreter stand-in: every line takes a little while, `browser()` suspends.
struct FakeInterpreter {
    alive: AtomicBool,
}

#[async_trait]
impl ToolBackend for FakeInterpreter {
    async fn start(&self, _service: &ToolService, progress: &Progress) -> Result<(), ControllerError> {
        progress.set_sub_task("loading workspace");
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn interrupt(&self) -> Result<(), ControllerError> {
        println!("  ^C");
        Ok(())
    }

    async fn before_submit(&self, _service: &ToolService, input: &str) -> Result<(), TaskError> {
        println!("> {input}");
        Ok(())
    }

    async fn submit(&self, service: &ToolService, input: &str, progress: &Progress) -> Result<(), TaskError> {
        if input.trim() == "browser()" {
            service.set_suspended(service.requested_level() + 1, DebugDetail::Breakpoint);
            service.run_suspended_loop().await;
            return Ok(());
        }
        tokio::select! {
            _ = progress.canceled() => Err(TaskError::Canceled),
            _ = tokio::time::sleep(Duration::from_millis(150)) => Ok(()),
        }
    }

    async fn exec_resume(
        &self,
        _service: &ToolService,
        command: ResumeCommand,
        _progress: &Progress,
    ) -> Result<(), TaskError> {
        println!("  [{}]", command.label());
        Ok(())
    }

    async fn quit(&self, _service: &ToolService, _progress: &Progress) -> Result<(), TaskError> {
        println!("> q()");
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Vetoes the first quit request.
struct SaveWorkspacePrompt {
    asked: AtomicBool,
}

#[async_trait]
impl CommandHandler for SaveWorkspacePrompt {
    async fn execute(
        &self,
        _id: &str,
        _controller: &Controller,
        _args: &CommandArgs,
        _progress: &Progress,
    ) -> Result<StatusReport, TaskError> {
        if self.asked.swap(true, Ordering::SeqCst) {
            Ok(StatusReport::ok())
        } else {
            Ok(StatusReport::error("workspace has unsaved changes"))
        }
    }
}

fn print_status(change: &StatusChange, _events: &mut Vec<Event>) {
    let task = change.runnable.as_ref().map(|r| r.label().to_string());
    println!(
        "  status: {} -> {} (level {}, task {})",
        change.previous.as_label(),
        change.status.as_label(),
        change.level,
        task.as_deref().unwrap_or("-"),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cfg = ControllerConfig {
        name: "R".into(),
        ..ControllerConfig::default()
    };
    let backend = Arc::new(FakeInterpreter {
        alive: AtomicBool::new(true),
    });
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let controller = Controller::builder(backend)
        .with_config(cfg)
        .with_subscribers(subs)
        .with_status_listener(Arc::new(print_status))
        .with_command_handler(
            SCHEDULE_QUIT,
            Arc::new(SaveWorkspacePrompt {
                asked: AtomicBool::new(false),
            }),
        )
        .build();

    let runner = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };

    controller.submit_lines(
        &["x <- rnorm(100)", "summary(x)", "plot(x)"],
        SubmitType::Console,
        None,
    )?;
    controller.submit_hot(TaskFn::arc("refresh variables", |_p: Progress| async {
        println!("  (variables refreshed)");
        Ok::<(), TaskError>(())
    }))?;

    controller
        .wait_for_status(|s| s == ToolStatus::StartedIdling)
        .await;

    controller.submit_text("browser()", SubmitType::Console)?;
    controller
        .wait_for_status(|s| s == ToolStatus::StartedSuspended)
        .await;
    controller.submit_text("ls()", SubmitType::Console)?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    controller.schedule_suspend_exit(ResumeCommand::StepOver);
    controller
        .wait_for_status(|s| s == ToolStatus::StartedIdling)
        .await;

    if !controller.schedule_quit().await {
        println!("  quit vetoed, asking again");
    }
    controller.schedule_quit().await;

    let code = runner.await??;
    println!("tool exited with code {code}");
    Ok(())
}
