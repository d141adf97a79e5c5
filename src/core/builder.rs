use std::collections::HashMap;
use std::sync::Arc;

use crate::core::handlers::CommandHandler;
use crate::core::tool::ToolBackend;
use crate::core::{Controller, ControllerConfig, StatusListener};
use crate::policies::{DefaultResumePolicy, ResumeDetailPolicy};
use crate::subscribers::Subscribe;

/// Builder for constructing a [`Controller`] with optional features.
pub struct ControllerBuilder {
    cfg: ControllerConfig,
    backend: Arc<dyn ToolBackend>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    listeners: Vec<Arc<dyn StatusListener>>,
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
    resume_policy: Option<Arc<dyn ResumeDetailPolicy>>,
}

impl ControllerBuilder {
    /// Creates a new builder around the tool backend, with the default configuration.
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self {
            cfg: ControllerConfig::default(),
            backend,
            subscribers: Vec::new(),
            listeners: Vec::new(),
            handlers: HashMap::new(),
            resume_policy: None,
        }
    }

    pub fn with_config(mut self, cfg: ControllerConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive controller events (queue deltas, status changes, quit
    /// vetoes, ...) through dedicated workers with bounded queues, once
    /// [`Controller::run`] started.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds a status listener; listeners are called in registration order.
    pub fn with_status_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Registers a command handler for `id`, replacing a previous one.
    pub fn with_command_handler(mut self, id: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.insert(id.into(), handler);
        self
    }

    /// Replaces [`DefaultResumePolicy`], which decides the debug detail of resumed tasks.
    pub fn with_resume_policy(mut self, policy: Arc<dyn ResumeDetailPolicy>) -> Self {
        self.resume_policy = Some(policy);
        self
    }

    /// Builds the controller. Nothing runs until [`Controller::run`] is awaited.
    pub fn build(self) -> Controller {
        let policy = self
            .resume_policy
            .unwrap_or_else(|| Arc::new(DefaultResumePolicy));
        Controller::new_internal(
            self.cfg,
            self.backend,
            self.subscribers,
            self.listeners,
            self.handlers,
            policy,
        )
    }
}
