//! Task handler trait and registry.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

/// Handles execution of one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task type this handler services.
    fn task_type(&self) -> &str;

    /// Executes the task.
    ///
    /// # Arguments
    ///
    /// * `payload` - The task's opaque payload
    ///
    /// # Returns
    ///
    /// The result value on success, or an error description on failure.
    /// Failures feed the task's retry policy; they are expected outcomes,
    /// not panics.
    async fn handle(&self, payload: Value) -> Result<Value, String>;
}

/// Registry of task handlers, keyed by task type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous handler for the same
    /// task type.
    pub fn register(&mut self, handler: Box<dyn TaskHandler>) {
        self.handlers
            .insert(handler.task_type().to_string(), handler);
    }

    /// Looks up the handler for a task type.
    #[must_use]
    pub fn get(&self, task_type: &str) -> Option<&dyn TaskHandler> {
        self.handlers.get(task_type).map(|h| &**h)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// The capability tags implied by the registered handlers (one per task
    /// type), convenient for building a [`WorkerDescriptor`].
    ///
    /// [`WorkerDescriptor`]: crate::models::WorkerDescriptor
    #[must_use]
    pub fn task_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}
