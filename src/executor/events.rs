//! Typed executor event stream.
//!
//! A single-threaded pub/sub: subscribers run synchronously inside `emit`,
//! in registration order, with wildcard subscribers after the typed ones.
//! Events are informational: nothing the engine does depends on a
//! subscriber, and subscribers only ever see a shared reference.

use serde::Serialize;
use uuid::Uuid;

use crate::model::Dimension;

use super::types::{ExecutionPlan, ExecutionResults};

/// Everything the executor announces over a run, in emission order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ExecutorEvent {
    #[serde(rename = "executor.started")]
    Started {
        evaluation_id: Uuid,
        plan: ExecutionPlan,
    },
    #[serde(rename = "executor.warmup.progress")]
    WarmupProgress { current: usize, total: usize },
    #[serde(rename = "executor.test.started")]
    TestStarted {
        item_id: String,
        dimension: Dimension,
    },
    #[serde(rename = "executor.test.completed")]
    TestCompleted {
        item_id: String,
        passed: bool,
        theta: f64,
        se: f64,
        dimension: Dimension,
    },
    #[serde(rename = "executor.irt.updated")]
    IrtUpdated {
        dimension: Dimension,
        theta: f64,
        se: f64,
        n_tests: usize,
    },
    #[serde(rename = "executor.dimension.converged")]
    DimensionConverged {
        dimension: Dimension,
        theta: f64,
        se: f64,
        reason: String,
    },
    #[serde(rename = "executor.completed")]
    Completed { results: ExecutionResults },
}

impl ExecutorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ExecutorEvent::Started { .. } => EventKind::Started,
            ExecutorEvent::WarmupProgress { .. } => EventKind::WarmupProgress,
            ExecutorEvent::TestStarted { .. } => EventKind::TestStarted,
            ExecutorEvent::TestCompleted { .. } => EventKind::TestCompleted,
            ExecutorEvent::IrtUpdated { .. } => EventKind::IrtUpdated,
            ExecutorEvent::DimensionConverged { .. } => EventKind::DimensionConverged,
            ExecutorEvent::Completed { .. } => EventKind::Completed,
        }
    }
}

/// Discriminant used for typed subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Started,
    WarmupProgress,
    TestStarted,
    TestCompleted,
    IrtUpdated,
    DimensionConverged,
    Completed,
}

type EventHandler = Box<dyn Fn(&ExecutorEvent) + Send>;

/// Synchronous, single-threaded event dispatcher.
#[derive(Default)]
pub struct EventBus {
    typed: Vec<(EventKind, EventHandler)>,
    wildcard: Vec<EventHandler>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event kind. Handlers fire in registration order.
    pub fn subscribe(
        &mut self,
        kind: EventKind,
        handler: impl Fn(&ExecutorEvent) + Send + 'static,
    ) {
        self.typed.push((kind, Box::new(handler)));
    }

    /// Subscribe to every event. Wildcard handlers fire after the typed
    /// handlers for each event.
    pub fn subscribe_all(&mut self, handler: impl Fn(&ExecutorEvent) + Send + 'static) {
        self.wildcard.push(Box::new(handler));
    }

    pub fn emit(&self, event: &ExecutorEvent) {
        let kind = event.kind();
        for (subscribed, handler) in &self.typed {
            if *subscribed == kind {
                handler(event);
            }
        }
        for handler in &self.wildcard {
            handler(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("typed", &self.typed.len())
            .field("wildcard", &self.wildcard.len())
            .finish()
    }
}
