//! Ordered stage lists and the pipelines built from them.

use std::sync::Arc;

use async_trait::async_trait;

use super::{BoxService, Next, Service, Stage};
use crate::core::RequestContext;

/// An ordered, append-only list of stages.
///
/// Cloning is cheap and copy-on-extend: a route group clones its parent's
/// queue and appends to the copy, leaving the parent untouched.
#[derive(Clone, Default)]
pub struct StageQueue {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage.
    pub fn use_stage<S: Stage + 'static>(&mut self, stage: S) -> &mut Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a shared stage.
    pub fn use_arc(&mut self, stage: Arc<dyn Stage>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Builder-style append.
    pub fn with<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.use_stage(stage);
        self
    }

    /// A new queue holding this queue's stages followed by `other`'s.
    pub fn concat(&self, other: &StageQueue) -> StageQueue {
        let mut stages = Vec::with_capacity(self.len() + other.len());
        stages.extend(self.stages.iter().cloned());
        stages.extend(other.stages.iter().cloned());
        StageQueue { stages }
    }

    /// Get the number of stages in the queue.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Get stage names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Wrap `endpoint` with every stage, the first registered outermost.
    pub fn apply(&self, endpoint: BoxService) -> Pipeline {
        Pipeline {
            stages: Arc::from(self.stages.clone()),
            endpoint,
        }
    }
}

/// A stage queue bound to its endpoint. Itself a [`Service`].
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Stage>]>,
    endpoint: BoxService,
}

impl Pipeline {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[async_trait]
impl Service for Pipeline {
    async fn call(&self, ctx: Arc<RequestContext>) {
        Next::new(Arc::clone(&self.stages), Arc::clone(&self.endpoint))
            .run(ctx)
            .await
    }
}
