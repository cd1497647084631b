// src/hooks/mod.rs — Hook pipeline
//
// Event-keyed, priority-ordered interceptors. A chain runs sequentially over
// one payload: each hook may keep it, replace it, or abort the chain. Hook
// errors are absorbed (logged, chain continues with the last good payload);
// only an explicit abort reaches the caller.

pub mod compression;
pub mod context;
pub mod validation;

use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::infra::config::{ContextConfig, HooksConfig};
use crate::infra::errors::DelveError;

/// Lifecycle points where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Before a tool call. Payload: `{"tool": name, "arguments": {...}}`.
    PreTool,
    /// After a search tool returns. Payload: raw tool output.
    PostSearch,
    /// Before context is handed to a model. Payload: array of entries.
    PreMessage,
    /// After context was assembled. Payload: array of entries.
    PostMessage,
}

impl HookEvent {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PreTool => "pre_tool",
            Self::PostSearch => "post_search",
            Self::PreMessage => "pre_message",
            Self::PostMessage => "post_message",
        }
    }

    pub fn all() -> &'static [HookEvent] {
        &[
            HookEvent::PreTool,
            HookEvent::PostSearch,
            HookEvent::PreMessage,
            HookEvent::PostMessage,
        ]
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a hook decided.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Keep going. `Some` replaces the payload for the next hook; `None` leaves it as is.
    Continue(Option<Value>),
    /// Stop the chain and reject the action.
    Abort(String),
}

impl HookOutcome {
    pub fn keep() -> Self {
        Self::Continue(None)
    }

    pub fn replace(payload: Value) -> Self {
        Self::Continue(Some(payload))
    }
}

/// Raised by `execute` when a hook aborts the chain.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Hook '{hook}' rejected {event}: {reason}")]
pub struct HookAbort {
    pub hook: String,
    pub event: HookEvent,
    pub reason: String,
}

impl From<HookAbort> for DelveError {
    fn from(abort: HookAbort) -> Self {
        DelveError::Validation(abort.to_string())
    }
}

/// Per-execution context. Hooks may read the tool name and leave notes
/// (statistics, counters) for the caller.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub event: HookEvent,
    pub tool: Option<String>,
    pub values: Map<String, Value>,
}

impl HookContext {
    pub fn new(event: HookEvent) -> Self {
        Self {
            event,
            tool: None,
            values: Map::new(),
        }
    }

    pub fn for_tool(event: HookEvent, tool: &str) -> Self {
        Self {
            tool: Some(tool.to_string()),
            ..Self::new(event)
        }
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// An interceptor. Returning `Err` is absorbed by the pipeline.
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
    fn call(&self, payload: &Value, ctx: &mut HookContext) -> Result<HookOutcome, DelveError>;
}

/// Adapter so closures can be registered directly.
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&Value, &mut HookContext) -> Result<HookOutcome, DelveError> + Send + Sync,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
        }
    }
}

impl<F> Hook for FnHook<F>
where
    F: Fn(&Value, &mut HookContext) -> Result<HookOutcome, DelveError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, payload: &Value, ctx: &mut HookContext) -> Result<HookOutcome, DelveError> {
        (self.f)(payload, ctx)
    }
}

#[derive(Clone)]
struct HookRegistration {
    event: HookEvent,
    priority: i32,
    order: u64,
    hook: Arc<dyn Hook>,
}

#[derive(Default)]
struct Registry {
    entries: Vec<HookRegistration>,
    next_order: u64,
}

// ---------------------------------------------------------------------------
// HookPipeline
// ---------------------------------------------------------------------------

/// The hook registry and chain runner. Shared by reference across tasks.
#[derive(Default)]
pub struct HookPipeline {
    registry: RwLock<Registry>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with the standard chains for every event.
    pub fn standard(hooks: &HooksConfig, context: &ContextConfig) -> Self {
        let pipeline = Self::new();
        validation::register(&pipeline, hooks);
        compression::register(&pipeline, hooks);
        context::register(&pipeline, context);
        pipeline
    }

    /// Register a hook. Higher priority runs first; equal priorities run in
    /// registration order.
    pub fn register(&self, event: HookEvent, hook: Arc<dyn Hook>, priority: i32) {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let order = registry.next_order;
        registry.next_order += 1;
        tracing::debug!(event = %event, hook = hook.name(), priority, "Registered hook");
        registry.entries.push(HookRegistration {
            event,
            priority,
            order,
            hook,
        });
    }

    pub fn register_fn<F>(&self, event: HookEvent, name: &str, priority: i32, f: F)
    where
        F: Fn(&Value, &mut HookContext) -> Result<HookOutcome, DelveError> + Send + Sync + 'static,
    {
        self.register(event, Arc::new(FnHook::new(name, f)), priority);
    }

    /// Remove every registration of the named hook. Returns how many were removed.
    pub fn unregister(&self, name: &str) -> usize {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let before = registry.entries.len();
        registry.entries.retain(|r| r.hook.name() != name);
        before - registry.entries.len()
    }

    /// Hook names for an event, in execution order.
    pub fn list(&self, event: HookEvent) -> Vec<(String, i32)> {
        self.chain(event)
            .iter()
            .map(|r| (r.hook.name().to_string(), r.priority))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the chain for `event`, sorted. Runs without holding the lock.
    fn chain(&self, event: HookEvent) -> Vec<HookRegistration> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        let mut chain: Vec<_> = registry
            .entries
            .iter()
            .filter(|r| r.event == event)
            .cloned()
            .collect();
        chain.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
        chain
    }

    /// Run the chain for `event` over `payload`.
    ///
    /// Returns the final payload, or the abort that stopped the chain. With no
    /// hooks registered this is the identity.
    pub fn execute(
        &self,
        event: HookEvent,
        payload: Value,
        ctx: &mut HookContext,
    ) -> Result<Value, HookAbort> {
        let mut current = payload;

        for reg in self.chain(event) {
            match reg.hook.call(&current, ctx) {
                Ok(HookOutcome::Continue(Some(next))) => current = next,
                Ok(HookOutcome::Continue(None)) => {}
                Ok(HookOutcome::Abort(reason)) => {
                    tracing::info!(
                        event = %event,
                        hook = reg.hook.name(),
                        reason = %reason,
                        "Hook aborted chain"
                    );
                    return Err(HookAbort {
                        hook: reg.hook.name().to_string(),
                        event,
                        reason,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        event = %event,
                        hook = reg.hook.name(),
                        "Hook failed, continuing with previous payload: {}",
                        e
                    );
                }
            }
        }

        Ok(current)
    }
}
