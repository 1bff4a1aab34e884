//! Agent registry
//!
//! The registry is the adapter the orchestration layer talks to: it holds every
//! configured backend, routes invocations by id, and fans normalized events out
//! to observers registered on this instance.

use crate::backend::{AgentBackend, AgentReply, EventSink};
use crate::error::{Error, Result};
use crate::events::AgentEvent;
use crate::parser::Vendor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Summary of a registered agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Lower-case id
    pub id: String,
    /// Display name
    pub name: String,
    /// Vendor, for process-backed agents
    pub vendor: Option<Vendor>,
}

/// Options for a single invocation
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Forward events to observers while running
    pub streaming: bool,
    /// Cancellation signal
    pub cancel: CancellationToken,
}

impl InvokeOptions {
    /// Non-streaming invocation bound to `cancel`
    pub fn silent(cancel: CancellationToken) -> Self {
        Self {
            streaming: false,
            cancel,
        }
    }

    /// Streaming invocation bound to `cancel`
    pub fn streaming(cancel: CancellationToken) -> Self {
        Self {
            streaming: true,
            cancel,
        }
    }
}

/// Conversation-facing view of a set of agents
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Id of the orchestrating agent
    fn main_agent_id(&self) -> &str;

    /// Send user input to the main agent, streaming its events
    async fn send(&self, input: &str, cancel: &CancellationToken) -> Result<AgentReply> {
        let main = self.main_agent_id().to_string();
        self.invoke_agent(&main, input, InvokeOptions::streaming(cancel.clone()))
            .await
    }

    /// Invoke a specific agent
    async fn invoke_agent(
        &self,
        agent_id: &str,
        prompt: &str,
        options: InvokeOptions,
    ) -> Result<AgentReply>;

    /// All registered agents
    fn list_agents(&self) -> Vec<AgentDescriptor>;

    /// Whether `agent_id` is registered and usable
    fn has_agent(&self, agent_id: &str) -> bool;
}

/// Observer callback: `(agent_id, event)`
pub type EventHandler = Arc<dyn Fn(&str, &AgentEvent) + Send + Sync>;

#[derive(Default)]
struct Observers {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(u64, EventHandler)>>,
}

impl Observers {
    fn add(&self, handler: EventHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, handler));
        id
    }

    fn remove(&self, id: u64) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(h, _)| *h != id);
    }

    fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl EventSink for Observers {
    fn emit(&self, agent_id: &str, event: &AgentEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(agent_id, event);
        }
    }
}

/// Handle returned by [`AgentRegistry::on_event`]; unsubscribes on drop
#[must_use = "dropping the subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    observers: Weak<Observers>,
}

impl Subscription {
    /// Unsubscribe now
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.remove(self.id);
        }
    }
}

/// Registry of invocable agents
pub struct AgentRegistry {
    main_agent_id: String,
    agents: HashMap<String, Arc<dyn AgentBackend>>,
    order: Vec<String>,
    unavailable: RwLock<HashSet<String>>,
    observers: Arc<Observers>,
}

impl AgentRegistry {
    /// Create an empty registry; `main_agent_id` must be registered before use
    pub fn new(main_agent_id: impl Into<String>) -> Self {
        Self {
            main_agent_id: main_agent_id.into().to_lowercase(),
            agents: HashMap::new(),
            order: Vec::new(),
            unavailable: RwLock::new(HashSet::new()),
            observers: Arc::new(Observers::default()),
        }
    }

    /// Register a backend under its own id (replacing any previous one)
    pub fn register(&mut self, backend: Arc<dyn AgentBackend>) {
        let id = backend.id().to_lowercase();
        if self.agents.insert(id.clone(), backend).is_none() {
            self.order.push(id.clone());
        }
        debug!(agent_id = %id, "Registered agent");
    }

    /// Builder-style [`register`](Self::register)
    #[must_use]
    pub fn with_agent(mut self, backend: Arc<dyn AgentBackend>) -> Self {
        self.register(backend);
        self
    }

    /// Look up a backend
    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn AgentBackend>> {
        self.agents.get(&agent_id.to_lowercase()).cloned()
    }

    /// Check every backend and mark the ones that cannot run
    pub async fn probe_availability(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for id in &self.order {
            if let Some(backend) = self.agents.get(id) {
                if !backend.is_available().await {
                    warn!(agent_id = %id, "Agent backend unavailable");
                    missing.push(id.clone());
                }
            }
        }
        let mut unavailable = self.unavailable.write().unwrap_or_else(|e| e.into_inner());
        unavailable.clear();
        unavailable.extend(missing.iter().cloned());
        missing
    }

    /// Subscribe to events from every agent in this registry
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&str, &AgentEvent) + Send + Sync + 'static,
    {
        let id = self.observers.add(Arc::new(handler));
        Subscription {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Number of live subscriptions
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn is_unavailable(&self, id: &str) -> bool {
        self.unavailable
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }
}

#[async_trait]
impl AgentSession for AgentRegistry {
    fn main_agent_id(&self) -> &str {
        &self.main_agent_id
    }

    async fn invoke_agent(
        &self,
        agent_id: &str,
        prompt: &str,
        options: InvokeOptions,
    ) -> Result<AgentReply> {
        let id = agent_id.to_lowercase();
        let backend = self
            .agents
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::AgentNotFound(id.clone()))?;
        if self.is_unavailable(&id) {
            return Err(Error::Unavailable {
                agent_id: id,
                reason: "backend executable not found".to_string(),
            });
        }

        info!(agent_id = %id, streaming = options.streaming, "Invoking agent");
        let sink: Option<&dyn EventSink> = if options.streaming {
            Some(self.observers.as_ref())
        } else {
            None
        };
        backend.invoke(prompt, sink, &options.cancel).await
    }

    fn list_agents(&self) -> Vec<AgentDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.agents.get(id))
            .map(|b| AgentDescriptor {
                id: b.id().to_lowercase(),
                name: b.name().to_string(),
                vendor: b.vendor(),
            })
            .collect()
    }

    fn has_agent(&self, agent_id: &str) -> bool {
        let id = agent_id.to_lowercase();
        self.agents.contains_key(&id) && !self.is_unavailable(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AgentPhase;
    use std::sync::Mutex;

    struct EchoBackend {
        id: String,
        available: bool,
    }

    #[async_trait]
    impl AgentBackend for EchoBackend {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            "Echo"
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn invoke(
            &self,
            prompt: &str,
            events: Option<&dyn EventSink>,
            cancel: &CancellationToken,
        ) -> Result<AgentReply> {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(sink) = events {
                sink.emit(
                    &self.id,
                    &AgentEvent::new(AgentPhase::Responding, "Responding").with_delta(prompt),
                );
            }
            Ok(AgentReply::new(&self.id, format!("echo: {}", prompt)))
        }
    }

    fn echo(id: &str, available: bool) -> Arc<dyn AgentBackend> {
        Arc::new(EchoBackend {
            id: id.to_string(),
            available,
        })
    }

    #[tokio::test]
    async fn test_send_routes_to_main_agent_and_streams() {
        let registry = AgentRegistry::new("Main").with_agent(echo("main", true));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = registry.on_event(move |agent, event| {
            sink.lock()
                .unwrap()
                .push((agent.to_string(), event.delta.clone()));
        });

        let reply = registry.send("hi", &CancellationToken::new()).await.unwrap();
        assert_eq!(reply.response, "echo: hi");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("main".to_string(), Some("hi".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_silent_invocation_does_not_notify() {
        let registry = AgentRegistry::new("main").with_agent(echo("helper", true));
        let count = Arc::new(Mutex::new(0usize));
        let counter = count.clone();
        let _sub = registry.on_event(move |_, _| *counter.lock().unwrap() += 1);

        registry
            .invoke_agent("HELPER", "x", InvokeOptions::silent(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let registry = AgentRegistry::new("main").with_agent(echo("main", true));
        let sub = registry.on_event(|_, _| {});
        let other = registry.on_event(|_, _| {});
        assert_eq!(registry.observer_count(), 2);

        sub.unsubscribe();
        assert_eq!(registry.observer_count(), 1);
        drop(other);
        assert_eq!(registry.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_and_unavailable_agents() {
        let registry = AgentRegistry::new("main")
            .with_agent(echo("main", true))
            .with_agent(echo("ghost", false));
        assert!(registry.has_agent("GHOST"));

        let missing = registry.probe_availability().await;
        assert_eq!(missing, vec!["ghost".to_string()]);
        assert!(!registry.has_agent("ghost"));
        assert!(registry.has_agent("main"));
        assert!(!registry.has_agent("nobody"));

        let err = registry
            .invoke_agent("nobody", "x", InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AgentNotFound(_)));

        let err = registry
            .invoke_agent("ghost", "x", InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
    }

    #[test]
    fn test_cancelled_send_never_reaches_backend() {
        let registry = AgentRegistry::new("main").with_agent(echo("main", true));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = tokio_test::block_on(registry.send("hi", &cancel)).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_list_agents_preserves_registration_order() {
        let registry = AgentRegistry::new("b")
            .with_agent(echo("b", true))
            .with_agent(echo("a", true))
            .with_agent(echo("b", true));
        let ids: Vec<String> = registry.list_agents().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
