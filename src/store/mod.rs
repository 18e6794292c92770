//! Contracts for the persistence collaborators the ingestion path writes to.
//!
//! Every method is awaited before the agent is acknowledged, so a returned
//! `Ok` must mean the data is durable.

pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::SmtpConfig;
use crate::ingest::AggregateGroup;
use crate::wire::{AgentConfig, AlertConfig, AlertKind, Environment, GaugeValue, SharedQueryText, Trace};

pub use memory::MemoryStore;

#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Register or refresh an agent. Returns the config the agent should run
    /// with, which may differ from the one it sent.
    async fn store_agent(
        &self,
        agent_id: &str,
        agent_rollup_id: Option<&str>,
        environment: &Environment,
        agent_config: &AgentConfig,
    ) -> Result<AgentConfig>;

    /// Human-readable name for an agent or rollup.
    async fn read_agent_rollup_display(&self, agent_rollup_id: &str) -> Result<String>;
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn store_aggregates(
        &self,
        agent_id: &str,
        capture_time: i64,
        groups: &[AggregateGroup],
        shared_query_texts: &[SharedQueryText],
    ) -> Result<()>;
}

#[async_trait]
pub trait GaugeValueStore: Send + Sync {
    async fn store_gauge_values(&self, agent_id: &str, samples: &[GaugeValue]) -> Result<()>;
}

#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    async fn store_heartbeat(&self, agent_id: &str) -> Result<()>;
}

#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn store_trace(&self, agent_id: &str, trace: &Trace) -> Result<()>;
}

#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn smtp_config(&self) -> Result<SmtpConfig>;

    /// Alert configs of `kind` that apply to the agent, including those
    /// inherited from its rollup chain.
    async fn alert_configs(&self, agent_id: &str, kind: AlertKind) -> Result<Vec<AlertConfig>>;
}

/// Handles to every collaborator, shared across RPC tasks.
#[derive(Clone)]
pub struct Stores {
    pub agents: Arc<dyn AgentStore>,
    pub aggregates: Arc<dyn AggregateStore>,
    pub gauge_values: Arc<dyn GaugeValueStore>,
    pub heartbeats: Arc<dyn HeartbeatStore>,
    pub traces: Arc<dyn TraceStore>,
    pub configs: Arc<dyn ConfigRepository>,
}

impl Stores {
    /// Back every contract with one in-memory store.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            agents: store.clone(),
            aggregates: store.clone(),
            gauge_values: store.clone(),
            heartbeats: store.clone(),
            traces: store.clone(),
            configs: store,
        }
    }
}
