use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use super::{
    AgentStore, AggregateStore, ConfigRepository, GaugeValueStore, HeartbeatStore, TraceStore,
};
use crate::config::SmtpConfig;
use crate::ingest::legacy::rollup_chain;
use crate::ingest::AggregateGroup;
use crate::wire::{AgentConfig, AlertConfig, AlertKind, Environment, GaugeValue, SharedQueryText, Trace};

/// Operations that can be forced to fail, for exercising error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Agents,
    Aggregates,
    GaugeValues,
    Heartbeats,
    Traces,
    Display,
    SmtpConfig,
    AlertConfigs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    pub agent_rollup_id: Option<String>,
    pub environment: Environment,
    pub config: AgentConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredAggregates {
    pub agent_id: String,
    pub capture_time: i64,
    pub groups: Vec<AggregateGroup>,
    pub shared_query_texts: Vec<SharedQueryText>,
}

/// Records kept per write kind when no retention is given.
pub const DEFAULT_RETENTION: usize = 10_000;

/// Bounded FIFO of written records; the oldest is evicted when full.
struct Retained<T> {
    records: Mutex<VecDeque<T>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl<T: Clone> Retained<T> {
    fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            evicted: AtomicU64::new(0),
        }
    }

    fn extend(&self, items: impl IntoIterator<Item = T>) {
        let mut records = self.records.lock();
        for item in items {
            if records.len() == self.capacity {
                records.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            records.push_back(item);
        }
    }

    fn push(&self, item: T) {
        self.extend(std::iter::once(item));
    }

    fn to_vec(&self) -> Vec<T> {
        self.records.lock().iter().cloned().collect()
    }

    fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

/// Process-local implementation of every storage contract.
///
/// Backs the binary when no external store is wired in and gives tests real
/// collaborators to assert against. Writes are kept in arrival order, up to
/// `retention` records per kind.
pub struct MemoryStore {
    smtp: RwLock<SmtpConfig>,
    agents: DashMap<String, AgentRecord>,
    rollup_configs: DashMap<String, AgentConfig>,
    displays: DashMap<String, String>,
    aggregates: Retained<StoredAggregates>,
    gauge_values: Retained<(String, GaugeValue)>,
    heartbeats: Retained<String>,
    traces: Retained<(String, Trace)>,
    failures: Mutex<HashSet<FailPoint>>,
}

impl MemoryStore {
    pub fn new(smtp: SmtpConfig) -> Self {
        Self::with_retention(smtp, DEFAULT_RETENTION)
    }

    pub fn with_retention(smtp: SmtpConfig, retention: usize) -> Self {
        Self {
            smtp: RwLock::new(smtp),
            agents: DashMap::new(),
            rollup_configs: DashMap::new(),
            displays: DashMap::new(),
            aggregates: Retained::new(retention),
            gauge_values: Retained::new(retention),
            heartbeats: Retained::new(retention),
            traces: Retained::new(retention),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Records evicted so far across all write kinds.
    pub fn evicted(&self) -> u64 {
        self.aggregates.evicted()
            + self.gauge_values.evicted()
            + self.heartbeats.evicted()
            + self.traces.evicted()
    }

    /// Make `point` fail (or succeed again) on subsequent calls.
    pub fn set_failing(&self, point: FailPoint, failing: bool) {
        let mut failures = self.failures.lock();
        if failing {
            failures.insert(point);
        } else {
            failures.remove(&point);
        }
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        if self.failures.lock().contains(&point) {
            bail!("injected {point:?} failure");
        }
        Ok(())
    }

    pub fn set_smtp_config(&self, smtp: SmtpConfig) {
        *self.smtp.write() = smtp;
    }

    pub fn set_display(&self, agent_rollup_id: &str, display: &str) {
        self.displays
            .insert(agent_rollup_id.to_string(), display.to_string());
    }

    /// Replace the config of a rollup, or of a registered agent.
    pub fn put_config(&self, agent_rollup_id: &str, config: AgentConfig) {
        if let Some(mut agent) = self.agents.get_mut(agent_rollup_id) {
            agent.config = config;
            return;
        }
        self.rollup_configs
            .insert(agent_rollup_id.to_string(), config);
    }

    pub fn agent(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.get(agent_id).map(|r| r.value().clone())
    }

    pub fn aggregates(&self) -> Vec<StoredAggregates> {
        self.aggregates.to_vec()
    }

    pub fn gauge_values(&self) -> Vec<(String, GaugeValue)> {
        self.gauge_values.to_vec()
    }

    pub fn heartbeats(&self) -> Vec<String> {
        self.heartbeats.to_vec()
    }

    pub fn traces(&self) -> Vec<(String, Trace)> {
        self.traces.to_vec()
    }

    fn config_for(&self, id: &str) -> Option<AgentConfig> {
        if let Some(agent) = self.agents.get(id) {
            return Some(agent.config.clone());
        }
        self.rollup_configs.get(id).map(|c| c.value().clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(SmtpConfig::default())
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn store_agent(
        &self,
        agent_id: &str,
        agent_rollup_id: Option<&str>,
        environment: &Environment,
        agent_config: &AgentConfig,
    ) -> Result<AgentConfig> {
        self.check(FailPoint::Agents)?;

        let mut record = self
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentRecord {
                agent_rollup_id: None,
                environment: Environment::default(),
                config: agent_config.clone(),
            });

        // A config already held centrally wins over what the agent sends.
        record.agent_rollup_id = agent_rollup_id.map(str::to_owned);
        record.environment = environment.clone();

        Ok(record.config.clone())
    }

    async fn read_agent_rollup_display(&self, agent_rollup_id: &str) -> Result<String> {
        self.check(FailPoint::Display)?;

        if let Some(display) = self.displays.get(agent_rollup_id) {
            return Ok(display.value().clone());
        }
        if self.agents.contains_key(agent_rollup_id)
            || self.rollup_configs.contains_key(agent_rollup_id)
        {
            return Ok(agent_rollup_id.to_string());
        }
        Err(anyhow!("unknown agent rollup {agent_rollup_id}"))
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn store_aggregates(
        &self,
        agent_id: &str,
        capture_time: i64,
        groups: &[AggregateGroup],
        shared_query_texts: &[SharedQueryText],
    ) -> Result<()> {
        self.check(FailPoint::Aggregates)?;

        self.aggregates.push(StoredAggregates {
            agent_id: agent_id.to_string(),
            capture_time,
            groups: groups.to_vec(),
            shared_query_texts: shared_query_texts.to_vec(),
        });
        Ok(())
    }
}

#[async_trait]
impl GaugeValueStore for MemoryStore {
    async fn store_gauge_values(&self, agent_id: &str, samples: &[GaugeValue]) -> Result<()> {
        self.check(FailPoint::GaugeValues)?;

        self.gauge_values.extend(
            samples
                .iter()
                .map(|sample| (agent_id.to_string(), sample.clone())),
        );
        Ok(())
    }
}

#[async_trait]
impl HeartbeatStore for MemoryStore {
    async fn store_heartbeat(&self, agent_id: &str) -> Result<()> {
        self.check(FailPoint::Heartbeats)?;

        self.heartbeats.push(agent_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl TraceStore for MemoryStore {
    async fn store_trace(&self, agent_id: &str, trace: &Trace) -> Result<()> {
        self.check(FailPoint::Traces)?;

        self.traces.push((agent_id.to_string(), trace.clone()));
        Ok(())
    }
}

#[async_trait]
impl ConfigRepository for MemoryStore {
    async fn smtp_config(&self) -> Result<SmtpConfig> {
        self.check(FailPoint::SmtpConfig)?;
        Ok(self.smtp.read().clone())
    }

    async fn alert_configs(&self, agent_id: &str, kind: AlertKind) -> Result<Vec<AlertConfig>> {
        self.check(FailPoint::AlertConfigs)?;

        let mut ids = self
            .agents
            .get(agent_id)
            .and_then(|a| a.agent_rollup_id.clone())
            .map(|rollup| rollup_chain(&rollup))
            .unwrap_or_default();
        ids.push(agent_id.to_string());

        let configs = ids
            .iter()
            .filter_map(|id| self.config_for(id))
            .flat_map(|config| config.alert_config)
            .filter(|alert| alert.kind() == kind)
            .collect();

        Ok(configs)
    }
}
