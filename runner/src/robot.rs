//! Robot identity, declared resources and the per-robot execution quota.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{ExecutorKind, Phase, Task};

/// Default number of concurrent executions per robot.
pub const DEFAULT_QUOTA: usize = 2;

/// Phase key used to look up the validation assistant.
pub const VALIDATION_PHASE: &str = "validation";

/// Raised when a robot is already running its maximum number of executions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaExceededError {
    pub member_id: String,
    pub max: usize,
}

impl fmt::Display for QuotaExceededError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "quota exceeded: robot {} is already running {} execution(s)",
            self.member_id, self.max
        )
    }
}

impl std::error::Error for QuotaExceededError {}

/// An autonomous agent that owns executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Robot {
    pub member_id: String,
    pub team_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub quota: Quota,
    #[serde(default)]
    pub identity: Option<Identity>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub delivery: DeliveryPrefs,
    /// Executions currently holding a slot. Shared between clones.
    #[serde(skip)]
    running: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quota {
    pub max: usize,
}

impl Default for Quota {
    fn default() -> Self {
        Self { max: DEFAULT_QUOTA }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub role: String,
    pub duties: Vec<String>,
    pub rules: Vec<String>,
}

/// Executors and phase assistants available to a robot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    /// Assistant ids the robot may delegate tasks to.
    pub agents: Vec<String>,
    pub mcp: Vec<McpResource>,
    /// Phase name to assistant id overrides (including `validation`).
    pub phases: BTreeMap<String, String>,
}

/// An external tool server and the tools it exposes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpResource {
    pub id: String,
    /// Empty means every tool is allowed.
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryPrefs {
    pub targets: Vec<DeliveryTarget>,
}

/// A destination for delivery content, routed by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTarget {
    /// `file`, `process`, `email` or `webhook`.
    pub kind: String,
    /// Path, command line, address or URL depending on `kind`.
    pub target: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl Robot {
    pub fn new(member_id: impl Into<String>, team_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            team_id: team_id.into(),
            display_name: String::new(),
            system_prompt: String::new(),
            quota: Quota::default(),
            identity: None,
            resources: Resources::default(),
            delivery: DeliveryPrefs::default(),
            running: Arc::default(),
        }
    }

    /// Assistant id for a phase: the configured override or `__yao.<phase>`.
    pub fn phase_agent(&self, phase: &str) -> String {
        self.resources
            .phases
            .get(phase)
            .filter(|id| !id.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("__yao.{phase}"))
    }

    pub fn agent_for(&self, phase: Phase) -> String {
        self.phase_agent(phase.as_str())
    }

    pub fn validation_agent(&self) -> String {
        self.phase_agent(VALIDATION_PHASE)
    }

    /// Whether the robot declares the executor a task refers to.
    ///
    /// Robots without declared resources accept everything, and subprocess
    /// executors are never checked.
    pub fn executor_exists(&self, task: &Task) -> bool {
        if self.resources.agents.is_empty() && self.resources.mcp.is_empty() {
            return true;
        }
        match task.executor_type {
            ExecutorKind::Assistant => self.resources.agents.contains(&task.executor_id),
            ExecutorKind::Mcp => {
                let (client, tool) = task
                    .executor_id
                    .split_once('.')
                    .unwrap_or((task.executor_id.as_str(), ""));
                self.resources.mcp.iter().any(|server| {
                    server.id == client
                        && (server.tools.is_empty() || server.tools.iter().any(|t| t == tool))
                })
            }
            ExecutorKind::Process => true,
        }
    }

    /// Number of executions currently holding a slot.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Reserve one execution slot, or `None` when the quota is full.
    ///
    /// The slot is released when the returned guard drops.
    pub fn try_acquire_slot(&self) -> Option<SlotGuard> {
        let max = self.quota.max;
        let mut current = self.running.load(Ordering::SeqCst);
        loop {
            if current >= max {
                debug!(member_id = %self.member_id, current, max, "slot quota full");
                return None;
            }
            match self.running.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Some(SlotGuard {
                        running: Arc::clone(&self.running),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// Holds one execution slot; releases it exactly once on drop.
#[derive(Debug)]
pub struct SlotGuard {
    running: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}
