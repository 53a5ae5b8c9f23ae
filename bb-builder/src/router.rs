//! Per-instance routing table.
//!
//! The table is assembled in two passes and frozen before serving begins:
//!
//! 1. every instance allowed to write into the action cache is filled in with
//!    one shared [`NonExecutableBuildQueue`], so capability queries for it work;
//! 2. configured schedulers are overlaid on top, replacing any fill-in.
//!
//! The passes commute: fill-ins never displace a scheduler.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use bb_core::{BbResult, InstanceName, RpcMetrics, SchedulerEntry};
use tracing::info;

use crate::{BuildQueue, DemultiplexingBuildQueue, ForwardingBuildQueue, NonExecutableBuildQueue};

/// Collects routes before they are frozen into an [`InstanceRouter`].
#[derive(Default)]
pub struct InstanceRouterBuilder {
    queues: BTreeMap<InstanceName, Arc<dyn BuildQueue>>,
    allow_action_cache_updates: BTreeSet<InstanceName>,
}

impl InstanceRouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill-in pass: mark instances as action-cache writable and route them
    /// to a shared non-executable queue unless a scheduler serves them.
    pub fn with_action_cache_fallbacks<I>(mut self, instances: I) -> Self
    where
        I: IntoIterator<Item = InstanceName>,
    {
        let fallback: Arc<dyn BuildQueue> = Arc::new(NonExecutableBuildQueue::new());
        for instance in instances {
            self.queues
                .entry(instance.clone())
                .or_insert_with(|| fallback.clone());
            self.allow_action_cache_updates.insert(instance);
        }
        self
    }

    /// Overlay pass: route instances to their schedulers.
    pub fn with_schedulers<I>(mut self, schedulers: I) -> Self
    where
        I: IntoIterator<Item = (InstanceName, Arc<dyn BuildQueue>)>,
    {
        self.queues.extend(schedulers);
        self
    }

    pub fn build(self) -> InstanceRouter {
        InstanceRouter {
            queues: self.queues,
            allow_action_cache_updates: self.allow_action_cache_updates,
        }
    }
}

/// Immutable mapping from instance name to build queue, plus the action
/// cache write allow-list.
pub struct InstanceRouter {
    queues: BTreeMap<InstanceName, Arc<dyn BuildQueue>>,
    allow_action_cache_updates: BTreeSet<InstanceName>,
}

impl InstanceRouter {
    pub fn builder() -> InstanceRouterBuilder {
        InstanceRouterBuilder::new()
    }

    /// Build the routing table of a process: fallbacks for the action-cache
    /// writable instances, then one forwarding queue per scheduler entry.
    ///
    /// Scheduler connections are established lazily on first use, and all of
    /// them report into `client_metrics`.
    pub fn from_config(
        schedulers: &[SchedulerEntry],
        allow_action_cache_updates_for_instances: &[InstanceName],
        client_metrics: Arc<RpcMetrics>,
    ) -> BbResult<Self> {
        let forwarding = schedulers
            .iter()
            .map(|entry| {
                let queue = ForwardingBuildQueue::connect_lazy(&entry.endpoint, client_metrics.clone())?;
                Ok((
                    entry.instance_name.clone(),
                    Arc::new(queue) as Arc<dyn BuildQueue>,
                ))
            })
            .collect::<BbResult<Vec<_>>>()?;

        let router = Self::builder()
            .with_action_cache_fallbacks(allow_action_cache_updates_for_instances.iter().cloned())
            .with_schedulers(forwarding)
            .build();
        for entry in schedulers {
            info!(instance = %entry.instance_name, endpoint = %entry.endpoint_uri(), "forwarding instance to scheduler");
        }
        info!(routes = ?router, "built instance routing table");
        Ok(router)
    }

    /// Queue serving `instance_name`, if any.
    pub fn lookup(&self, instance_name: &str) -> Option<Arc<dyn BuildQueue>> {
        self.queues.get(instance_name).cloned()
    }

    pub fn allows_action_cache_updates(&self, instance_name: &str) -> bool {
        self.allow_action_cache_updates.contains(instance_name)
    }

    pub fn action_cache_update_allow_list(&self) -> &BTreeSet<InstanceName> {
        &self.allow_action_cache_updates
    }

    pub fn instance_names(&self) -> impl Iterator<Item = &InstanceName> {
        self.queues.keys()
    }

    /// Queue that dispatches every call through this table.
    pub fn into_build_queue(self: Arc<Self>) -> DemultiplexingBuildQueue {
        DemultiplexingBuildQueue::new(move |instance_name| self.lookup(instance_name))
    }
}

impl fmt::Debug for InstanceRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRouter")
            .field("instances", &self.queues.keys().collect::<Vec<_>>())
            .field("allow_action_cache_updates", &self.allow_action_cache_updates)
            .finish()
    }
}
