use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;
use crate::runtime::{self, ContainerRuntime, ContainerSummary, LabelFilter};

pub const DEFAULT_CLUSTER_ID_LABEL: &str = "dcos_e2e.cluster_id";
pub const DEFAULT_NODE_TYPE_LABEL: &str = "dcos_e2e.node_type";
pub const DEFAULT_NODE_REFERENCE_LABEL: &str = "dcos_e2e.node_reference";

#[derive(Error, Debug)]
pub enum Error {
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("list containers: {0}")]
    Inspect(runtime::Error),
}

impl From<runtime::Error> for Error {
    fn from(err: runtime::Error) -> Self {
        match err {
            runtime::Error::Unavailable(message) => Error::RuntimeUnavailable(message),
            other => Error::Inspect(other),
        }
    }
}

/// Container labels written when a cluster's nodes are created.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelKeys {
    pub cluster_id: String,
    pub node_type: String,
    pub node_reference: String,
}

impl Default for LabelKeys {
    fn default() -> Self {
        Self {
            cluster_id: DEFAULT_CLUSTER_ID_LABEL.into(),
            node_type: DEFAULT_NODE_TYPE_LABEL.into(),
            node_reference: DEFAULT_NODE_REFERENCE_LABEL.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Master,
    Agent,
    PublicAgent,
}

impl Role {
    pub fn label_value(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Agent => "agent",
            Role::PublicAgent => "public_agent",
        }
    }

    pub fn from_label(value: &str) -> Option<Role> {
        [Role::Master, Role::Agent, Role::PublicAgent]
            .into_iter()
            .find(|role| role.label_value() == value)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label_value())
    }
}

/// A running node container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerRecord {
    /// Symbolic `<role>_<index>` reference, e.g. `agent_2`.
    #[serde(rename = "e2e_reference")]
    pub reference: String,
    pub role: Role,
    pub role_index: u32,
    pub ip_address: String,
    pub docker_container_id: String,
    pub docker_container_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterContainers {
    pub masters: Vec<ContainerRecord>,
    pub agents: Vec<ContainerRecord>,
    pub public_agents: Vec<ContainerRecord>,
}

impl ClusterContainers {
    /// Masters, then agents, then public agents.
    pub fn iter(&self) -> impl Iterator<Item = &ContainerRecord> {
        self.masters.iter().chain(&self.agents).chain(&self.public_agents)
    }

    pub fn len(&self) -> usize {
        self.masters.len() + self.agents.len() + self.public_agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn role_mut(&mut self, role: Role) -> &mut Vec<ContainerRecord> {
        match role {
            Role::Master => &mut self.masters,
            Role::Agent => &mut self.agents,
            Role::PublicAgent => &mut self.public_agents,
        }
    }
}

/// Read-only view of the node containers of clusters.
///
/// Every call queries the runtime again; nothing is cached between calls.
pub struct ContainerTopology<'a, R: ?Sized> {
    runtime: &'a R,
    labels: &'a LabelKeys,
}

impl<'a, R: ContainerRuntime + ?Sized> ContainerTopology<'a, R> {
    pub fn new(runtime: &'a R, labels: &'a LabelKeys) -> Self {
        Self { runtime, labels }
    }

    pub fn list(&self, cluster_id: &str) -> Result<ClusterContainers, Error> {
        let summaries = self
            .runtime
            .list_containers(&[LabelFilter::equals(&self.labels.cluster_id, cluster_id)])?;
        debug!("{} containers belong to cluster {cluster_id}", summaries.len());

        let mut containers = ClusterContainers::default();
        for summary in summaries {
            if let Some(record) = record(&summary, self.labels) {
                containers.role_mut(record.role).push(record);
            }
        }
        for role in [Role::Master, Role::Agent, Role::PublicAgent] {
            containers.role_mut(role).sort_by(|a, b| {
                (a.role_index, &a.docker_container_id).cmp(&(b.role_index, &b.docker_container_id))
            });
        }
        Ok(containers)
    }

    /// IDs of every cluster with at least one running container.
    pub fn cluster_ids(&self) -> Result<BTreeSet<String>, Error> {
        Ok(self
            .runtime
            .list_containers(&[LabelFilter::present(&self.labels.cluster_id)])?
            .into_iter()
            .filter_map(|summary| summary.labels.get(&self.labels.cluster_id).cloned())
            .collect())
    }
}

fn record(summary: &ContainerSummary, labels: &LabelKeys) -> Option<ContainerRecord> {
    let role = match summary.labels.get(&labels.node_type).map(String::as_str) {
        Some(value) => match Role::from_label(value) {
            Some(role) => role,
            None => {
                warn!("Skipping container {}: unknown node type {value:?}", summary.name);
                return None;
            }
        },
        None => {
            warn!("Skipping container {}: no {} label", summary.name, labels.node_type);
            return None;
        }
    };

    let reference = match summary.labels.get(&labels.node_reference) {
        Some(reference) => reference.clone(),
        // Nodes are named `<prefix>-<role>-<index>`.
        None => match summary.name.rsplit('-').next().map(str::parse::<u32>) {
            Some(Ok(index)) => format!("{role}_{index}"),
            _ => {
                warn!("Skipping container {}: no node reference", summary.name);
                return None;
            }
        },
    };

    let role_index = match reference.rsplit('_').next().map(str::parse::<u32>) {
        Some(Ok(index)) => index,
        _ => {
            warn!("Skipping container {}: malformed node reference {reference:?}", summary.name);
            return None;
        }
    };

    Some(ContainerRecord {
        reference,
        role,
        role_index,
        ip_address: summary.ip_address.clone(),
        docker_container_id: summary.id.clone(),
        docker_container_name: summary.name.clone(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::runtime::fakes::FakeRuntime;
    use std::collections::HashMap;

    pub fn node(
        cluster_id: &str,
        role: Role,
        index: u32,
        id: &str,
        ip_address: &str,
    ) -> ContainerSummary {
        let keys = LabelKeys::default();
        ContainerSummary {
            id: id.into(),
            name: format!("dcos-e2e-{cluster_id}-{}-{index}", role.label_value().replace('_', "-")),
            ip_address: ip_address.into(),
            labels: HashMap::from([
                (keys.cluster_id, cluster_id.to_string()),
                (keys.node_type, role.label_value().to_string()),
                (keys.node_reference, format!("{role}_{index}")),
            ]),
        }
    }

    #[test]
    fn empty_cluster_has_empty_roles() {
        let runtime = FakeRuntime::new();
        let labels = LabelKeys::default();
        let containers = ContainerTopology::new(&runtime, &labels).list("c1").unwrap();
        assert_eq!(containers, ClusterContainers::default());
        assert!(containers.is_empty());
    }

    #[test]
    fn containers_are_partitioned_by_role() {
        let runtime = FakeRuntime::with_containers(vec![
            node("c1", Role::Agent, 1, "a1", "10.0.0.7"),
            node("c1", Role::Master, 0, "m0", "10.0.0.5"),
            node("c1", Role::Agent, 0, "a0", "10.0.0.6"),
            node("c1", Role::PublicAgent, 0, "p0", "10.0.0.8"),
            node("c2", Role::Master, 0, "other", "10.0.1.5"),
        ]);
        let labels = LabelKeys::default();
        let containers = ContainerTopology::new(&runtime, &labels).list("c1").unwrap();

        assert_eq!(containers.len(), 4);
        assert_eq!(containers.masters[0].reference, "master_0");
        assert_eq!(containers.masters[0].ip_address, "10.0.0.5");
        assert_eq!(containers.masters[0].docker_container_name, "dcos-e2e-c1-master-0");
        assert_eq!(
            containers.agents.iter().map(|r| r.reference.as_str()).collect::<Vec<_>>(),
            vec!["agent_0", "agent_1"]
        );
        assert_eq!(containers.public_agents[0].role, Role::PublicAgent);
        assert_eq!(containers.public_agents[0].reference, "public_agent_0");
        assert_eq!(containers.public_agents[0].role_index, 0);
    }

    #[test]
    fn listing_twice_is_identical() {
        let runtime = FakeRuntime::with_containers(vec![
            node("c1", Role::Agent, 0, "a0", "10.0.0.6"),
            node("c1", Role::Master, 0, "m0", "10.0.0.5"),
        ]);
        let labels = LabelKeys::default();
        let topology = ContainerTopology::new(&runtime, &labels);
        assert_eq!(topology.list("c1").unwrap(), topology.list("c1").unwrap());
    }

    #[test]
    fn membership_changes_are_seen_immediately() {
        let runtime = FakeRuntime::with_containers(vec![node("c1", Role::Master, 0, "m0", "10.0.0.5")]);
        let labels = LabelKeys::default();
        let topology = ContainerTopology::new(&runtime, &labels);
        assert_eq!(topology.list("c1").unwrap().len(), 1);

        runtime.containers.lock().unwrap().clear();
        assert!(topology.list("c1").unwrap().is_empty());
    }

    #[test]
    fn reference_is_derived_from_name_when_unlabelled() {
        let mut summary = node("c1", Role::PublicAgent, 3, "p3", "10.0.0.9");
        summary.labels.remove(DEFAULT_NODE_REFERENCE_LABEL);
        let runtime = FakeRuntime::with_containers(vec![summary]);
        let labels = LabelKeys::default();
        let containers = ContainerTopology::new(&runtime, &labels).list("c1").unwrap();
        assert_eq!(containers.public_agents[0].reference, "public_agent_3");
        assert_eq!(containers.public_agents[0].role_index, 3);
    }

    #[test]
    fn unidentifiable_containers_are_skipped() {
        let mut no_role = node("c1", Role::Agent, 0, "a0", "10.0.0.6");
        no_role.labels.remove(DEFAULT_NODE_TYPE_LABEL);
        let mut bad_role = node("c1", Role::Agent, 1, "a1", "10.0.0.7");
        bad_role.labels.insert(DEFAULT_NODE_TYPE_LABEL.into(), "bootstrap".into());
        let mut no_reference = node("c1", Role::Agent, 2, "a2", "10.0.0.8");
        no_reference.labels.remove(DEFAULT_NODE_REFERENCE_LABEL);
        no_reference.name = "sidecar".into();

        let runtime = FakeRuntime::with_containers(vec![
            no_role,
            bad_role,
            no_reference,
            node("c1", Role::Master, 0, "m0", "10.0.0.5"),
        ]);
        let labels = LabelKeys::default();
        let containers = ContainerTopology::new(&runtime, &labels).list("c1").unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers.masters[0].docker_container_id, "m0");
    }

    #[test]
    fn unreachable_runtime_is_reported() {
        let runtime = FakeRuntime {
            unavailable: true,
            ..FakeRuntime::default()
        };
        let labels = LabelKeys::default();
        assert!(matches!(
            ContainerTopology::new(&runtime, &labels).list("c1"),
            Err(Error::RuntimeUnavailable(_))
        ));
    }

    #[test]
    fn cluster_ids_are_collected_from_labels() {
        let runtime = FakeRuntime::with_containers(vec![
            node("c1", Role::Master, 0, "m0", "10.0.0.5"),
            node("c1", Role::Agent, 0, "a0", "10.0.0.6"),
            node("c2", Role::Master, 0, "m1", "10.0.1.5"),
        ]);
        let labels = LabelKeys::default();
        let ids = ContainerTopology::new(&runtime, &labels).cluster_ids().unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["c1", "c2"]);
    }

    #[test]
    fn records_render_with_inspect_field_names() {
        let runtime = FakeRuntime::with_containers(vec![node("c1", Role::Master, 0, "abc123", "10.0.0.5")]);
        let labels = LabelKeys::default();
        let containers = ContainerTopology::new(&runtime, &labels).list("c1").unwrap();
        let json = serde_json::to_value(&containers).unwrap();
        assert_eq!(json["masters"][0]["e2e_reference"], "master_0");
        assert_eq!(json["masters"][0]["docker_container_id"], "abc123");
        assert_eq!(json["masters"][0]["role"], "master");
        assert_eq!(json["agents"], serde_json::json!([]));
    }
}
