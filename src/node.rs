//! Find a node from a user-supplied reference.
//!
//! A reference is one of:
//!
//! * a symbolic reference in the format `<role>_<index>`, in any case,
//! * a node's IP address,
//! * a node's Docker container name,
//! * a node's Docker container ID.

use log::debug;
use serde::Serialize;
use thiserror::Error;
use crate::runtime::ContainerRuntime;
use crate::topology::{self, ContainerRecord, ContainerTopology, Role};

#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "no such node in cluster \"{cluster_id}\" with IP address, Docker container name, \
         Docker container ID or node reference \"{reference}\""
    )]
    NodeNotFound { cluster_id: String, reference: String },

    #[error("reference \"{reference}\" matches several nodes in cluster \"{cluster_id}\": {}", .containers.join(", "))]
    AmbiguousReference {
        cluster_id: String,
        reference: String,
        containers: Vec<String>,
    },

    #[error(transparent)]
    Topology(#[from] topology::Error),
}

/// Enough addressing to run commands on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeHandle {
    pub reference: String,
    pub role: Role,
    pub ip_address: String,
    pub docker_container_id: String,
    pub docker_container_name: String,
}

impl From<&ContainerRecord> for NodeHandle {
    fn from(record: &ContainerRecord) -> Self {
        Self {
            reference: record.reference.clone(),
            role: record.role,
            ip_address: record.ip_address.clone(),
            docker_container_id: record.docker_container_id.clone(),
            docker_container_name: record.docker_container_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Exact,
    IgnoreAsciiCase,
}

impl Comparison {
    fn matches(self, value: &str, reference: &str) -> bool {
        !value.is_empty()
            && match self {
                Comparison::Exact => value == reference,
                Comparison::IgnoreAsciiCase => value.eq_ignore_ascii_case(reference),
            }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Reference,
    IpAddress,
    ContainerName,
    ContainerId,
}

impl Field {
    fn value(self, record: &ContainerRecord) -> &str {
        match self {
            Field::Reference => &record.reference,
            Field::IpAddress => &record.ip_address,
            Field::ContainerName => &record.docker_container_name,
            Field::ContainerId => &record.docker_container_id,
        }
    }
}

/// How a reference is compared against each identifying field of a node.
const MATCH_POLICY: [(Field, Comparison); 4] = [
    (Field::Reference, Comparison::IgnoreAsciiCase),
    (Field::IpAddress, Comparison::Exact),
    (Field::ContainerName, Comparison::Exact),
    (Field::ContainerId, Comparison::Exact),
];

pub fn matches(record: &ContainerRecord, reference: &str) -> bool {
    MATCH_POLICY
        .iter()
        .any(|(field, comparison)| comparison.matches(field.value(record), reference))
}

pub struct NodeResolver<'a, R: ?Sized> {
    topology: ContainerTopology<'a, R>,
}

impl<'a, R: ContainerRuntime + ?Sized> NodeResolver<'a, R> {
    pub fn new(topology: ContainerTopology<'a, R>) -> Self {
        Self { topology }
    }

    /// Resolve `reference` against the cluster's containers as they are right now.
    pub fn resolve(&self, cluster_id: &str, reference: &str) -> Result<NodeHandle, Error> {
        let containers = self.topology.list(cluster_id)?;
        let found: Vec<&ContainerRecord> = containers
            .iter()
            .filter(|record| matches(record, reference))
            .collect();

        match found.as_slice() {
            [] => Err(Error::NodeNotFound {
                cluster_id: cluster_id.to_string(),
                reference: reference.to_string(),
            }),
            [record] => {
                debug!("{reference} resolved to {} ({})", record.reference, record.docker_container_id);
                Ok(NodeHandle::from(*record))
            }
            records => Err(Error::AmbiguousReference {
                cluster_id: cluster_id.to_string(),
                reference: reference.to_string(),
                containers: records
                    .iter()
                    .map(|record| record.docker_container_id.clone())
                    .collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fakes::FakeRuntime;
    use crate::topology::tests::node;
    use crate::topology::LabelKeys;

    fn cluster() -> FakeRuntime {
        FakeRuntime::with_containers(vec![
            node("c1", Role::Master, 0, "abc123", "10.0.0.5"),
            node("c1", Role::Agent, 0, "def456", "10.0.0.6"),
            node("c1", Role::PublicAgent, 0, "0a1b2c", "10.0.0.7"),
            node("c2", Role::Master, 1, "fff000", "10.0.1.5"),
        ])
    }

    fn resolve(runtime: &FakeRuntime, cluster_id: &str, reference: &str) -> Result<NodeHandle, Error> {
        let labels = LabelKeys::default();
        NodeResolver::new(ContainerTopology::new(runtime, &labels)).resolve(cluster_id, reference)
    }

    #[test]
    fn every_identifier_resolves_to_the_same_node() {
        let runtime = cluster();
        let expected = resolve(&runtime, "c1", "master_0").unwrap();
        assert_eq!(expected.docker_container_id, "abc123");
        assert_eq!(expected.ip_address, "10.0.0.5");
        for reference in ["MASTER_0", "Master_0", "10.0.0.5", "abc123", "dcos-e2e-c1-master-0"] {
            assert_eq!(resolve(&runtime, "c1", reference).unwrap(), expected, "{reference}");
        }
    }

    #[test]
    fn public_agents_resolve() {
        let handle = resolve(&cluster(), "c1", "public_agent_0").unwrap();
        assert_eq!(handle.role, Role::PublicAgent);
        assert_eq!(handle.docker_container_name, "dcos-e2e-c1-public-agent-0");
    }

    #[test]
    fn unknown_reference_is_not_found() {
        match resolve(&cluster(), "c1", "master_1") {
            Err(Error::NodeNotFound { cluster_id, reference }) => {
                assert_eq!(cluster_id, "c1");
                assert_eq!(reference, "master_1");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn only_the_symbolic_reference_ignores_case() {
        let runtime = cluster();
        assert!(matches!(resolve(&runtime, "c1", "ABC123"), Err(Error::NodeNotFound { .. })));
        assert!(matches!(
            resolve(&runtime, "c1", "DCOS-E2E-C1-MASTER-0"),
            Err(Error::NodeNotFound { .. })
        ));
    }

    #[test]
    fn references_are_scoped_to_the_cluster() {
        let runtime = cluster();
        assert!(matches!(resolve(&runtime, "c1", "fff000"), Err(Error::NodeNotFound { .. })));
        assert_eq!(resolve(&runtime, "c2", "master_1").unwrap().docker_container_id, "fff000");
    }

    #[test]
    fn empty_reference_never_matches_missing_addresses() {
        let runtime = FakeRuntime::with_containers(vec![node("c1", Role::Master, 0, "abc123", "")]);
        assert!(matches!(resolve(&runtime, "c1", ""), Err(Error::NodeNotFound { .. })));
    }

    #[test]
    fn duplicated_identifiers_are_ambiguous() {
        let runtime = FakeRuntime::with_containers(vec![
            node("c1", Role::Agent, 0, "def456", "10.0.0.6"),
            node("c1", Role::Agent, 1, "aaa111", "10.0.0.6"),
        ]);
        match resolve(&runtime, "c1", "10.0.0.6") {
            Err(Error::AmbiguousReference { containers, .. }) => {
                assert_eq!(containers, vec!["def456".to_string(), "aaa111".to_string()])
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unreachable_runtime_propagates() {
        let runtime = FakeRuntime {
            unavailable: true,
            ..FakeRuntime::default()
        };
        assert!(matches!(
            resolve(&runtime, "c1", "master_0"),
            Err(Error::Topology(topology::Error::RuntimeUnavailable(_)))
        ));
    }
}
