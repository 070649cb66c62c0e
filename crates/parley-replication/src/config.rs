//! Coordinator configuration.

use parley_types::ReplicaId;

use crate::error::{ReplicationError, ReplicationResult};

/// Static configuration for one replica's coordinator.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Human-readable name for logs and the STATUS diagnostic.
    pub server_id: String,

    /// Host the replication listener binds to.
    pub bind_host: String,

    /// Port the replication listener binds to.
    pub replication_port: u16,

    /// The fixed replica set, as replication endpoints. Must include self.
    pub replicas: Vec<ReplicaId>,
}

impl ReplicatorConfig {
    /// Resolves this node's protocol identity within the replica set.
    ///
    /// The exact `bind_host:port` entry wins. When binding a wildcard host
    /// (`0.0.0.0`), self is the unique replica on the local port; two
    /// replicas sharing the port make the identity ambiguous and the
    /// configuration is rejected, as is a set that contains no self at all -
    /// majority tallies count against the configured set size, so self must
    /// be in it.
    pub fn resolve_local_id(&self) -> ReplicationResult<ReplicaId> {
        if self.replicas.is_empty() {
            return Err(ReplicationError::EmptyReplicaSet);
        }

        let exact = ReplicaId::from_parts(&self.bind_host, self.replication_port);
        if self.replicas.contains(&exact) {
            return Ok(exact);
        }

        if self.bind_host == "0.0.0.0" {
            let suffix = format!(":{}", self.replication_port);
            let mut on_port = self.replicas.iter().filter(|r| r.as_str().ends_with(&suffix));
            return match (on_port.next(), on_port.next()) {
                (Some(me), None) => Ok(me.clone()),
                (Some(_), Some(_)) => Err(ReplicationError::AmbiguousSelf(self.replication_port)),
                (None, _) => Err(ReplicationError::SelfNotInReplicaSet(exact.to_string())),
            };
        }

        Err(ReplicationError::SelfNotInReplicaSet(exact.to_string()))
    }

    /// Configured replica-set size; the majority denominator.
    pub fn cluster_size(&self) -> usize {
        self.replicas.len()
    }
}
