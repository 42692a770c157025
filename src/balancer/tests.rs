#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::balancer::core::LoadBalancer;
    use crate::cluster::ring::generate_virtual_nodes;
    use crate::cluster::types::{
        ClusterState, HealthStatus, Node, NodeId, Partition, PartitionRole, Role,
    };
    use crate::error::KvError;

    struct TestCluster {
        state: ClusterState,
        partition_id: String,
        nodes: Vec<NodeId>,
    }

    /// One partition over `members` nodes; the first member is the master.
    fn cluster(members: usize) -> TestCluster {
        let partition_id = "p1".to_string();
        let node_ids: Vec<NodeId> = (0..members).map(|_| NodeId::new()).collect();

        let mut state = ClusterState::default();
        for (i, id) in node_ids.iter().enumerate() {
            let mut partitions = HashMap::new();
            partitions.insert(
                partition_id.clone(),
                PartitionRole {
                    role: if i == 0 { Role::Master } else { Role::Replica },
                    syncing: false,
                    status: HealthStatus::Healthy,
                },
            );
            state.nodes.push(Node {
                id: *id,
                address: format!("127.0.0.1:8{:03}", i),
                status: HealthStatus::Healthy,
                partitions,
            });
        }
        state.partitions.insert(
            partition_id.clone(),
            Partition {
                id: partition_id.clone(),
                master: node_ids[0],
                members: node_ids.clone(),
                migrating: false,
            },
        );
        state.virtual_nodes = generate_virtual_nodes(&partition_id, 16);
        TestCluster {
            state,
            partition_id,
            nodes: node_ids,
        }
    }

    fn role_of<'a>(state: &'a mut ClusterState, node: &NodeId, pid: &str) -> &'a mut PartitionRole {
        state
            .nodes
            .iter_mut()
            .find(|n| n.id == *node)
            .unwrap()
            .partitions
            .get_mut(pid)
            .unwrap()
    }

    // ============================================================
    // WRITE ROUTING
    // ============================================================

    #[test]
    fn test_write_routes_to_healthy_master() {
        let tc = cluster(3);
        let (address, pid) = LoadBalancer::route_write(&tc.state, "some-key").unwrap();
        assert_eq!(pid, tc.partition_id);
        assert_eq!(address, tc.state.nodes[0].address);
    }

    #[test]
    fn test_write_fails_when_master_unhealthy() {
        let mut tc = cluster(3);
        role_of(&mut tc.state, &tc.nodes[0], &tc.partition_id).status = HealthStatus::Unhealthy;

        let err = LoadBalancer::route_write(&tc.state, "some-key").unwrap_err();
        assert!(matches!(err, KvError::PartitionUnavailable(_)));
    }

    #[test]
    fn test_write_fails_when_master_syncing() {
        let mut tc = cluster(3);
        role_of(&mut tc.state, &tc.nodes[0], &tc.partition_id).syncing = true;

        let err = LoadBalancer::route_write(&tc.state, "some-key").unwrap_err();
        assert!(matches!(err, KvError::PartitionUnavailable(_)));
    }

    #[test]
    fn test_write_fails_when_master_node_is_gone() {
        let mut tc = cluster(2);
        tc.state.nodes.remove(0);

        let err = LoadBalancer::route_write(&tc.state, "some-key").unwrap_err();
        assert!(matches!(err, KvError::PartitionUnavailable(_)));
    }

    // ============================================================
    // READ ROUTING
    // ============================================================

    #[test]
    fn test_read_routes_to_some_healthy_replica() {
        let tc = cluster(3);
        let addresses: Vec<String> = tc.state.nodes.iter().map(|n| n.address.clone()).collect();

        for _ in 0..20 {
            let (address, pid) = LoadBalancer::route_read(&tc.state, "some-key").unwrap();
            assert_eq!(pid, tc.partition_id);
            assert!(addresses.contains(&address));
        }
    }

    #[test]
    fn test_read_skips_unhealthy_and_syncing_replicas() {
        let mut tc = cluster(3);
        role_of(&mut tc.state, &tc.nodes[0], &tc.partition_id).status = HealthStatus::Unhealthy;
        role_of(&mut tc.state, &tc.nodes[1], &tc.partition_id).syncing = true;

        for _ in 0..20 {
            let (address, _) = LoadBalancer::route_read(&tc.state, "some-key").unwrap();
            assert_eq!(address, tc.state.nodes[2].address);
        }
    }

    #[test]
    fn test_read_fails_without_any_healthy_replica() {
        let mut tc = cluster(2);
        for id in tc.nodes.clone() {
            role_of(&mut tc.state, &id, &tc.partition_id).status = HealthStatus::Unhealthy;
        }

        let err = LoadBalancer::route_read(&tc.state, "some-key").unwrap_err();
        assert!(matches!(err, KvError::ReplicaUnavailable(_)));
    }

    #[test]
    fn test_empty_ring_is_reported() {
        let state = ClusterState::default();
        assert!(matches!(
            LoadBalancer::route_read(&state, "k").unwrap_err(),
            KvError::RingEmpty
        ));
        assert!(matches!(
            LoadBalancer::route_write(&state, "k").unwrap_err(),
            KvError::RingEmpty
        ));
    }

    // ============================================================
    // STATE INTAKE
    // ============================================================

    #[test]
    fn test_set_state_swaps_the_snapshot() {
        let balancer = LoadBalancer::new("http://127.0.0.1:9090".to_string());
        assert!(balancer.snapshot().nodes.is_empty());

        let tc = cluster(2);
        balancer.set_state(tc.state.clone());
        assert_eq!(balancer.snapshot().nodes.len(), 2);
        assert_eq!(*balancer.snapshot(), tc.state);
    }
}
