#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::cluster::types::{HealthStatus, MigrationStatus, NodeId, Role};
    use crate::controller::core::Controller;
    use crate::error::KvError;

    const VNODES: usize = 16;

    fn controller() -> Arc<Controller> {
        // The balancer URL points nowhere; dispatch is best-effort and the
        // failures only produce log lines.
        Controller::new(
            VNODES,
            Duration::from_secs(5),
            Duration::from_secs(2),
            "http://127.0.0.1:1".to_string(),
        )
    }

    fn cluster_of(controller: &Controller, size: usize) -> Vec<NodeId> {
        (0..size)
            .map(|i| {
                let id = controller
                    .register_node_by_address(format!("127.0.0.1:9{:03}", i))
                    .unwrap();
                controller.accept_node(id).unwrap()
            })
            .collect()
    }

    /// The structural invariants every published state must satisfy.
    fn assert_state_invariants(controller: &Controller) {
        let state = controller.get_state();

        for vn in &state.virtual_nodes {
            assert!(
                state.partitions.contains_key(&vn.partition_id),
                "virtual node points at missing partition {}",
                vn.partition_id
            );
        }
        for partition in state.partitions.values() {
            assert!(partition.members.contains(&partition.master));
            for member in &partition.members {
                let node = state.node(member).expect("member not in nodes");
                let role = node.partitions.get(&partition.id).expect("role missing");
                assert_eq!(role.is_master(), *member == partition.master);
            }
            let masters = partition
                .members
                .iter()
                .filter(|m| {
                    state.node(m).unwrap().partitions[&partition.id].is_master()
                })
                .count();
            assert_eq!(masters, 1, "exactly one master per partition");
        }
        if !state.resharding {
            assert!(state.migration_ranges.is_empty());
            assert!(state.partitions.values().all(|p| !p.migrating));
        } else {
            assert!(!state.migration_ranges.is_empty());
        }
        let sorted = state
            .virtual_nodes
            .windows(2)
            .all(|w| (w[0].hash, w[0].id) <= (w[1].hash, w[1].id));
        assert!(sorted, "virtual nodes must stay sorted");
    }

    // ============================================================
    // REGISTRY
    // ============================================================

    #[tokio::test]
    async fn test_register_and_accept_node() {
        let ctrl = controller();
        let id = ctrl
            .register_node_by_address("127.0.0.1:9000".to_string())
            .unwrap();

        let state = ctrl.get_state();
        assert_eq!(state.unregistered_nodes.len(), 1);
        assert_eq!(state.unregistered_nodes[0].status, HealthStatus::Unregistered);
        assert!(state.nodes.is_empty());

        ctrl.accept_node(id).unwrap();
        let state = ctrl.get_state();
        assert!(state.unregistered_nodes.is_empty());
        assert_eq!(state.nodes.len(), 1);
        assert_eq!(state.nodes[0].status, HealthStatus::Uninitialized);
    }

    #[tokio::test]
    async fn test_register_duplicate_address_conflicts() {
        let ctrl = controller();
        ctrl.register_node_by_address("127.0.0.1:9000".to_string())
            .unwrap();
        let err = ctrl
            .register_node_by_address("127.0.0.1:9000".to_string())
            .unwrap_err();
        assert!(matches!(err, KvError::NodeExists(_)));
    }

    #[tokio::test]
    async fn test_accept_unknown_node() {
        let ctrl = controller();
        let err = ctrl.accept_node(NodeId::new()).unwrap_err();
        assert!(matches!(err, KvError::NodeNotFound(_)));
    }

    // ============================================================
    // PARTITION COUNT
    // ============================================================

    #[tokio::test]
    async fn test_partition_count_requires_nodes() {
        let ctrl = controller();
        assert!(matches!(
            ctrl.set_partition_count(1).unwrap_err(),
            KvError::PreconditionFailed(_)
        ));
        assert!(matches!(
            ctrl.set_partition_count(0).unwrap_err(),
            KvError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn test_first_partition_spans_all_nodes() {
        let ctrl = controller();
        let nodes = cluster_of(&ctrl, 3);

        ctrl.set_partition_count(1).unwrap();
        let state = ctrl.get_state();

        assert_eq!(state.partitions.len(), 1);
        let partition = state.partitions.values().next().unwrap();
        assert_eq!(partition.members.len(), 3);
        assert_eq!(partition.master, nodes[0]);
        assert_eq!(state.virtual_nodes.len(), VNODES);
        // Creating the very first partition is not a reshard.
        assert!(!state.resharding);
        assert!(state.migration_ranges.is_empty());
        assert_state_invariants(&ctrl);
    }

    #[tokio::test]
    async fn test_growth_marks_reshard_and_emits_ranges() {
        let ctrl = controller();
        cluster_of(&ctrl, 3);
        ctrl.set_replica_count(1).unwrap();

        ctrl.set_partition_count(1).unwrap();
        ctrl.set_partition_count(2).unwrap();

        let state = ctrl.get_state();
        assert_eq!(state.partitions.len(), 2);
        assert_eq!(state.virtual_nodes.len(), 2 * VNODES);
        assert!(state.resharding);
        assert!(state.partitions.values().all(|p| p.migrating));
        assert!(!state.migration_ranges.is_empty());

        // Each range feeds the new partition from an existing one.
        let old_count = state
            .migration_ranges
            .iter()
            .filter(|r| r.source_partition_id == r.target_partition_id)
            .count();
        assert_eq!(old_count, 0);
        for range in &state.migration_ranges {
            assert_eq!(range.status, MigrationStatus::NotStarted);
            assert!(state.partitions.contains_key(&range.source_partition_id));
            assert!(state.partitions.contains_key(&range.target_partition_id));
        }

        // New partition got replica_count + 1 members.
        let state = ctrl.get_state();
        let newest = state
            .partitions
            .values()
            .find(|p| p.members.len() == 2)
            .expect("second partition has 2 members");
        assert!(newest.members.contains(&newest.master));
        assert_state_invariants(&ctrl);
    }

    #[tokio::test]
    async fn test_growth_requires_enough_nodes_for_replicas() {
        let ctrl = controller();
        let nodes = cluster_of(&ctrl, 2);
        ctrl.set_replica_count(1).unwrap();
        ctrl.set_partition_count(1).unwrap();

        // Down to one node, replica_count 1 can no longer be sustained.
        ctrl.remove_node(nodes[1]).unwrap();
        let err = ctrl.set_partition_count(2).unwrap_err();
        assert!(matches!(err, KvError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_shrink_removes_partition_and_cedes_ranges() {
        let ctrl = controller();
        cluster_of(&ctrl, 3);
        ctrl.set_partition_count(1).unwrap();
        ctrl.set_partition_count(2).unwrap();
        complete_all_ranges(&ctrl);

        ctrl.set_partition_count(1).unwrap();
        let state = ctrl.get_state();
        assert_eq!(state.partitions.len(), 1);
        assert_eq!(state.virtual_nodes.len(), VNODES);
        let survivor = state.partitions.keys().next().unwrap();
        for vn in &state.virtual_nodes {
            assert_eq!(&vn.partition_id, survivor);
        }
        assert!(state.resharding);
        assert!(!state.migration_ranges.is_empty());
        for range in &state.migration_ranges {
            // Ranges cede from the removed partition to the survivor.
            assert_ne!(&range.source_partition_id, survivor);
            assert_eq!(&range.target_partition_id, survivor);
        }
        // No node still hosts the removed partition.
        for node in &state.nodes {
            for pid in node.partitions.keys() {
                assert!(state.partitions.contains_key(pid));
            }
        }
    }

    fn complete_all_ranges(ctrl: &Controller) {
        let ranges = ctrl.get_state().migration_ranges;
        for range in ranges {
            ctrl.set_migration_status(range.id, MigrationStatus::Completed)
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_completing_all_ranges_ends_the_reshard() {
        let ctrl = controller();
        cluster_of(&ctrl, 3);
        ctrl.set_partition_count(1).unwrap();
        ctrl.set_partition_count(2).unwrap();

        assert!(ctrl.get_state().resharding);
        complete_all_ranges(&ctrl);

        let state = ctrl.get_state();
        assert!(!state.resharding);
        assert!(state.migration_ranges.is_empty());
        assert!(state.partitions.values().all(|p| !p.migrating));
        assert_state_invariants(&ctrl);
    }

    #[tokio::test]
    async fn test_unknown_migration_range() {
        let ctrl = controller();
        let err = ctrl
            .set_migration_status(uuid::Uuid::new_v4(), MigrationStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, KvError::MigrationRangeNotFound(_)));
    }

    // ============================================================
    // REPLICA COUNT
    // ============================================================

    #[tokio::test]
    async fn test_replica_count_must_stay_below_node_count() {
        let ctrl = controller();
        cluster_of(&ctrl, 2);

        ctrl.set_replica_count(1).unwrap();
        assert_eq!(ctrl.get_state().replica_count, 1);

        let err = ctrl.set_replica_count(2).unwrap_err();
        assert!(matches!(err, KvError::PreconditionFailed(_)));
    }

    // ============================================================
    // NODE REMOVAL
    // ============================================================

    #[tokio::test]
    async fn test_remove_master_promotes_survivor_and_recruits() {
        let ctrl = controller();
        let nodes = cluster_of(&ctrl, 3);
        ctrl.set_replica_count(1).unwrap();
        ctrl.set_partition_count(1).unwrap();

        // First partition spans all 3; removing the master must promote.
        ctrl.remove_node(nodes[0]).unwrap();

        let state = ctrl.get_state();
        assert_eq!(state.nodes.len(), 2);
        let partition = state.partitions.values().next().unwrap();
        assert_ne!(partition.master, nodes[0]);
        assert!(partition.members.contains(&partition.master));
        assert!(!partition.members.contains(&nodes[0]));
        let master_role = state.node(&partition.master).unwrap().partitions[&partition.id];
        assert!(master_role.is_master());
    }

    #[tokio::test]
    async fn test_remove_node_recruits_replacement_replica() {
        let ctrl = controller();
        let nodes = cluster_of(&ctrl, 4);
        ctrl.set_replica_count(1).unwrap();
        ctrl.set_partition_count(1).unwrap();
        ctrl.set_partition_count(2).unwrap();

        let state = ctrl.get_state();
        let small = state
            .partitions
            .values()
            .find(|p| p.members.len() == 2)
            .expect("second partition has 2 members")
            .clone();

        let victim = *small
            .members
            .iter()
            .find(|m| **m != small.master)
            .unwrap();
        ctrl.remove_node(victim).unwrap();

        let state = ctrl.get_state();
        let repaired = &state.partitions[&small.id];
        assert_eq!(repaired.members.len(), 2, "replication factor restored");
        assert!(!repaired.members.contains(&victim));
        let recruit = *repaired
            .members
            .iter()
            .find(|m| !small.members.contains(m))
            .expect("a replacement joined");
        let role = state.node(&recruit).unwrap().partitions[&small.id];
        assert_eq!(role.role, Role::Replica);
        assert!(role.syncing, "replacement starts out syncing");
        let _ = nodes;
    }

    #[tokio::test]
    async fn test_remove_unknown_node() {
        let ctrl = controller();
        let err = ctrl.remove_node(NodeId::new()).unwrap_err();
        assert!(matches!(err, KvError::NodeNotFound(_)));
    }

    // ============================================================
    // WORKER
    // ============================================================

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let ctrl = controller();
        ctrl.clone().start();
        ctrl.clone().start();
        ctrl.stop();
    }
}
