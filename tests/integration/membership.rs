//! Membership churn: what happens when a master or minion drops off.

use scatter_control::Role;

use crate::harness::{settle, TestNet};

#[tokio::test]
async fn losing_the_master_promotes_the_minion() {
    let mut net = TestNet::new();
    let master = net.spawn_node().await;
    let minion = net.spawn_node().await;
    net.connect(&minion, &master).await;
    assert_eq!(minion.role().await, Role::Minion);

    minion.handle.name_lost(&master.name);
    settle().await;

    assert_eq!(minion.role().await, Role::Master);
    // The departed master lives on in the found set for the grace period.
    assert!(minion.status().await.found_node_count >= 1);
}

#[tokio::test]
async fn losing_the_only_minion_pulls_radio_work_back() {
    let mut net = TestNet::new();
    let master = net.spawn_node().await;
    let minion = net.spawn_node().await;
    net.connect(&minion, &master).await;

    master.find("org.test");
    settle().await;
    assert!(minion.radio.is_finding());
    assert!(!master.radio.is_finding());

    master.handle.name_lost(&minion.name);
    settle().await;

    assert_eq!(master.status().await.direct_minions, 0);
    assert!(
        master.radio.is_finding(),
        "the master should take the find back itself"
    );
}

#[tokio::test]
async fn a_departed_minion_shrinks_the_group() {
    let mut net = TestNet::new();
    let master = net.spawn_node().await;
    let a = net.spawn_node().await;
    let b = net.spawn_node().await;
    net.connect(&a, &master).await;
    net.connect(&b, &master).await;
    assert_eq!(master.status().await.node_count, 3);

    master.handle.name_lost(&a.name);
    settle().await;

    let status = master.status().await;
    assert_eq!(status.direct_minions, 1);
    assert_eq!(status.node_count, 2);
    assert_eq!(b.role().await, Role::Minion);
}
