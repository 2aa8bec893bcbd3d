//! Role negotiation over the state-exchange handshake.

use scatter_control::Role;

use crate::harness::TestNet;

#[tokio::test]
async fn callee_keeps_mastery_on_equal_footing() {
    let mut net = TestNet::new();
    let a = net.spawn_node().await;
    let b = net.spawn_node().await;

    net.connect(&a, &b).await;

    assert_eq!(a.role().await, Role::Minion);
    assert_eq!(b.role().await, Role::Master);
    let status = b.status().await;
    assert_eq!(status.direct_minions, 1);
    assert_eq!(status.node_count, 2);
}

#[tokio::test]
async fn a_star_forms_around_one_master() {
    let mut net = TestNet::new();
    let hub = net.spawn_node().await;
    let a = net.spawn_node().await;
    let b = net.spawn_node().await;

    net.connect(&a, &hub).await;
    net.connect(&b, &hub).await;

    assert_eq!(hub.role().await, Role::Master);
    assert_eq!(a.role().await, Role::Minion);
    assert_eq!(b.role().await, Role::Minion);
    let status = hub.status().await;
    assert_eq!(status.direct_minions, 2);
    assert_eq!(status.node_count, 3);
}

#[tokio::test]
async fn the_bigger_group_absorbs_the_smaller_as_a_drone() {
    let mut net = TestNet::new();
    let big = net.spawn_node().await;
    let y = net.spawn_node().await;
    let z = net.spawn_node().await;
    net.connect(&y, &big).await;
    net.connect(&z, &big).await;

    let small = net.spawn_node().await;
    let x = net.spawn_node().await;
    net.connect(&x, &small).await;

    // A one-minion master dialing a two-minion master concedes.
    net.connect(&small, &big).await;

    assert_eq!(big.role().await, Role::Master);
    assert_eq!(small.role().await, Role::Drone);
    assert_eq!(x.role().await, Role::Minion);

    let status = big.status().await;
    // The drone and everything behind it joined the big group.
    assert_eq!(status.direct_minions, 3);
    assert_eq!(status.node_count, 5);
}
