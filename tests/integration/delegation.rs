//! Advertise and find delegation: who carries the radio work, and when it
//! rotates or comes home.

use std::time::Duration;

use scatter_control::Role;
use scatter_core::signal::Signal;

use crate::harness::{settle, TestNet};

#[tokio::test]
async fn a_lone_master_runs_its_own_radio_ops() {
    let mut net = TestNet::new();
    let a = net.spawn_node().await;

    a.advertise("org.test.a");
    a.find("org.test");
    settle().await;

    assert!(a.radio.is_advertising());
    assert!(a.radio.is_finding());
}

#[tokio::test]
async fn one_minion_takes_the_find_while_the_master_advertises() {
    let mut net = TestNet::new();
    let master = net.spawn_node().await;
    let minion = net.spawn_node().await;
    net.connect(&minion, &master).await;

    master.advertise("org.test.m");
    master.find("org.test");
    settle().await;

    assert!(master.radio.is_advertising());
    assert!(!master.radio.is_finding());
    assert!(minion.radio.is_finding());
}

#[tokio::test(start_paused = true)]
async fn rotation_moves_the_find_to_the_next_minion() {
    let mut net = TestNet::new();
    let master = net.spawn_node().await;
    let m1 = net.spawn_node().await;
    let m2 = net.spawn_node().await;
    let m3 = net.spawn_node().await;
    net.connect(&m1, &master).await;
    net.connect(&m2, &master).await;
    net.connect(&m3, &master).await;

    master.find("org.test");
    settle().await;

    assert!(m1.radio.is_finding(), "the first minion carries the find");
    assert!(!m3.radio.is_finding());

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;

    // m2 is reserved as the advertise carrier, so the find hops past it.
    assert!(m3.radio.is_finding(), "the handoff rotates to a free minion");
    assert!(!m2.radio.is_finding());
}

#[tokio::test(start_paused = true)]
async fn cancelled_advertisements_linger_for_the_grace_period() {
    let mut net = TestNet::new();
    let a = net.spawn_node().await;
    a.advertise("org.test.a");
    settle().await;
    assert!(a.radio.is_advertising());

    a.handle.signal(
        &a.name,
        Signal::CancelAdvertiseName {
            requestor: a.name.clone(),
            requestor_address: a.address,
            name: "org.test.a".to_string(),
        },
    );
    settle().await;

    // The empty-name advertisement is still on the air so that peers can
    // clean their caches.
    assert!(a.radio.is_advertising());

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;
    assert!(!a.radio.is_advertising());
}

#[tokio::test]
async fn drones_pass_delegations_further_down() {
    let mut net = TestNet::new();
    let big = net.spawn_node().await;
    let y = net.spawn_node().await;
    let z = net.spawn_node().await;
    net.connect(&y, &big).await;
    net.connect(&z, &big).await;

    let drone = net.spawn_node().await;
    let leaf = net.spawn_node().await;
    net.connect(&leaf, &drone).await;
    net.connect(&drone, &big).await;
    assert_eq!(drone.role().await, Role::Drone);

    // The master hands the find to the drone; the drone pushes it to its
    // own minion instead of doing the work itself.
    drone.handle.signal(
        &big.name,
        Signal::DelegateFind {
            result_dest: big.name.clone(),
            ignore_addrs: Vec::new(),
            duration_secs: 0,
        },
    );
    settle().await;

    assert!(!drone.radio.is_finding());
    assert!(leaf.radio.is_finding());
}
