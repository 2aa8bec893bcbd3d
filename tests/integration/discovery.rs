//! Discovery flow: sightings up to the master, resolved names back down,
//! and the found-node timeout machinery.

use std::time::Duration;

use scatter_core::wire::DeviceAddress;

use crate::harness::{settle, TestNet};

#[tokio::test]
async fn sightings_flow_up_and_names_flow_down() {
    let mut net = TestNet::new();
    let master = net.spawn_node().await;
    let minion = net.spawn_node().await;
    net.connect(&minion, &master).await;

    minion.find("org.test");
    settle().await;
    assert!(minion.radio.is_finding(), "the find should be delegated");

    // An outside device comes on the air and the minion's radio spots it.
    let device = DeviceAddress::new(0xdd);
    net.net.plant_advert(device, 42, "guid-remote", &["org.test.svc"]);
    minion.sight(device, 42);
    settle().await;

    // The raw sighting went up; the resolved names came back down to the
    // searcher's application layer.
    assert_eq!(
        minion.radio.found_guids(false),
        vec!["guid-remote".to_string()]
    );
    let status = master.status().await;
    assert_eq!(status.cache_entries, 1);
    assert!(status.found_node_count >= 1);
}

#[tokio::test(start_paused = true)]
async fn unseen_devices_age_out_of_the_found_set() {
    let mut net = TestNet::new();
    let master = net.spawn_node().await;
    let minion = net.spawn_node().await;
    net.connect(&minion, &master).await;
    minion.find("org.test");
    settle().await;

    let device = DeviceAddress::new(0xdd);
    net.net.plant_advert(device, 42, "guid-remote", &["org.test.svc"]);
    minion.sight(device, 42);
    settle().await;
    assert_eq!(master.status().await.cache_entries, 1);

    tokio::time::sleep(Duration::from_secs(29)).await;
    settle().await;
    assert_eq!(
        master.status().await.cache_entries,
        1,
        "still inside the timeout window"
    );

    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;
    assert_eq!(master.status().await.cache_entries, 0);
    assert_eq!(
        minion.radio.found_guids(true),
        vec!["guid-remote".to_string()],
        "the searcher should hear that the names are gone"
    );
}

#[tokio::test(start_paused = true)]
async fn repeat_sightings_keep_a_device_alive() {
    let mut net = TestNet::new();
    let master = net.spawn_node().await;
    let minion = net.spawn_node().await;
    net.connect(&minion, &master).await;
    minion.find("org.test");
    settle().await;

    let device = DeviceAddress::new(0xdd);
    net.net.plant_advert(device, 42, "guid-remote", &["org.test.svc"]);
    minion.sight(device, 42);
    settle().await;

    tokio::time::sleep(Duration::from_secs(20)).await;
    minion.sight(device, 42);
    settle().await;

    // The original expiry lapses; the refreshed one holds the entry.
    tokio::time::sleep(Duration::from_secs(15)).await;
    settle().await;
    assert_eq!(master.status().await.cache_entries, 1);

    tokio::time::sleep(Duration::from_secs(20)).await;
    settle().await;
    assert_eq!(master.status().await.cache_entries, 0);
}
