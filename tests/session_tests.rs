mod helpers;

use bytes::Bytes;
use fleetbus::bus::{ClientId, QoS};
use helpers::*;

#[tokio::test]
async fn persistent_session_keeps_subscriptions_across_reconnects() {
    let broker = setup_broker();

    let sub = broker.connect(ClientId::from("machine_9"), true, None);
    sub.subscribe("commands/machine_9", QoS::AtLeastOnce).unwrap();
    sub.disconnect(true);

    let mut sub = broker.connect(ClientId::from("machine_9"), true, None);
    let publisher = broker.connect(ClientId::from("pub"), false, None);
    publisher
        .publish(msg("commands/machine_9", "calibrate", QoS::AtLeastOnce))
        .unwrap();

    let delivery = expect_delivery(&mut sub).await;
    assert_eq!(delivery.payload, Bytes::from("calibrate"));
}

#[tokio::test]
async fn resumed_session_replays_unacked_deliveries_in_order() {
    let broker = setup_broker();

    let sub = broker.connect(ClientId::from("machine_9"), true, None);
    sub.subscribe("commands/machine_9", QoS::AtLeastOnce).unwrap();
    sub.disconnect(true);

    let publisher = broker.connect(ClientId::from("pub"), false, None);
    for payload in ["first", "second", "third"] {
        publisher
            .publish(msg("commands/machine_9", payload, QoS::AtLeastOnce))
            .unwrap();
    }

    let mut sub = broker.connect(ClientId::from("machine_9"), true, None);
    for expected in ["first", "second", "third"] {
        let delivery = expect_delivery(&mut sub).await;
        assert_eq!(delivery.payload, Bytes::from(expected));
        sub.acknowledge(delivery.delivery_id.unwrap());
    }
    expect_silence(&mut sub, 150).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconnect_replays_backlog_ahead_of_concurrent_publishes() {
    let broker = setup_broker();

    let sub = broker.connect(ClientId::from("machine_9"), true, None);
    sub.subscribe("commands/machine_9", QoS::AtLeastOnce).unwrap();
    sub.disconnect(true);

    let publisher = broker.connect(ClientId::from("pub"), false, None);
    for payload in ["r1", "r2", "r3"] {
        publisher
            .publish(msg("commands/machine_9", payload, QoS::AtLeastOnce))
            .unwrap();
    }

    // hammer fresh publishes from another task while the session reconnects
    let hammer_broker = broker.clone();
    let hammer = tokio::spawn(async move {
        let publisher = hammer_broker.connect(ClientId::from("hammer"), false, None);
        for i in 0..200u32 {
            publisher
                .publish(msg("commands/machine_9", &format!("n{}", i), QoS::AtLeastOnce))
                .unwrap();
            if i % 8 == 0 {
                tokio::task::yield_now().await;
            }
        }
        publisher.disconnect(true);
    });

    let mut sub = broker.connect(ClientId::from("machine_9"), true, None);
    hammer.await.unwrap();

    let mut payloads = Vec::new();
    let mut ids = std::collections::HashSet::new();
    while let Some(delivery) = recv_timeout(&mut sub, 100).await {
        let id = delivery.delivery_id.unwrap();
        assert!(ids.insert(id), "delivery {} pushed twice", id);
        payloads.push(String::from_utf8(delivery.payload.to_vec()).unwrap());
    }

    // the resumed backlog always lands before anything published concurrently
    let head: Vec<&str> = payloads[..3].iter().map(String::as_str).collect();
    assert_eq!(head, ["r1", "r2", "r3"]);
    assert_eq!(payloads.len(), 203);
}

#[tokio::test]
async fn clean_start_discards_subscriptions_and_pending() {
    let broker = setup_broker();

    let sub = broker.connect(ClientId::from("machine_9"), true, None);
    sub.subscribe("commands/machine_9", QoS::AtLeastOnce).unwrap();
    sub.disconnect(true);

    let publisher = broker.connect(ClientId::from("pub"), false, None);
    publisher
        .publish(msg("commands/machine_9", "stale", QoS::AtLeastOnce))
        .unwrap();

    let mut sub = broker.connect(ClientId::from("machine_9"), false, None);
    expect_silence(&mut sub, 150).await;

    publisher
        .publish(msg("commands/machine_9", "fresh", QoS::AtLeastOnce))
        .unwrap();
    expect_silence(&mut sub, 150).await;
}

#[tokio::test]
async fn non_persistent_session_is_purged_on_disconnect() {
    let broker = setup_broker();

    let sub = broker.connect(ClientId::from("ephemeral"), false, None);
    sub.subscribe("machines/#", QoS::AtMostOnce).unwrap();
    assert_eq!(broker.session_count(), 1);

    sub.disconnect(true);
    assert_eq!(broker.session_count(), 0);
}

#[tokio::test]
async fn unsubscribe_stops_further_deliveries() {
    let broker = setup_broker();

    let mut sub = broker.connect(ClientId::from("picky"), false, None);
    sub.subscribe("machines/+/telemetry", QoS::AtMostOnce).unwrap();

    let publisher = broker.connect(ClientId::from("pub"), false, None);
    publisher
        .publish(msg("machines/1/telemetry", "a", QoS::AtMostOnce))
        .unwrap();
    expect_delivery(&mut sub).await;

    sub.unsubscribe("machines/+/telemetry");
    publisher
        .publish(msg("machines/1/telemetry", "b", QoS::AtMostOnce))
        .unwrap();
    expect_silence(&mut sub, 150).await;
}

#[tokio::test]
async fn keepalive_watchdog_fires_the_will_of_a_silent_session() {
    use fleetbus::bus::{LivenessRecord, LivenessStatus, WillSpec};
    use fleetbus::config::BusConfig;

    let broker = setup_broker_with(BusConfig {
        keepalive_ms: 200,
        ack_timeout_ms: 60_000,
        status_prefix: "fleet/status".to_string(),
    });

    let silent = broker.connect(
        ClientId::from("silent"),
        true,
        Some(WillSpec {
            topic: "fleet/status/silent".to_string(),
            payload: LivenessRecord::new(&ClientId::from("silent"), LivenessStatus::Offline)
                .encode(),
            qos: QoS::AtMostOnce,
            retain: true,
        }),
    );

    // the session never pings, so the watchdog declares it lost and fires
    // the will; the handle stays alive the whole time
    tokio::time::sleep(std::time::Duration::from_millis(700)).await;

    let mut observer = broker.connect(ClientId::from("observer"), false, None);
    observer.subscribe("fleet/status/silent", QoS::AtMostOnce).unwrap();
    let delivery = expect_delivery(&mut observer).await;
    let record = LivenessRecord::decode(&delivery.payload).unwrap();
    assert_eq!(record.status, LivenessStatus::Offline);

    drop(silent);
}
