mod helpers;

use bytes::Bytes;
use fleetbus::bus::{ClientId, Message, QoS};
use helpers::*;

#[tokio::test]
async fn publish_reaches_matching_subscriber() {
    let broker = setup_broker();

    let mut sub = broker.connect(ClientId::from("sub_1"), false, None);
    sub.subscribe("machines/1/telemetry", QoS::AtMostOnce).unwrap();

    let publisher = broker.connect(ClientId::from("pub_1"), false, None);
    let matched = publisher
        .publish(msg("machines/1/telemetry", "t=21.5", QoS::AtMostOnce))
        .unwrap();
    assert_eq!(matched, 1);

    let delivery = expect_delivery(&mut sub).await;
    assert_eq!(delivery.topic, "machines/1/telemetry");
    assert_eq!(delivery.payload, Bytes::from("t=21.5"));
    assert!(delivery.delivery_id.is_none());
}

#[tokio::test]
async fn wildcard_fanout_hits_every_matching_filter_once() {
    let broker = setup_broker();

    let mut exact = broker.connect(ClientId::from("exact"), false, None);
    exact.subscribe("machines/2/telemetry/data", QoS::AtMostOnce).unwrap();

    let mut plus = broker.connect(ClientId::from("plus"), false, None);
    plus.subscribe("machines/+/telemetry/data", QoS::AtMostOnce).unwrap();

    let mut hash = broker.connect(ClientId::from("hash"), false, None);
    hash.subscribe("machines/#", QoS::AtMostOnce).unwrap();

    let mut other = broker.connect(ClientId::from("other"), false, None);
    other.subscribe("machines/1/telemetry/data", QoS::AtMostOnce).unwrap();

    let publisher = broker.connect(ClientId::from("pub"), false, None);
    let matched = publisher
        .publish(msg("machines/2/telemetry/data", "{}", QoS::AtMostOnce))
        .unwrap();
    assert_eq!(matched, 3);

    expect_delivery(&mut exact).await;
    expect_delivery(&mut plus).await;
    expect_delivery(&mut hash).await;
    expect_silence(&mut other, 100).await;
}

#[tokio::test]
async fn overlapping_filters_deliver_once_per_session() {
    let broker = setup_broker();

    let mut sub = broker.connect(ClientId::from("greedy"), false, None);
    sub.subscribe("machines/#", QoS::AtMostOnce).unwrap();
    sub.subscribe("machines/+/telemetry", QoS::AtMostOnce).unwrap();

    let publisher = broker.connect(ClientId::from("pub"), false, None);
    publisher
        .publish(msg("machines/7/telemetry", "x", QoS::AtMostOnce))
        .unwrap();

    expect_delivery(&mut sub).await;
    expect_silence(&mut sub, 150).await;
}

#[tokio::test]
async fn retained_message_reaches_late_subscriber() {
    let broker = setup_broker();

    let publisher = broker.connect(ClientId::from("pub"), false, None);
    publisher
        .publish(msg("machines/3/config", "interval=5", QoS::AtMostOnce).retained())
        .unwrap();

    let mut late = broker.connect(ClientId::from("late"), false, None);
    late.subscribe("machines/+/config", QoS::AtMostOnce).unwrap();

    let delivery = expect_delivery(&mut late).await;
    assert_eq!(delivery.topic, "machines/3/config");
    assert_eq!(delivery.payload, Bytes::from("interval=5"));

    // empty retained payload clears the slot
    publisher
        .publish(Message::new("machines/3/config", Bytes::new(), QoS::AtMostOnce).retained())
        .unwrap();

    let mut later = broker.connect(ClientId::from("later"), false, None);
    later.subscribe("machines/+/config", QoS::AtMostOnce).unwrap();
    expect_silence(&mut later, 150).await;
}

#[tokio::test]
async fn second_connect_takes_over_the_session() {
    let broker = setup_broker();

    let mut first = broker.connect(ClientId::from("machine_1"), true, None);
    first.subscribe("commands/machine_1", QoS::AtMostOnce).unwrap();

    let mut second = broker.connect(ClientId::from("machine_1"), true, None);

    // the older connection's channel is closed by the takeover
    assert!(recv_timeout(&mut first, 100).await.is_none());

    let publisher = broker.connect(ClientId::from("pub"), false, None);
    publisher
        .publish(msg("commands/machine_1", "restart", QoS::AtMostOnce))
        .unwrap();

    let delivery = expect_delivery(&mut second).await;
    assert_eq!(delivery.payload, Bytes::from("restart"));

    // dropping the stale handle must not tear down the live session
    drop(first);
    assert_eq!(broker.session_count(), 2);
    publisher
        .publish(msg("commands/machine_1", "status", QoS::AtMostOnce))
        .unwrap();
    expect_delivery(&mut second).await;
}

#[tokio::test]
async fn malformed_filters_and_topics_are_rejected() {
    let broker = setup_broker();
    let handle = broker.connect(ClientId::from("strict"), false, None);

    assert!(handle.subscribe("machines/#/data", QoS::AtMostOnce).is_err());
    assert!(handle.subscribe("machines/tele+etry", QoS::AtMostOnce).is_err());
    assert!(handle.subscribe("", QoS::AtMostOnce).is_err());
    assert!(handle.subscribe("$share//machines/#", QoS::AtMostOnce).is_err());

    assert!(handle
        .publish(msg("machines/+/telemetry", "x", QoS::AtMostOnce))
        .is_err());
    assert!(handle
        .publish(msg("$share/g/machines/1", "x", QoS::AtMostOnce))
        .is_err());
}
