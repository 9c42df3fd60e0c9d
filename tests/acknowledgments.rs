//! PUBACK and SUBACK correlation, timeouts, cancellation and incoming
//! messages.

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::*;
use mqtt_quic::client::{ClientError, ClientEvent, ClientState, EventReceiver, MqttClient};
use mqtt_quic::codec::{Publish, QoS};

async fn connected_tcp(broker: &Broker) -> (MqttClient, EventReceiver) {
    let (client, mut events) = new_client(test_config(), None, Some(MockTls::new(Some(broker.clone()))), None);
    client.connect().await.unwrap();
    assert!(matches!(events.recv().await, Some(ClientEvent::Connected { .. })));
    (client, events)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_out_of_order_pubacks_resolve_their_own_publish() {
    let broker = Broker::new(Behavior {
        puback: AckMode::Reversed(3),
        ..Behavior::default()
    });
    let (client, _events) = connected_tcp(&broker).await;

    let (a, b, c) = tokio::join!(
        client.publish("device/dev-1/telemetry/a", "1", QoS::AtLeastOnce),
        client.publish("device/dev-1/telemetry/b", "2", QoS::AtLeastOnce),
        client.publish("device/dev-1/telemetry/c", "3", QoS::AtLeastOnce),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let mut ids: Vec<u16> = broker
        .publishes()
        .iter()
        .filter_map(|(_, p)| p.packet_id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);

    let stats = client.stats();
    assert_eq!(stats.messages_sent, 3);
    assert_eq!(stats.ack_latency.samples, 3);
}

#[tokio::test(start_paused = true)]
async fn test_publish_timeout_then_late_ack_is_ignored() {
    let broker = Broker::new(Behavior {
        puback: AckMode::Delayed(Duration::from_secs(8)),
        ..Behavior::default()
    });
    let (client, _events) = connected_tcp(&broker).await;

    let err = client
        .publish("device/dev-1/telemetry/temp", "21.5", QoS::AtLeastOnce)
        .await
        .unwrap_err();
    let packet_id = match &err {
        ClientError::PublishTimeout { packet_id } => *packet_id,
        other => panic!("expected timeout, got {other}"),
    };
    assert!(err.is_retryable());

    // The late PUBACK arrives and is dropped
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(client.is_connected());
    assert_eq!(client.stats().ack_latency.samples, 0);

    broker.set_behavior(|b| b.puback = AckMode::Immediate);
    client
        .publish("device/dev-1/telemetry/temp", "21.6", QoS::AtLeastOnce)
        .await
        .unwrap();

    let ids: Vec<_> = broker.publishes().iter().filter_map(|(_, p)| p.packet_id).collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], packet_id);
    assert_ne!(ids[1], packet_id);
    assert_eq!(client.stats().ack_latency.samples, 1);
}

#[tokio::test]
async fn test_qos0_needs_no_ack() {
    let broker = Broker::new(Behavior {
        puback: AckMode::Never,
        ..Behavior::default()
    });
    let (client, _events) = connected_tcp(&broker).await;

    client
        .publish("device/dev-1/telemetry/temp", "21.5", QoS::AtMostOnce)
        .await
        .unwrap();
    wait_for(|| broker.publishes().len() == 1).await;
    assert_eq!(broker.publishes()[0].1.packet_id, None);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_publishes() {
    let broker = Broker::new(Behavior {
        puback: AckMode::Never,
        ..Behavior::default()
    });
    let (client, mut events) = connected_tcp(&broker).await;

    let (first, second, ()) = tokio::join!(
        client.publish("device/dev-1/telemetry/a", "1", QoS::AtLeastOnce),
        client.publish("device/dev-1/telemetry/b", "2", QoS::AtLeastOnce),
        async {
            wait_for(|| broker.publishes().len() == 2).await;
            client.disconnect().await;
        }
    );

    assert!(matches!(first, Err(ClientError::Cancelled)));
    assert!(matches!(second, Err(ClientError::Cancelled)));
    assert!(!client.is_connected());
    assert!(!client.stats().connected);
    assert_eq!(events.recv().await, Some(ClientEvent::Disconnected));

    wait_for(|| broker.count("DISCONNECT") == 1).await;
    assert!(matches!(
        client.publish("t", "x", QoS::AtMostOnce).await,
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test]
async fn test_subscribe_returns_granted_qos() {
    let broker = Broker::new(Behavior {
        grant: Some(QoS::AtMostOnce),
        ..Behavior::default()
    });
    let (client, _events) = connected_tcp(&broker).await;

    let granted = client
        .subscribe("device/dev-1/commands/#", QoS::AtLeastOnce)
        .await
        .unwrap();
    assert_eq!(granted, QoS::AtMostOnce);
}

#[tokio::test]
async fn test_subscribe_rejected() {
    let broker = Broker::new(Behavior {
        grant: None,
        ..Behavior::default()
    });
    let (client, _events) = connected_tcp(&broker).await;

    match client.subscribe("$SYS/#", QoS::AtLeastOnce).await {
        Err(ClientError::SubscribeRejected { filter }) => assert_eq!(filter, "$SYS/#"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_incoming_publish_is_delivered_and_acknowledged() {
    let command = Publish {
        topic: "device/dev-1/commands/reboot".to_owned(),
        payload: Bytes::from_static(b"now"),
        qos: QoS::AtLeastOnce,
        packet_id: Some(7),
        retain: false,
        dup: false,
    };
    let broker = Broker::new(Behavior {
        deliver_on_subscribe: Some(command),
        ..Behavior::default()
    });
    let (client, mut events) = connected_tcp(&broker).await;

    client
        .subscribe("device/dev-1/commands/#", QoS::AtLeastOnce)
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap();
    match event {
        Some(ClientEvent::Message(message)) => {
            assert_eq!(message.topic, "device/dev-1/commands/reboot");
            assert_eq!(message.payload_str(), Some("now"));
            assert_eq!(message.qos, QoS::AtLeastOnce);
            assert_eq!(message.stream_id, 0);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    wait_for(|| broker.pubacks() == vec![(0, 7)]).await;
    let stats = client.stats();
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.bytes_received, 3);
}

#[tokio::test]
async fn test_abandoned_publish_leaves_stream_usable() {
    let broker = Broker::default();
    let (client, _events) = connected_tcp(&broker).await;

    // Larger than the pipe, so the caller gives up while it is being written
    let firmware = vec![0x41; 300 * 1024];
    let abandoned = tokio::time::timeout(
        Duration::ZERO,
        client.publish("device/dev-1/firmware", &firmware, QoS::AtLeastOnce),
    )
    .await;
    assert!(abandoned.is_err());

    client
        .publish("device/dev-1/telemetry/temp", "21.5", QoS::AtLeastOnce)
        .await
        .unwrap();
    assert!(client.is_connected());

    let publishes = broker.publishes();
    let (_, last) = publishes.last().unwrap();
    assert_eq!(last.topic, "device/dev-1/telemetry/temp");
    assert_eq!(&last.payload[..], b"21.5");
    // A queued packet is written whole or not at all
    for (_, publish) in &publishes[..publishes.len() - 1] {
        assert_eq!(publish.topic, "device/dev-1/firmware");
        assert_eq!(publish.payload.len(), firmware.len());
    }
}

#[tokio::test]
async fn test_malformed_packet_drops_connection() {
    let broker = Broker::new(Behavior {
        puback: AckMode::Malformed,
        ..Behavior::default()
    });
    let (client, mut events) = connected_tcp(&broker).await;

    let err = client
        .publish("device/dev-1/telemetry/temp", "21.5", QoS::AtLeastOnce)
        .await
        .unwrap_err();
    match &err {
        ClientError::ConnectionLost(reason) => {
            assert!(reason.contains("invalid packet type 0x00"), "{reason}");
        }
        other => panic!("expected a lost connection, got {other}"),
    }

    match events.recv().await {
        Some(ClientEvent::ConnectionLost { reason }) => assert!(reason.contains("decode error"), "{reason}"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(!client.is_connected());
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(!client.stats().connected);
    assert!(matches!(
        client.publish("t", "x", QoS::AtMostOnce).await,
        Err(ClientError::NotConnected)
    ));
}
