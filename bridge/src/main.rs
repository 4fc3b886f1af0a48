mod config;
mod meta;

use std::sync::Arc;
use std::time::Duration;

use etcs_core::clock::now_ms;
use etcs_core::safety::{self, Direction, SafetyError, SessionKeyStore};
use etcs_types::{topics, EtcsMessage, KeyUpdateWire, SessionKeys, Source, TemplateTable};
use futures_util::stream::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use tracing::{error, info, warn};

use config::BridgeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "bridge=info,rumqttc=warn,lapin=warn".into()))
        .init();

    let config = BridgeConfig::default();
    info!(rbc_id = %config.rbc_id, "bridge starting");

    let mut mqtt_options = MqttOptions::new(format!("bridge-{}", config.rbc_id), config.mqtt_host.clone(), config.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(10));
    let (mqtt_client, mqtt_event_loop) = AsyncClient::new(mqtt_options, 64);

    for topic in [topics::rbc_in(&config.rbc_id), topics::rbc_out(&config.rbc_id), topics::obu_keys(&config.rbc_id)] {
        mqtt_client.subscribe(&topic, QoS::AtLeastOnce).await?;
    }

    let amqp_connection = Connection::connect(&config.amqp_url, ConnectionProperties::default()).await?;
    let amqp_channel = amqp_connection.create_channel().await?;
    for queue in [topics::QUEUE_OBU_TO_RBC, topics::QUEUE_RBC_TO_OBU] {
        amqp_channel.queue_declare(queue, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default()).await?;
    }

    let keys = SessionKeyStore::new();
    let table = Arc::new(TemplateTable::standard());

    let forward = tokio::spawn(run_forward(mqtt_event_loop, amqp_channel.clone(), keys.clone(), table.clone(), config.clone()));
    let reverse = tokio::spawn(run_reverse(mqtt_client, amqp_channel, table, config.clone(), keys));

    tokio::select! {
        result = forward => {
            if let Err(err) = result {
                error!(error = %err, "forward task panicked");
            }
        }
        result = reverse => {
            if let Err(err) = result {
                error!(error = %err, "reverse task panicked");
            }
        }
    }

    Ok(())
}

/// MQTT -> AMQP: wraps each ETCS message behind the safety layer and a
/// metadata trailer, then publishes it onto the durable queue matching
/// its direction. Drops anything already carrying `origin == "amqp"`
/// (it arrived via the reverse hop) to break the loop.
async fn run_forward(
    mut event_loop: rumqttc::EventLoop,
    channel: Channel,
    keys: SessionKeyStore,
    table: Arc<TemplateTable>,
    config: BridgeConfig,
) {
    loop {
        match event_loop.poll().await {
            Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                forward_one(&channel, &keys, &table, &config, &publish.topic, &publish.payload).await;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "mqtt event loop error in forward task");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn forward_one(channel: &Channel, keys: &SessionKeyStore, table: &TemplateTable, config: &BridgeConfig, topic: &str, payload: &[u8]) {
    if topic == topics::obu_keys(&config.rbc_id) {
        let Ok(key_update) = serde_json::from_slice::<KeyUpdateWire>(payload) else {
            warn!("malformed KEY_UPDATE payload");
            return;
        };
        keys.set(SessionKeys::new(key_update.ks1, key_update.ks2, key_update.ks3)).await;
        return;
    }

    let Ok(msg) = serde_json::from_slice::<EtcsMessage>(payload) else {
        warn!(topic, "malformed ETCS message on forward leg");
        return;
    };
    if msg.origin == Source::Wire {
        return;
    }

    let (dir, queue) = if topic.contains("/in") {
        (Direction::ObuToRbc, topics::QUEUE_OBU_TO_RBC)
    } else {
        (Direction::RbcToObu, topics::QUEUE_RBC_TO_OBU)
    };

    let Some(template) = table.by_nid(msg.nid_message) else {
        warn!(nid = msg.nid_message, "no template for NID, dropping");
        return;
    };

    let values = msg.to_payload_values();
    let pdu = match safety::wrap(template, &values, dir, table, keys).await {
        Ok(pdu) => pdu,
        Err(err) => {
            warn!(error = %err, nid = msg.nid_message, "failed to wrap message for durable queue");
            return;
        }
    };

    let mut bytes = pdu.to_bytes();
    meta::append(&mut bytes, &msg);

    if let Err(err) = channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            &bytes,
            BasicProperties::default().with_delivery_mode(2),
        )
        .await
    {
        error!(error = %err, queue, "amqp publish failed");
    }
}

/// AMQP -> MQTT: strips the metadata trailer, unwraps the safety PDU,
/// reconstructs a typed `EtcsMessage`, and republishes it for the peer
/// orchestrator to pick up off the shared broker. Acknowledges every
/// delivery regardless of decode outcome: malformed or tampered PDUs are
/// logged and dropped, never requeued (they would only fail again).
async fn run_reverse(mqtt_client: AsyncClient, channel: Channel, table: Arc<TemplateTable>, config: BridgeConfig, keys: SessionKeyStore) {
    let obu_to_rbc = tokio::spawn(consume_queue(
        channel.clone(),
        topics::QUEUE_OBU_TO_RBC,
        topics::rbc_in(&config.rbc_id),
        mqtt_client.clone(),
        table.clone(),
        keys.clone(),
    ));
    let rbc_to_obu = tokio::spawn(consume_queue(
        channel,
        topics::QUEUE_RBC_TO_OBU,
        topics::rbc_out(&config.rbc_id),
        mqtt_client,
        table,
        keys,
    ));

    let _ = tokio::join!(obu_to_rbc, rbc_to_obu);
}

async fn consume_queue(channel: Channel, queue: &'static str, publish_topic: String, mqtt_client: AsyncClient, table: Arc<TemplateTable>, keys: SessionKeyStore) {
    let consumer = match channel
        .basic_consume(queue, &format!("bridge-{queue}"), BasicConsumeOptions::default(), FieldTable::default())
        .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            error!(error = %err, queue, "failed to start amqp consumer");
            return;
        }
    };

    let mut consumer = consumer;
    while let Some(delivery) = consumer.next().await {
        let Ok(delivery) = delivery else {
            continue;
        };
        reverse_one(&delivery.data, &publish_topic, &mqtt_client, &table, &keys).await;
        if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
            warn!(error = %err, "failed to ack amqp delivery");
        }
    }
}

async fn reverse_one(bytes: &[u8], publish_topic: &str, mqtt_client: &AsyncClient, table: &TemplateTable, keys: &SessionKeyStore) {
    let (pdu_bytes, trailer) = meta::extract(bytes);

    let (nid, values) = match safety::unwrap(pdu_bytes, table, keys).await {
        Ok(decoded) => decoded,
        Err(SafetyError::NoKeys) => {
            warn!("no session keys installed yet, dropping queued message");
            return;
        }
        Err(err) => {
            warn!(error = %err, "failed to unwrap queued message");
            return;
        }
    };

    let mut msg = EtcsMessage::from_wire_payload(nid, values, now_ms());
    if let Some(trailer) = trailer {
        msg.t_train = trailer.t_train;
        msg.t_train_ack = trailer.t_train_ack;
        msg.t_app_ms = trailer.t_app_ms.unwrap_or(msg.t_app_ms);
        msg.t_send_ms = trailer.t_send_ms.unwrap_or(msg.t_send_ms);
        msg.extra = trailer.extra;
    }

    match serde_json::to_vec(&msg) {
        Ok(payload) => {
            if let Err(err) = mqtt_client.publish(publish_topic, QoS::ExactlyOnce, false, payload).await {
                error!(error = %err, publish_topic, "mqtt republish failed");
            }
        }
        Err(err) => error!(error = %err, "failed to serialize reconstructed message"),
    }
}
