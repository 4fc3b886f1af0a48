mod config;
mod session;
mod topology;

use std::time::Duration;

use etcs_core::clock::now_ms;
use etcs_core::engine::{Qos, MIN_MESSAGE_INTERVAL_MS};
use etcs_types::{topics, Au1Wire, EtcsMessage};
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use config::RbcConfig;
use session::RbcSession;

fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "rbc_node=info,rumqttc=warn".into()))
        .init();

    let config = RbcConfig::default();
    info!(rbc_id = %config.rbc_id, obu_id = %config.obu_id, "RBC node starting");

    let mut mqtt_options = MqttOptions::new(format!("rbc-{}", config.rbc_id), config.mqtt_host.clone(), config.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(10));
    let (client, mut event_loop) = AsyncClient::new(mqtt_options, 64);

    for topic in [topics::handshake_au1(&config.rbc_id), topics::rbc_in(&config.rbc_id), topics::AI_ALERT.to_string()] {
        if let Err(err) = client.subscribe(&topic, QoS::AtLeastOnce).await {
            error!(topic, error = %err, "subscribe failed");
        }
    }

    let mut session = RbcSession::new(&config, topology::default_topology());

    let mut pump_interval = tokio::time::interval(Duration::from_millis(MIN_MESSAGE_INTERVAL_MS));
    let mut heartbeat_interval = tokio::time::interval(Duration::from_secs(30));
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = event_loop.poll() => {
                match event {
                    Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                        handle_publish(&client, &config, &mut session, &publish.topic, &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "mqtt event loop error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            _ = pump_interval.tick() => {
                if let Some((topic, msg)) = session.engine.pump(session.state_machine.state()) {
                    publish_message(&client, topic, msg, Qos::AtLeastOnce).await;
                }
            }
            _ = heartbeat_interval.tick() => {
                info!(state = ?session.state_machine.state(), ma_request_received = session.ma_request_received, "heartbeat");
            }
            line = stdin_lines.next_line() => {
                if let Ok(Some(command)) = line {
                    if command.trim() == "grant" {
                        if session.ma_request_received {
                            match session.grant_movement_authority(now_ms()) {
                                Ok(packet15) => info!(sections = packet15.n_iter(), l_endsection = packet15.l_endsection, "movement authority granted"),
                                Err(err) => warn!(error = %err, "failed to generate movement authority"),
                            }
                        } else {
                            warn!("no pending MA request to grant");
                        }
                    }
                }
            }
        }
    }
}

async fn publish_message(client: &AsyncClient, topic: String, msg: EtcsMessage, qos: Qos) {
    match serde_json::to_vec(&msg) {
        Ok(payload) => {
            if let Err(err) = client.publish(topic, to_mqtt_qos(qos), false, payload).await {
                error!(error = %err, "publish failed");
            }
        }
        Err(err) => error!(error = %err, "failed to serialize message"),
    }
}

async fn handle_publish(client: &AsyncClient, config: &RbcConfig, session: &mut RbcSession, topic: &str, payload: &[u8]) {
    let now = now_ms();

    if topic == topics::handshake_au1(&config.rbc_id) {
        let Ok(au1) = serde_json::from_slice::<Au1Wire>(payload) else {
            warn!("malformed AU1 payload");
            return;
        };
        let au2 = session.on_au1(&au1, now).await;
        if let Ok(bytes) = serde_json::to_vec(&au2) {
            let _ = client.publish(topics::handshake_au2(&config.rbc_id), QoS::AtLeastOnce, false, bytes).await;
        }
        return;
    }

    if topic == topics::rbc_in(&config.rbc_id) {
        // `rbc/<id>/in` also carries the OBU's own raw, non-safety-wrapped
        // publish to this same topic (spec's ETCS plane). Only a message
        // that already deserializes with `origin == Source::Wire` — set
        // exclusively by the bridge's reverse leg — passes `gate_inbound`;
        // trust the field the wire carries rather than stamping it here.
        let Ok(msg) = serde_json::from_slice::<EtcsMessage>(payload) else {
            warn!("malformed inbound ETCS message");
            return;
        };
        if let Err(err) = session.handle_inbound(msg, now).await {
            warn!(error = %err, "inbound message rejected");
        }
        return;
    }

    if topic == topics::AI_ALERT {
        let _ = client.publish(topics::AI_ACK, QoS::AtLeastOnce, false, payload.to_vec()).await;
    }
}
