mod auto_stop;
mod config;
mod session;

use std::time::Duration;

use etcs_core::clock::now_ms;
use etcs_core::engine::{Qos, MIN_MESSAGE_INTERVAL_MS};
use etcs_types::{topics, Au2Wire, EtcsMessage};
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use tracing::{error, info, warn};

use auto_stop::AutoStopCoordinator;
use config::ObuConfig;
use session::ObuSession;

/// Open Question resolved: `HANDSHAKE_INITIATED` waits at most this long
/// for AU2 before retrying with a fresh AU1, per SPEC_FULL.md §5.
const HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

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
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "obu_node=info,rumqttc=warn".into()))
        .init();

    let config = ObuConfig::default();
    info!(obu_id = %config.obu_id, rbc_id = %config.rbc_id, "OBU node starting");

    let mut mqtt_options = MqttOptions::new(config.obu_id.clone(), config.mqtt_host.clone(), config.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(10));
    let (client, mut event_loop) = AsyncClient::new(mqtt_options, 64);

    for topic in [
        topics::handshake_au2(&config.rbc_id),
        topics::rbc_out(&config.rbc_id),
        topics::sensor(&config.rbc_id),
        topics::AI_ALERT.to_string(),
        topics::VIDEO_PING.to_string(),
    ] {
        if let Err(err) = client.subscribe(&topic, QoS::AtLeastOnce).await {
            error!(topic, error = %err, "subscribe failed");
        }
    }

    let mut session = ObuSession::new(&config);
    let mut auto_stop = AutoStopCoordinator::new();

    let mut handshake_deadline = Some(now_ms() + HANDSHAKE_TIMEOUT_MS);
    restart_handshake(&client, &config, &mut session).await;

    let mut pump_interval = tokio::time::interval(Duration::from_millis(MIN_MESSAGE_INTERVAL_MS));
    let mut ma_interval = tokio::time::interval(Duration::from_secs(1));
    let mut heartbeat_interval = tokio::time::interval(Duration::from_secs(30));
    let mut mission_terminate_at: Option<u64> = None;

    loop {
        tokio::select! {
            event = event_loop.poll() => {
                match event {
                    Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                        handle_publish(&client, &config, &mut session, &mut auto_stop, &mut mission_terminate_at, &mut handshake_deadline, &publish.topic, &publish.payload).await;
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
                if let Some(deadline) = mission_terminate_at {
                    if now_ms() >= deadline {
                        mission_terminate_at = None;
                        session.finish_mission(now_ms());
                    }
                }
                if let Some(deadline) = handshake_deadline {
                    if session.state_machine.state() != etcs_types::SessionState::HandshakeInitiated {
                        handshake_deadline = None;
                    } else if now_ms() >= deadline {
                        warn!("handshake timed out waiting for AU2, retrying");
                        session.state_machine.transition(etcs_types::Event::Timeout, now_ms());
                        restart_handshake(&client, &config, &mut session).await;
                        handshake_deadline = Some(now_ms() + HANDSHAKE_TIMEOUT_MS);
                    }
                }
            }
            _ = ma_interval.tick() => {
                session.maybe_send_ma_request(0, now_ms());
            }
            _ = heartbeat_interval.tick() => {
                info!(state = ?session.state_machine.state(), queue_len = session.engine.queue_len(), "heartbeat");
            }
        }
    }
}

async fn restart_handshake(client: &AsyncClient, config: &ObuConfig, session: &mut ObuSession) {
    let au1 = session.begin_handshake(now_ms());
    if let Ok(payload) = serde_json::to_vec(&au1) {
        let _ = client.publish(topics::handshake_au1(&config.rbc_id), QoS::AtLeastOnce, false, payload).await;
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

async fn handle_publish(
    client: &AsyncClient,
    config: &ObuConfig,
    session: &mut ObuSession,
    auto_stop: &mut AutoStopCoordinator,
    mission_terminate_at: &mut Option<u64>,
    handshake_deadline: &mut Option<u64>,
    topic: &str,
    payload: &[u8],
) {
    let now = now_ms();

    if topic == topics::handshake_au2(&config.rbc_id) {
        let Ok(au2) = serde_json::from_slice::<Au2Wire>(payload) else {
            warn!("malformed AU2 payload");
            return;
        };
        if let Some(key_update) = session.on_au2(&au2, now).await {
            *handshake_deadline = None;
            if let Ok(bytes) = serde_json::to_vec(&key_update) {
                let _ = client.publish(topics::obu_keys(&config.rbc_id), QoS::AtLeastOnce, false, bytes).await;
            }
        }
        return;
    }

    if topic == topics::rbc_out(&config.rbc_id) {
        // `rbc/<id>/out` also carries the RBC's own raw, non-safety-wrapped
        // publish to this same topic (spec's ETCS plane). Only a message
        // that already deserializes with `origin == Source::Wire` — set
        // exclusively by the bridge's reverse leg — passes `gate_inbound`;
        // trust the field the wire carries rather than stamping it here.
        let Ok(msg) = serde_json::from_slice::<EtcsMessage>(payload) else {
            warn!("malformed inbound ETCS message");
            return;
        };
        let was_terminated = session.state_machine.state() == etcs_types::SessionState::SessionTerminated;
        if let Err(err) = session.handle_inbound(msg, now).await {
            warn!(error = %err, "inbound message rejected");
        }
        if !was_terminated && session.state_machine.state() == etcs_types::SessionState::SessionTerminated {
            *mission_terminate_at = Some(now + 1_000);
        }
        return;
    }

    if topic == topics::sensor(&config.rbc_id) {
        if let Ok(text) = std::str::from_utf8(payload) {
            session.handle_sensor_event(text.trim(), now);
        }
        return;
    }

    if topic == topics::AI_ALERT {
        if let Some(alert) = auto_stop::parse_alert(payload) {
            if let Some(status) = auto_stop.evaluate(&alert, now) {
                let _ = client.publish(topics::TRAIN_ACTUATOR, QoS::AtLeastOnce, false, b"0".to_vec()).await;
                if let Ok(bytes) = serde_json::to_vec(&status) {
                    let _ = client.publish(topics::obu_status(&config.train_id), QoS::AtLeastOnce, false, bytes).await;
                }
            }
        }
        return;
    }

    if topic == topics::VIDEO_PING {
        let _ = client.publish(topics::VIDEO_PONG, QoS::AtMostOnce, false, payload.to_vec()).await;
    }
}
