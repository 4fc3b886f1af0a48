//! Pub/sub topic and durable-queue names, per spec §6. OBU and RBC topics
//! are templated on an RBC id; the rest are fixed.

pub fn handshake_au1(rbc_id: &str) -> String {
    format!("obu/{rbc_id}/handshake")
}

pub fn handshake_au2(rbc_id: &str) -> String {
    format!("rbc/{rbc_id}/handshake")
}

pub fn obu_keys(rbc_id: &str) -> String {
    format!("obu/{rbc_id}/keys")
}

pub fn rbc_in(rbc_id: &str) -> String {
    format!("rbc/{rbc_id}/in")
}

pub fn rbc_out(rbc_id: &str) -> String {
    format!("rbc/{rbc_id}/out")
}

pub fn sensor(rbc_id: &str) -> String {
    format!("esp32/{rbc_id}/sensor")
}

pub fn obu_status(train_id: &str) -> String {
    format!("obu/{train_id}/status")
}

pub fn kpi_pos(rbc_id: &str) -> String {
    format!("kpi/{rbc_id}/pos")
}

pub const AI_ALERT: &str = "obu/ai/alert";
pub const AI_ACK: &str = "obu/ai/ack";
pub const TRAIN_ACTUATOR: &str = "obu/train";
pub const TRAIN_META: &str = "obu/train/meta";
pub const VIDEO_PING: &str = "obu/video/ping";
pub const VIDEO_PONG: &str = "obu/video/pong";

pub const QUEUE_OBU_TO_RBC: &str = "obu_to_rbc";
pub const QUEUE_RBC_TO_OBU: &str = "rbc_to_obu";

/// Magic prefix of the bridge's out-of-band metadata trailer.
pub const META_MAGIC: &[u8; 5] = b"~META";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templated_topics_substitute_the_id() {
        assert_eq!(rbc_in("rbc-1"), "rbc/rbc-1/in");
        assert_eq!(handshake_au1("rbc-1"), "obu/rbc-1/handshake");
    }
}
