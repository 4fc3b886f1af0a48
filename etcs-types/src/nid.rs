//! `NID_MESSAGE` identifiers, per spec §6.

pub const MA: u8 = 3;
pub const TRAIN_DATA_ACK: u8 = 8;
pub const SYSTEM_VERSION: u8 = 32;
pub const SESSION_ACK: u8 = 38;
pub const TERMINATION_ACK: u8 = 39;
pub const TRAIN_ACCEPTED: u8 = 41;
pub const TRAIN_DATA: u8 = 129;
pub const MA_REQUEST: u8 = 132;
pub const POSITION_REPORT: u8 = 136;
pub const GENERIC_ACK: u8 = 146;
pub const END_OF_MISSION: u8 = 150;
pub const VERSION_REJECT: u8 = 154;
pub const SESSION_ESTABLISH: u8 = 155;
pub const SESSION_TERMINATE: u8 = 156;
pub const TRAIN_ACCEPTANCE: u8 = 157;
pub const KEYS_AUTH: u8 = 159;

/// Fixed sensor id -> D_LRBG distance mapping (meters), per spec §6.
pub fn sensor_to_d_lrbg(sensor_id: &str) -> Option<i64> {
    match sensor_id {
        "S1" => Some(1000),
        "S2" => Some(2000),
        "S3" => Some(3000),
        "S4" => Some(4000),
        "S5" => Some(5000),
        "S6" => Some(6000),
        "S7" => Some(7000),
        "S8" => Some(8000),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_mapping_covers_s1_to_s8() {
        assert_eq!(sensor_to_d_lrbg("S1"), Some(1000));
        assert_eq!(sensor_to_d_lrbg("S8"), Some(8000));
        assert_eq!(sensor_to_d_lrbg("S9"), None);
    }
}
