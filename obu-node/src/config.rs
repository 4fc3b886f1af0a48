//! Environment-driven configuration, in the style of
//! `UwbHubConfig::default()`: no config crate, just
//! `std::env::var(...).ok().and_then(|v| v.parse().ok()).unwrap_or(default)`.

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct ObuConfig {
    pub obu_id: String,
    pub rbc_id: String,
    pub train_id: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub total_sections: u32,
    pub root_key1: u64,
    pub root_key2: u64,
    pub root_key3: u64,
}

impl Default for ObuConfig {
    fn default() -> Self {
        Self {
            obu_id: env_string_or("OBU_ID", "obu-1"),
            rbc_id: env_string_or("RBC_ID", "rbc-1"),
            train_id: env_string_or("TRAIN_ID", "train-1"),
            mqtt_host: env_string_or("MQTT_HOST", "localhost"),
            mqtt_port: env_or("MQTT_PORT", 1883),
            total_sections: env_or("TOTAL_SECTIONS", 3),
            root_key1: env_or("ROOT_KEY1", 0x1111_1111_1111_1111),
            root_key2: env_or("ROOT_KEY2", 0x2222_2222_2222_2222),
            root_key3: env_or("ROOT_KEY3", 0x3333_3333_3333_3333),
        }
    }
}
