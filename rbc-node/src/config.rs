fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct RbcConfig {
    pub obu_id: String,
    pub rbc_id: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub root_key1: u64,
    pub root_key2: u64,
    pub root_key3: u64,
    pub route_from: String,
    pub route_to: String,
}

impl Default for RbcConfig {
    fn default() -> Self {
        Self {
            obu_id: env_string_or("OBU_ID", "obu-1"),
            rbc_id: env_string_or("RBC_ID", "rbc-1"),
            mqtt_host: env_string_or("MQTT_HOST", "localhost"),
            mqtt_port: env_or("MQTT_PORT", 1883),
            root_key1: env_or("ROOT_KEY1", 0x1111_1111_1111_1111),
            root_key2: env_or("ROOT_KEY2", 0x2222_2222_2222_2222),
            root_key3: env_or("ROOT_KEY3", 0x3333_3333_3333_3333),
            route_from: env_string_or("ROUTE_FROM", "A"),
            route_to: env_string_or("ROUTE_TO", "E"),
        }
    }
}
