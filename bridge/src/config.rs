fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub rbc_id: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub amqp_url: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rbc_id: env_string_or("RBC_ID", "rbc-1"),
            mqtt_host: env_string_or("MQTT_HOST", "localhost"),
            mqtt_port: env_or("MQTT_PORT", 1883),
            amqp_url: env_string_or("AMQP_URL", "amqp://127.0.0.1:5672/%2f"),
        }
    }
}
