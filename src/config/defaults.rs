use super::*;

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            web_level: None,
            file: "/tmp/devgate.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for GatewayDefaults {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 2000,
            connect_timeout_ms: 5000,
            probe_timeout_ms: 5000,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
            gateway: GatewayDefaults::default(),
            devices: Vec::new(),
        }
    }
}
