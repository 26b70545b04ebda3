//! Bridge configuration.
//!
//! Names of the sandbox-side objects the generated scripts talk to, plus the
//! bounds on correlator bookkeeping. Defaults match the stock viewer page;
//! `from_env` lets a host override them with `VIEWER_BRIDGE_*` variables.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Sandbox-side object whose methods call back into the host.
    pub host_object: String,
    /// Method on `host_object` that delivers a call result.
    pub result_callback: String,
    /// Method on `host_object` that reports a not-found failure.
    pub not_found_callback: String,
    /// Method on `host_object` that delivers a viewer event.
    pub event_callback: String,
    /// Global viewer API object inside the sandbox.
    pub api_object: String,
    /// Expression holding the panorama viewer event name constants.
    pub event_namespace: String,
    /// Per-target sequence numbers wrap at this value.
    pub sequence_modulus: u32,
    /// How many unmatched callback results a target keeps around.
    pub max_orphaned_results: usize,
    /// Capacity of each viewer's event broadcast channel.
    pub event_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_object: "hostBridge".to_string(),
            result_callback: "onResult".to_string(),
            not_found_callback: "onNotFound".to_string(),
            event_callback: "onEvent".to_string(),
            api_object: "StreetSmartApi".to_string(),
            event_namespace: "StreetSmartApi.Events.panoramaViewer".to_string(),
            sequence_modulus: 1000,
            max_orphaned_results: 64,
            event_buffer: 64,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            host_object: env_str("VIEWER_BRIDGE_HOST_OBJECT", &defaults.host_object),
            result_callback: env_str("VIEWER_BRIDGE_RESULT_CALLBACK", &defaults.result_callback),
            not_found_callback: env_str(
                "VIEWER_BRIDGE_NOT_FOUND_CALLBACK",
                &defaults.not_found_callback,
            ),
            event_callback: env_str("VIEWER_BRIDGE_EVENT_CALLBACK", &defaults.event_callback),
            api_object: env_str("VIEWER_BRIDGE_API_OBJECT", &defaults.api_object),
            event_namespace: env_str("VIEWER_BRIDGE_EVENT_NAMESPACE", &defaults.event_namespace),
            sequence_modulus: env_parse("VIEWER_BRIDGE_SEQUENCE_MODULUS", defaults.sequence_modulus)?,
            max_orphaned_results: env_parse(
                "VIEWER_BRIDGE_MAX_ORPHANED_RESULTS",
                defaults.max_orphaned_results,
            )?,
            event_buffer: env_parse("VIEWER_BRIDGE_EVENT_BUFFER", defaults.event_buffer)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sequence_modulus == 0 {
            anyhow::bail!("sequence_modulus must be greater than zero");
        }
        if self.event_buffer == 0 {
            anyhow::bail!("event_buffer must be greater than zero");
        }
        Ok(())
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sequence_modulus, 1000);
        assert_eq!(config.host_object, "hostBridge");
    }

    #[test]
    fn test_zero_modulus_rejected() {
        let config = BridgeConfig {
            sequence_modulus: 0,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("VIEWER_BRIDGE_API_OBJECT", "EmbeddedApi");
        std::env::set_var("VIEWER_BRIDGE_SEQUENCE_MODULUS", "10");
        let config = BridgeConfig::from_env();
        std::env::remove_var("VIEWER_BRIDGE_API_OBJECT");
        std::env::remove_var("VIEWER_BRIDGE_SEQUENCE_MODULUS");

        let config = config.unwrap();
        assert_eq!(config.api_object, "EmbeddedApi");
        assert_eq!(config.sequence_modulus, 10);
        assert_eq!(config.result_callback, "onResult");
    }

    #[test]
    fn test_env_parse_reports_bad_values() {
        std::env::set_var("VIEWER_BRIDGE_TEST_PARSE", "many");
        let err = env_parse::<u32>("VIEWER_BRIDGE_TEST_PARSE", 3).unwrap_err();
        assert!(err.to_string().contains("VIEWER_BRIDGE_TEST_PARSE=many"));
        std::env::remove_var("VIEWER_BRIDGE_TEST_PARSE");
        assert_eq!(env_parse::<u32>("VIEWER_BRIDGE_TEST_UNSET", 3).unwrap(), 3);
    }
}
