use crate::cache::{DEFAULT_RECENT_CAPACITY, DEFAULT_SWEEP_INTERVAL};
use crate::core::{EntityError, Result};
use serde::{Deserialize, Serialize};

/// Entity manager configuration.
///
/// Passed to `EntityManager::new`; there is no process-wide default instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Capacity of the strongly held recent-entity cache
    pub recent_capacity: usize,

    /// Minimum operations between sweeps of cleared identity-map entries
    pub sweep_interval: usize,

    /// Timestamp field refreshed (RFC 3339, UTC) on every write to storage
    pub touch_field: Option<String>,

    /// Write to storage even when the only change is the touch timestamp
    pub write_empty_updates: bool,
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self {
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            touch_field: None,
            write_empty_updates: false,
        }
    }

    /// Set the recent cache capacity
    pub fn recent_capacity(mut self, capacity: usize) -> Self {
        self.recent_capacity = capacity;
        self
    }

    /// Set the identity-map sweep interval
    pub fn sweep_interval(mut self, interval: usize) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the timestamp field refreshed on every write
    pub fn touch_field(mut self, field: &str) -> Self {
        self.touch_field = Some(field.to_string());
        self
    }

    /// Write timestamp-only updates instead of skipping them
    pub fn write_empty_updates(mut self, enabled: bool) -> Self {
        self.write_empty_updates = enabled;
        self
    }

    /// Parse from JSON; missing keys take their defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// # use entitycache::ManagerConfig;
    /// let config = ManagerConfig::from_json(r#"{ "recent_capacity": 32 }"#).unwrap();
    /// assert_eq!(config.recent_capacity, 32);
    /// assert_eq!(config.touch_field, None);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EntityError::Config(e.to_string()))?;
        config.validate().map_err(EntityError::Config)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.recent_capacity == 0 {
            return Err("recent_capacity must be > 0".to_string());
        }

        if self.sweep_interval == 0 {
            return Err("sweep_interval must be > 0".to_string());
        }

        if matches!(&self.touch_field, Some(field) if field.trim().is_empty()) {
            return Err("touch_field cannot be empty".to_string());
        }

        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.recent_capacity, 10);
        assert_eq!(config.sweep_interval, DEFAULT_SWEEP_INTERVAL);
        assert!(!config.write_empty_updates);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ManagerConfig::new()
            .recent_capacity(2)
            .touch_field("updatedon")
            .write_empty_updates(true);

        assert_eq!(config.recent_capacity, 2);
        assert_eq!(config.touch_field.as_deref(), Some("updatedon"));
        assert!(config.write_empty_updates);
    }

    #[test]
    fn test_validation() {
        assert!(ManagerConfig::new().recent_capacity(0).validate().is_err());
        assert!(ManagerConfig::new().sweep_interval(0).validate().is_err());
        assert!(ManagerConfig::new().touch_field(" ").validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let config = ManagerConfig::from_json(
            r#"{ "recent_capacity": 4, "touch_field": "updatedon" }"#,
        )
        .unwrap();
        assert_eq!(config.recent_capacity, 4);
        assert_eq!(config.touch_field.as_deref(), Some("updatedon"));
        assert_eq!(config.sweep_interval, DEFAULT_SWEEP_INTERVAL);

        let err = ManagerConfig::from_json(r#"{ "recent_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, EntityError::Config(_)));
        assert!(ManagerConfig::from_json("not json").is_err());
    }
}
