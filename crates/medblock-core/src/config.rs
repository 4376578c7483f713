//! Store configuration

use medblock_query::DeletePolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the durable blobs
    pub data_dir: PathBuf,
    /// Blob key of the database image
    pub image_key: String,
    /// Blob key of the execution log
    pub query_log_key: String,
    /// Broadcast topic shared by all views
    pub channel_name: String,
    /// Whether `delete` statements are allowed through the query console
    pub delete_policy: DeletePolicy,
    /// Insert the sample patients when a fresh schema is created
    pub seed_sample_data: bool,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            image_key: "database_binary".to_string(),
            query_log_key: "query_log".to_string(),
            channel_name: medblock_bus::DEFAULT_CHANNEL.to_string(),
            delete_policy: DeletePolicy::Allow,
            seed_sample_data: true,
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("MedBlock"))
            .unwrap_or_else(|| PathBuf::from(".medblock"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_key == self.query_log_key {
            return Err(CoreError::Config(format!(
                "image and query log share the blob key '{}'",
                self.image_key
            )));
        }
        if self.channel_name.trim().is_empty() {
            return Err(CoreError::Config("channel name cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new(PathBuf::from("/tmp/medblock"));
        assert_eq!(config.image_key, "database_binary");
        assert_eq!(config.channel_name, "patient_db_channel");
        assert_eq!(config.delete_policy, DeletePolicy::Allow);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_shared_keys() {
        let mut config = Config::new(PathBuf::from("/tmp/medblock"));
        config.query_log_key = config.image_key.clone();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut config = Config::new(PathBuf::from("/tmp/medblock"));
        config.delete_policy = DeletePolicy::Reject;

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""delete_policy":"reject""#));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.delete_policy, DeletePolicy::Reject);
    }
}
