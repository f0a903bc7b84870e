//! Persistent configuration store.
//!
//! The [`DeviceConfig`] is serialized with postcard into a single NVS
//! blob. Every load and save goes through [`DeviceConfig::validate`], so
//! a corrupted or hand-injected blob can never zero the debounce window
//! or blank the broker address — bad data is rejected, never clamped.

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort};
use crate::config::DeviceConfig;

#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};

const NVS_NAMESPACE: &str = "raingauge";
const CONFIG_KEY: &str = "device_cfg";

/// Upper bound on the serialized blob. postcard's varint encoding keeps
/// a fully populated config well under this.
const MAX_BLOB_LEN: usize = 1024;

pub struct NvsConfigStore {
    #[cfg(target_os = "espidf")]
    nvs: EspNvs<NvsDefault>,
    #[cfg(not(target_os = "espidf"))]
    blob: Option<Vec<u8>>,
}

impl NvsConfigStore {
    #[cfg(target_os = "espidf")]
    pub fn new(partition: EspNvsPartition<NvsDefault>) -> Result<Self, ConfigError> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true).map_err(|_| ConfigError::IoError)?;
        Ok(Self { nvs })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self { blob: None }
    }

    /// Load the stored config, falling back to compiled-in defaults on
    /// first boot. Anything else (corruption, validation failure) is
    /// surfaced to the caller.
    pub fn load_or_default(&self) -> Result<DeviceConfig, ConfigError> {
        match self.load() {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound) => {
                info!("nvs: no stored config, using defaults");
                Ok(DeviceConfig::default())
            }
            Err(e) => Err(e),
        }
    }

    fn read_blob(&self) -> Result<Vec<u8>, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            let mut buf = [0u8; MAX_BLOB_LEN];
            match self.nvs.get_blob(CONFIG_KEY, &mut buf) {
                Ok(Some(data)) => Ok(data.to_vec()),
                Ok(None) => Err(ConfigError::NotFound),
                Err(_) => Err(ConfigError::IoError),
            }
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.blob.clone().ok_or(ConfigError::NotFound)
        }
    }

    fn write_blob(&mut self, data: &[u8]) -> Result<(), ConfigError> {
        if data.len() > MAX_BLOB_LEN {
            return Err(ConfigError::StorageFull);
        }
        #[cfg(target_os = "espidf")]
        {
            self.nvs
                .set_blob(CONFIG_KEY, data)
                .map_err(|_| ConfigError::StorageFull)
        }
        #[cfg(not(target_os = "espidf"))]
        {
            self.blob = Some(data.to_vec());
            Ok(())
        }
    }

    /// Overwrite the stored blob with raw bytes (corruption injection).
    #[cfg(all(test, not(target_os = "espidf")))]
    fn sim_inject(&mut self, data: &[u8]) {
        self.blob = Some(data.to_vec());
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for NvsConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigPort for NvsConfigStore {
    fn load(&self) -> Result<DeviceConfig, ConfigError> {
        let blob = self.read_blob()?;
        let config: DeviceConfig = postcard::from_bytes(&blob).map_err(|_| {
            warn!("nvs: stored config failed to deserialize");
            ConfigError::Corrupted
        })?;
        config.validate().map_err(ConfigError::ValidationFailed)?;
        Ok(config)
    }

    fn save(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::ValidationFailed)?;
        let blob = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        self.write_blob(&blob)?;
        info!("nvs: config saved ({} bytes)", blob.len());
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────────

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::config::WifiCredentials;

    #[test]
    fn first_boot_is_not_found() {
        let store = NvsConfigStore::new();
        assert_eq!(store.load().unwrap_err(), ConfigError::NotFound);
        // load_or_default papers over first boot only.
        assert!(store.load_or_default().is_ok());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let mut store = NvsConfigStore::new();
        let mut config = DeviceConfig::default();
        config.wifi_primary = WifiCredentials::new("shed-ap", "hunter22");
        config.debounce_ms = 350;
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.wifi_primary, config.wifi_primary);
        assert_eq!(loaded.debounce_ms, 350);
    }

    #[test]
    fn rejects_invalid_config_on_save() {
        let mut store = NvsConfigStore::new();
        let mut config = DeviceConfig::default();
        config.debounce_ms = 0;
        assert!(matches!(
            store.save(&config),
            Err(ConfigError::ValidationFailed(_))
        ));
        // Nothing was persisted.
        assert_eq!(store.load().unwrap_err(), ConfigError::NotFound);
    }

    #[test]
    fn corrupted_blob_is_rejected_not_clamped() {
        let mut store = NvsConfigStore::new();
        store.sim_inject(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(store.load().unwrap_err(), ConfigError::Corrupted);
        assert!(store.load_or_default().is_err());
    }

    #[test]
    fn stored_but_invalid_config_fails_validation() {
        let mut store = NvsConfigStore::new();
        let mut config = DeviceConfig::default();
        store.save(&config).unwrap();
        // Corrupt a semantic field through a fresh serialization.
        config.debounce_ms = 0;
        let blob = postcard::to_allocvec(&config).unwrap();
        store.sim_inject(&blob);
        assert!(matches!(
            store.load(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }
}
