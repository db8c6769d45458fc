//! APDU backend/device selection.
//!
//! Selecting a backend always removes the device selector key learned for
//! the previous backend first, so a stale device id can never reach a
//! different backend.

use crate::client::LpacClient;
use crate::env::APDU_BACKEND_KEY;
use crate::error::EngineError;
use crate::types::{ApduCatalog, BackendSelection};

impl LpacClient {
    /// The device selector key of the currently selected backend, if known.
    pub fn device_selector_key(&self) -> Option<String> {
        self.device_key
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Adopt `catalog` as the current backend's and read back the device
    /// already stored under its selector key.
    fn adopt(&self, catalog: ApduCatalog) -> BackendSelection {
        let key = if catalog.devices.is_empty() || catalog.selector_key.is_empty() {
            None
        } else {
            Some(catalog.selector_key.clone())
        };
        let current_device = key
            .as_deref()
            .and_then(|k| self.get_env_key(k))
            .filter(|d| !d.is_empty());
        *self.device_key.lock().unwrap_or_else(|e| e.into_inner()) = key;
        BackendSelection {
            catalog,
            current_device,
        }
    }

    /// Switch to `backend` and list its devices.
    ///
    /// An empty catalog means the backend has no device list to offer.
    pub async fn select_apdu_backend(&self, backend: &str) -> BackendSelection {
        let previous = self
            .device_key
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(key) = previous {
            self.del_env_key(&key);
        }
        self.set_env_key(APDU_BACKEND_KEY, backend);

        let catalog = self.list_apdu_devices().await;
        self.adopt(catalog)
    }

    /// Store `device` under the selector key of the current backend.
    ///
    /// Returns false when no selector key is known.
    pub fn select_apdu_device(&self, device: &str) -> bool {
        match self.device_selector_key() {
            Some(key) => {
                self.set_env_key(&key, device);
                true
            }
            None => {
                self.logger()
                    .warn(&format!("No device list for the current backend, ignoring device {}", device));
                false
            }
        }
    }

    /// Re-adopt the backend already present in the environment.
    ///
    /// Returns `None` when no backend is set or the engine no longer offers
    /// it. The environment is left untouched.
    pub async fn restore_apdu_backend(&self) -> Result<Option<BackendSelection>, EngineError> {
        let drivers = self.list_drivers().await?;
        let Some(backend) = self.get_env_key(APDU_BACKEND_KEY) else {
            return Ok(None);
        };
        if !drivers.apdu_backends.contains(&backend) {
            self.logger().warn(&format!(
                "Stored APDU backend {} is not offered by the engine",
                backend
            ));
            return Ok(None);
        }

        let catalog = self.list_apdu_devices().await;
        Ok(Some(self.adopt(catalog)))
    }
}
