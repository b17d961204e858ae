//! One open device plus the capability snapshot taken when it was opened.

use memwall_device::{ComputeDevice, DeviceCapabilities, ProbeError, Result};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

pub struct DeviceSession<D: ComputeDevice> {
    device: D,
    capabilities: DeviceCapabilities,
    sync_timeout: Duration,
}

impl<D: ComputeDevice> DeviceSession<D> {
    pub fn new(device: D) -> Result<Self> {
        Self::with_timeout(device, DEFAULT_SYNC_TIMEOUT)
    }

    pub fn with_timeout(device: D, sync_timeout: Duration) -> Result<Self> {
        if sync_timeout.is_zero() {
            return Err(ProbeError::InvalidConfig("sync timeout must be positive".into()));
        }
        let capabilities = device.query()?;
        info!(
            device = %capabilities.name,
            platform = %capabilities.platform,
            backend = %capabilities.backend,
            dialect = %device.dialect(),
            "session opened"
        );
        Ok(Self {
            device,
            capabilities,
            sync_timeout,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// The snapshot taken at open time; never refreshed.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    pub fn into_device(self) -> D {
        self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memwall_backend_cpu::{HostDevice, HostDeviceOptions};

    #[test]
    fn zero_timeout_is_rejected() {
        let device = HostDevice::new(HostDeviceOptions::default()).unwrap();
        let err = DeviceSession::with_timeout(device, Duration::ZERO).err().unwrap();
        assert!(matches!(err, ProbeError::InvalidConfig(_)));
    }

    #[test]
    fn snapshot_matches_a_fresh_query() {
        let session = DeviceSession::new(HostDevice::new(HostDeviceOptions::default()).unwrap()).unwrap();
        assert_eq!(session.capabilities(), &session.device().query().unwrap());
        assert_eq!(session.sync_timeout(), DEFAULT_SYNC_TIMEOUT);
    }
}
