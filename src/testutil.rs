//! Test support: device acquisition that degrades to a skip when the
//! host has no GPU adapter.

use crate::config::DbConfig;
use crate::db::Database;
use crate::device::GpuDevice;

/// A device for unit tests, or None when the host cannot provide one.
pub async fn test_device() -> Option<GpuDevice> {
    GpuDevice::open(wgpu::PowerPreference::HighPerformance)
        .await
        .ok()
}

/// A database for integration tests, or None without a usable adapter.
pub async fn open_db(config: DbConfig) -> Option<Database> {
    Database::open(config).await.ok()
}
