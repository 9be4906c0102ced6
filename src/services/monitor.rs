//! Poll loop: cache hit or fetch-and-store, then publish.

use crate::cache::DaikinDataCache;
use crate::client::DeviceSource;
use crate::exporter::DaikinExporter;
use log::{error, info};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Where a cycle's documents came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleSource {
    Cache,
    Upstream,
}

/// One update cycle. Only an upstream fetch failure is returned as an error;
/// cache and publishing faults are absorbed by their owners.
pub fn update_cycle(
    cache: &DaikinDataCache,
    source: &dyn DeviceSource,
    exporter: &DaikinExporter,
    interval_secs: u64,
) -> Result<CycleSource, String> {
    info!("Checking for data");
    let (devices, origin) = match cache.load(interval_secs) {
        Some(devices) => (devices, CycleSource::Cache),
        None => {
            info!("Fetching fresh data from Daikin Cloud");
            let devices = source
                .fetch_devices()
                .map_err(|e| format!("fetching devices failed: {}", e))?;
            cache.save(&devices, interval_secs);
            (devices, CycleSource::Upstream)
        }
    };

    exporter.publish_documents(&devices);
    Ok(origin)
}

/// Runs a cycle now and then every `interval` until `shutdown` fires or its
/// sender is dropped. Cycles run sequentially on the calling thread.
pub fn run_loop(
    cache: &DaikinDataCache,
    source: &dyn DeviceSource,
    exporter: &DaikinExporter,
    interval: Duration,
    shutdown: &Receiver<()>,
) {
    info!("Scheduling updates every {} seconds", interval.as_secs());
    loop {
        let tick_start = Instant::now();

        match update_cycle(cache, source, exporter, interval.as_secs()) {
            Ok(origin) => info!("Update cycle complete (source: {:?})", origin),
            Err(e) => error!("Scheduled update failed: {}", e),
        }

        // Maintain steady cadence
        let wait = interval.saturating_sub(tick_start.elapsed());
        match shutdown.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("Poll loop stopped");
}
