use crate::collectors::{DeviceId, PowerCollector};
use crate::utils::errors::HarnessError;
use log::error;
use std::time::Duration;

/// Tokens per second over `elapsed`. Zero elapsed time yields 0.0.
pub fn calculate_tps(elapsed: Duration, total_tokens: i64) -> Result<f64, HarnessError> {
    if total_tokens < 0 {
        return Err(HarnessError::InvalidMetric(
            "Total tokens cannot be negative.".to_string(),
        ));
    }

    let seconds = elapsed.as_secs_f64();
    Ok(if seconds > 0.0 {
        total_tokens as f64 / seconds
    } else {
        0.0
    })
}

/// Whitespace-separated words of a completion
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Memory in use on `device` in MB. Failed readings are logged and reported as 0.0.
pub async fn memory_usage(collector: &dyn PowerCollector, device: &DeviceId) -> f64 {
    match collector.query_memory(device).await {
        Ok(memory_mb) => memory_mb,
        Err(e) => {
            error!("Failed to read memory usage for {}: {}", device, e);
            0.0
        }
    }
}
