//! Small shared helpers.

use chrono::{DateTime, Utc};

/// Human-readable ETA from progress so far.
pub fn estimate_eta(start_time: DateTime<Utc>, processed: i64, remaining: i64) -> String {
    if processed <= 0 || remaining <= 0 {
        return "--:--".to_string();
    }
    let elapsed = (Utc::now() - start_time).num_seconds().max(0) as f64;
    let per_item = elapsed / processed as f64;
    let eta = (per_item * remaining as f64).round() as i64;
    let hours = eta / 3600;
    let minutes = (eta % 3600) / 60;
    let seconds = eta % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Inference endpoint list from the environment, defaulting to localhost.
pub fn inference_api_urls() -> Vec<String> {
    std::env::var("ARGUS_INFERENCE_URLS")
        .unwrap_or_else(|_| "http://127.0.0.1:6342".to_string())
        .split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Optional endpoint weights, parallel to [`inference_api_urls`].
pub fn inference_api_url_weights() -> Option<Vec<f64>> {
    let raw = std::env::var("ARGUS_INFERENCE_URL_WEIGHTS").ok()?;
    let weights: Vec<f64> = raw
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    if weights.is_empty() {
        None
    } else {
        Some(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_formats_minutes_and_hours() {
        let start = Utc::now() - chrono::Duration::seconds(100);
        // 100s for 10 items, 10 remaining -> ~100s.
        let eta = estimate_eta(start, 10, 10);
        assert!(eta.starts_with('1') && eta.contains(':'), "eta: {eta}");
        assert_eq!(estimate_eta(start, 0, 10), "--:--");
        assert_eq!(estimate_eta(start, 10, 0), "--:--");
    }
}
