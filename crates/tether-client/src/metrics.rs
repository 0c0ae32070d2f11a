//! Metric name constants shared by the connection and the client.

/// Successful connects (counter).
pub const CONNECTS_TOTAL: &str = "channel_connects_total";
/// Failed connect attempts (counter, labels: reason).
pub const CONNECT_FAILURES_TOTAL: &str = "channel_connect_failures_total";
/// Established transports lost (counter).
pub const DISCONNECTIONS_TOTAL: &str = "channel_disconnections_total";
/// Whether the channel is up (gauge, 1 or 0).
pub const CONNECTED: &str = "channel_connected";
/// Inbound frames that could not be classified (counter).
pub const MALFORMED_FRAMES_TOTAL: &str = "channel_malformed_frames_total";
/// Responses with no pending entry (counter).
pub const UNMATCHED_RESPONSES_TOTAL: &str = "channel_unmatched_responses_total";
/// Outbound calls issued (counter, labels: method).
pub const OUTBOUND_REQUESTS_TOTAL: &str = "rpc_outbound_requests_total";
/// Outbound calls that failed (counter, labels: method, error_type).
pub const OUTBOUND_ERRORS_TOTAL: &str = "rpc_outbound_errors_total";
/// Outbound call latency (histogram, labels: method).
pub const OUTBOUND_DURATION_SECONDS: &str = "rpc_outbound_duration_seconds";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            CONNECTS_TOTAL,
            CONNECT_FAILURES_TOTAL,
            DISCONNECTIONS_TOTAL,
            CONNECTED,
            MALFORMED_FRAMES_TOTAL,
            UNMATCHED_RESPONSES_TOTAL,
            OUTBOUND_REQUESTS_TOTAL,
            OUTBOUND_ERRORS_TOTAL,
            OUTBOUND_DURATION_SECONDS,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name}"
            );
        }
    }
}
