//! Deterministic names shared by the API, the worker, and the brokers.

use rand::Rng;

/// Prefix of every externally visible job id.
pub const EXTERNAL_ID_PREFIX: &str = "RTQCC";

const EXTERNAL_ID_SUFFIX_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Pub/sub channel carrying a job's lifecycle events.
pub fn job_channel(external_id: &str) -> String {
    format!("job:{external_id}:events")
}

/// Pub/sub channel carrying control messages (cancellation) for a job.
pub fn control_channel(external_id: &str) -> String {
    format!("job:{external_id}:control")
}

/// Key marking that a job has an unacknowledged queue entry.
pub fn outstanding_key(external_id: &str) -> String {
    format!("job:{external_id}:outstanding")
}

/// Generate a new external job id: `RTQCC-<unix ms>-<7 base36 chars>`.
pub fn generate_external_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..EXTERNAL_ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!(
        "{EXTERNAL_ID_PREFIX}-{}-{suffix}",
        chrono::Utc::now().timestamp_millis()
    )
}

/// Validate the shape of an external id received from a caller.
pub fn is_valid_external_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
