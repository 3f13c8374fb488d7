use std::env;
use std::time::Duration;

use signal_channel::RetryPolicy;

/// Negotiation timing, loaded from `DUET_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationConfig {
    /// Upper bound on every peer operation (offer, answer, descriptions, candidates).
    pub operation_timeout: Duration,
    /// Upper bound on closing the peer during hangup; the peer is abandoned after it.
    pub hangup_timeout: Duration,
    /// How long a failed send may wait for the channel to reconnect and resend once.
    pub resend_window: Duration,
    pub reconnect: RetryPolicy,
}

impl NegotiationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            operation_timeout: millis("DUET_OPERATION_TIMEOUT_MS")
                .unwrap_or(defaults.operation_timeout),
            hangup_timeout: millis("DUET_HANGUP_TIMEOUT_MS").unwrap_or(defaults.hangup_timeout),
            resend_window: millis("DUET_RESEND_WINDOW_MS").unwrap_or(defaults.resend_window),
            reconnect: RetryPolicy {
                attempts: env::var("DUET_RECONNECT_ATTEMPTS")
                    .ok()
                    .and_then(|val| val.parse().ok())
                    .filter(|attempts| *attempts > 0)
                    .unwrap_or(defaults.reconnect.attempts),
                backoff: millis("DUET_RECONNECT_BACKOFF_MS")
                    .unwrap_or(defaults.reconnect.backoff),
            },
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(10),
            hangup_timeout: Duration::from_secs(2),
            resend_window: Duration::from_secs(5),
            reconnect: RetryPolicy::default(),
        }
    }
}

fn millis(name: &str) -> Option<Duration> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            tracing::warn!(target = "negotiation", var = name, value = %raw, "ignoring invalid duration");
            None
        }
    }
}
