use std::sync::Arc;

use tracing::warn;

use quillgate_core::services::{RateLimitError, RateLimiter};

use crate::error::GatewayError;

/// Rejection produced when a limiter reports an exceeded counter.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleReject {
    pub code: u16,
    pub message: String,
    pub retry_after: u32,
}

impl From<ThrottleReject> for GatewayError {
    fn from(reject: ThrottleReject) -> Self {
        GatewayError::new(reject.code, reject.message).with_retry_after(reject.retry_after)
    }
}

pub fn connect_throttle_key(tenant_id: &str) -> String {
    format!("{tenant_id}_OpenSocketConn")
}

pub fn submit_op_throttle_key(client_id: &str, tenant_id: &str) -> String {
    format!("{client_id}_{tenant_id}_SubmitOp")
}

/// Increments the counter for `key` on the given limiter, if any. Exceeded
/// counters surface as a typed rejection; a limiter that fails internally
/// is treated as permissive so it cannot deny service on its own.
pub fn check_throttle(
    limiter: Option<&Arc<dyn RateLimiter>>,
    key: &str,
) -> Result<(), ThrottleReject> {
    let Some(limiter) = limiter else {
        return Ok(());
    };

    match limiter.increment_count(key) {
        Ok(()) => Ok(()),
        Err(RateLimitError::Exceeded {
            code,
            message,
            retry_after,
        }) => Err(ThrottleReject {
            code,
            message,
            retry_after,
        }),
        Err(RateLimitError::Internal(err)) => {
            warn!(target: "throttling", key, error = %err, "rate limiter failure, allowing request");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenLimiter;

    impl RateLimiter for BrokenLimiter {
        fn increment_count(&self, _key: &str) -> Result<(), RateLimitError> {
            Err(RateLimitError::Internal(anyhow::anyhow!(
                "counter store unavailable"
            )))
        }
    }

    struct DenyingLimiter;

    impl RateLimiter for DenyingLimiter {
        fn increment_count(&self, _key: &str) -> Result<(), RateLimitError> {
            Err(RateLimitError::Exceeded {
                code: 429,
                message: "too many connections".to_string(),
                retry_after: 7,
            })
        }
    }

    #[test]
    fn missing_limiter_is_permissive() {
        assert!(check_throttle(None, "fluffy_OpenSocketConn").is_ok());
    }

    #[test]
    fn exceeded_counters_become_typed_rejections() {
        let limiter: Arc<dyn RateLimiter> = Arc::new(DenyingLimiter);
        let reject = check_throttle(Some(&limiter), "key").expect_err("denied");
        assert_eq!(reject.code, 429);
        assert_eq!(reject.retry_after, 7);

        let error: GatewayError = reject.into();
        assert_eq!(error.code(), 429);
        assert_eq!(error.retry_after(), Some(7));
    }

    #[test]
    fn limiter_faults_fail_open() {
        let limiter: Arc<dyn RateLimiter> = Arc::new(BrokenLimiter);
        assert!(check_throttle(Some(&limiter), "key").is_ok());
    }

    #[test]
    fn throttle_keys_follow_the_naming_scheme() {
        assert_eq!(connect_throttle_key("fluffy"), "fluffy_OpenSocketConn");
        assert_eq!(
            submit_op_throttle_key("client-1", "fluffy"),
            "client-1_fluffy_SubmitOp"
        );
    }
}
