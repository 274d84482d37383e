//! External hash functions and the rate-limited call context

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{Call, PipelineError};

/// Failure reported by a [`Signer`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerError(pub String);

impl std::fmt::Display for SignerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SignerError {}

/// The two opaque hash functions the pipeline is built around.
///
/// Both must be deterministic in their input. `fast` may be called from any
/// number of threads at once; `slow` is only ever reached through
/// [`SignerContext::call_slow`], which serializes it.
pub trait Signer: Send + Sync {
    fn fast(&self, data: &str) -> Result<String, SignerError>;
    fn slow(&self, data: &str) -> Result<String, SignerError>;
}

/// Shared call context handed to every stage of one pipeline.
///
/// Owns the signer together with the lock that serializes slow calls, so
/// independent pipelines (and tests) never contend with each other.
#[derive(Clone)]
pub struct SignerContext {
    signer: Arc<dyn Signer>,
    slow_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for SignerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerContext").finish_non_exhaustive()
    }
}

impl SignerContext {
    pub fn new(signer: impl Signer + 'static) -> Self {
        Self::from_arc(Arc::new(signer))
    }

    pub fn from_arc(signer: Arc<dyn Signer>) -> Self {
        Self {
            signer,
            slow_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Unrestricted call to the fast hash.
    pub fn call_fast(&self, data: &str) -> Result<String, PipelineError> {
        self.signer.fast(data).map_err(|e| PipelineError::Signer {
            call: Call::Fast,
            message: e.0,
        })
    }

    /// Call the slow hash with the context-wide lock held.
    ///
    /// At most one slow call per context is in flight at any instant. The lock
    /// guards no data, so a panic in an earlier holder does not invalidate it.
    pub fn call_slow(&self, data: &str) -> Result<String, PipelineError> {
        let _guard = self
            .slow_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.signer.slow(data).map_err(|e| PipelineError::Signer {
            call: Call::Slow,
            message: e.0,
        })
    }
}

/// Default signer: CRC-32 for the fast hash, blake3 for the slow one.
///
/// The optional delays emulate a throttled backend so the effect of
/// serialization and fan-out is observable.
#[derive(Debug, Clone, Default)]
pub struct DigestSigner {
    pub fast_delay: Duration,
    pub slow_delay: Duration,
}

impl DigestSigner {
    pub fn new(fast_delay: Duration, slow_delay: Duration) -> Self {
        Self {
            fast_delay,
            slow_delay,
        }
    }
}

impl Signer for DigestSigner {
    /// IEEE CRC-32 of the input bytes as a decimal integer
    fn fast(&self, data: &str) -> Result<String, SignerError> {
        if !self.fast_delay.is_zero() {
            std::thread::sleep(self.fast_delay);
        }
        Ok(crc32fast::hash(data.as_bytes()).to_string())
    }

    fn slow(&self, data: &str) -> Result<String, SignerError> {
        if !self.slow_delay.is_zero() {
            std::thread::sleep(self.slow_delay);
        }
        Ok(blake3::hash(data.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts concurrent slow calls and remembers the peak.
    struct OverlapCounter {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl OverlapCounter {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Signer for OverlapCounter {
        fn fast(&self, data: &str) -> Result<String, SignerError> {
            Ok(data.to_string())
        }

        fn slow(&self, data: &str) -> Result<String, SignerError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(data.to_string())
        }
    }

    struct Failing;

    impl Signer for Failing {
        fn fast(&self, _: &str) -> Result<String, SignerError> {
            Err(SignerError("fast unavailable".into()))
        }

        fn slow(&self, _: &str) -> Result<String, SignerError> {
            Err(SignerError("slow unavailable".into()))
        }
    }

    #[test]
    fn slow_calls_never_overlap() {
        let counter = Arc::new(OverlapCounter::new());
        let ctx = SignerContext::from_arc(counter.clone());

        std::thread::scope(|s| {
            for i in 0..16 {
                let ctx = ctx.clone();
                s.spawn(move || ctx.call_slow(&i.to_string()).unwrap());
            }
        });

        assert_eq!(counter.calls.load(Ordering::SeqCst), 16);
        assert_eq!(counter.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn separate_contexts_do_not_share_lock() {
        let a = SignerContext::new(DigestSigner::default());
        let b = SignerContext::new(DigestSigner::default());
        assert!(!Arc::ptr_eq(&a.slow_lock, &b.slow_lock));
        assert!(Arc::ptr_eq(&a.slow_lock, &a.clone().slow_lock));
    }

    #[test]
    fn signer_errors_are_tagged_with_call() {
        let ctx = SignerContext::new(Failing);
        match ctx.call_fast("x").unwrap_err() {
            PipelineError::Signer { call, message } => {
                assert_eq!(call, Call::Fast);
                assert_eq!(message, "fast unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            ctx.call_slow("x").unwrap_err(),
            PipelineError::Signer {
                call: Call::Slow,
                ..
            }
        ));
    }

    #[test]
    fn digest_fast_is_decimal_crc32() {
        let signer = DigestSigner::default();
        assert_eq!(signer.fast("0").unwrap(), "4108050209");
        assert_eq!(signer.fast("1").unwrap(), "2212294583");
    }

    #[test]
    fn digest_slow_is_blake3_hex() {
        let signer = DigestSigner::default();
        let h = signer.slow("0").unwrap();
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, signer.slow("0").unwrap());
        assert_ne!(h, signer.slow("1").unwrap());
    }
}
