//! EnScrypt: time-calibrated, iterated scrypt
//!
//! Round 1 is `scrypt(password, salt)`. Every later round is
//! `scrypt(previous_round_output, "")`. The key is the XOR of all round
//! outputs. Stretching stops once both the iteration floor and the time floor
//! are met, so calibrating on one machine and reproducing with the recorded
//! iteration count (and no time floor) yields the same key anywhere.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use rand::{CryptoRng, RngCore};
use sqrl_core::{SqrlError, SqrlResult, KEY_SIZE, MAX_LOG_N, SALT_SIZE};
use zeroize::Zeroizing;

use crate::keys::DerivedKey;

/// scrypt block size. Fixed: only N varies between containers.
pub const SCRYPT_R: u32 = 256;
/// scrypt parallelism
pub const SCRYPT_P: u32 = 1;

pub const DEFAULT_LOG_N: u8 = 9;
pub const MIN_ITERATIONS_INTERACTIVE: u32 = 20;
pub const MIN_ITERATIONS_SENSITIVE: u32 = 100;
pub const MIN_SECONDS_SENSITIVE: u64 = 60;

/// Result of one EnScrypt run
#[derive(Debug)]
pub struct EnScryptOutput {
    pub iterations: u32,
    pub elapsed: Duration,
    pub key: DerivedKey,
}

/// Run EnScrypt until `iterations >= min_iterations` and
/// `elapsed >= min_duration`.
pub fn enscrypt(
    password: &[u8],
    salt: &[u8],
    log_n: u8,
    min_iterations: u32,
    min_duration: Duration,
) -> SqrlResult<EnScryptOutput> {
    enscrypt_with_progress(password, salt, log_n, min_iterations, min_duration, None)
}

/// [`enscrypt`] with an observer called after every round.
///
/// Returning `ControlFlow::Break(())` from the observer abandons the run with
/// [`SqrlError::Cancelled`].
pub fn enscrypt_with_progress(
    password: &[u8],
    salt: &[u8],
    log_n: u8,
    min_iterations: u32,
    min_duration: Duration,
    mut progress: Option<&mut dyn FnMut(u32, Duration) -> ControlFlow<()>>,
) -> SqrlResult<EnScryptOutput> {
    let params = scrypt_params(log_n)?;
    let start = Instant::now();

    let mut acc = Zeroizing::new([0u8; KEY_SIZE]);
    let mut round = Zeroizing::new([0u8; KEY_SIZE]);
    scrypt::scrypt(password, salt, &params, &mut round[..])
        .map_err(|e| SqrlError::InvalidParams(e.to_string()))?;
    xor_into(&mut acc, &round);
    let mut iterations: u32 = 1;

    loop {
        let elapsed = start.elapsed();
        if let Some(observer) = progress.as_deref_mut() {
            if observer(iterations, elapsed).is_break() {
                tracing::debug!(iterations, "enscrypt cancelled");
                return Err(SqrlError::Cancelled);
            }
        }
        if iterations >= min_iterations && elapsed >= min_duration {
            tracing::debug!(
                log_n,
                iterations,
                elapsed_ms = elapsed.as_millis() as u64,
                "enscrypt finished"
            );
            return Ok(EnScryptOutput {
                iterations,
                elapsed,
                key: DerivedKey::from_bytes(*acc),
            });
        }

        let previous = Zeroizing::new(*round);
        scrypt::scrypt(&previous[..], &[], &params, &mut round[..])
            .map_err(|e| SqrlError::InvalidParams(e.to_string()))?;
        xor_into(&mut acc, &round);
        iterations = iterations
            .checked_add(1)
            .ok_or_else(|| SqrlError::InvalidParams("iteration count overflow".into()))?;
    }
}

fn scrypt_params(log_n: u8) -> SqrlResult<scrypt::Params> {
    if log_n == 0 || log_n > MAX_LOG_N {
        return Err(SqrlError::InvalidParams(format!(
            "log_n={log_n} outside 1..={MAX_LOG_N}"
        )));
    }
    scrypt::Params::new(log_n, SCRYPT_R, SCRYPT_P, KEY_SIZE)
        .map_err(|e| SqrlError::InvalidParams(format!("log_n={log_n}: {e}")))
}

fn xor_into(acc: &mut [u8; KEY_SIZE], round: &[u8; KEY_SIZE]) {
    for (a, r) in acc.iter_mut().zip(round.iter()) {
        *a ^= r;
    }
}

/// How hard to stretch when creating new parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnScryptPolicy {
    pub log_n: u8,
    pub min_iterations: u32,
    pub min_duration: Duration,
}

impl EnScryptPolicy {
    /// Password entry: at least 20 rounds and `verify_seconds` of work.
    pub fn interactive(verify_seconds: u8) -> Self {
        Self {
            log_n: DEFAULT_LOG_N,
            min_iterations: MIN_ITERATIONS_INTERACTIVE,
            min_duration: Duration::from_secs(u64::from(verify_seconds)),
        }
    }

    /// Rescue code entry: rare, so at least 100 rounds and a full minute.
    pub fn sensitive() -> Self {
        Self {
            log_n: DEFAULT_LOG_N,
            min_iterations: MIN_ITERATIONS_SENSITIVE,
            min_duration: Duration::from_secs(MIN_SECONDS_SENSITIVE),
        }
    }
}

/// The `(salt, log_n, iterations)` triple persisted in a block's associated
/// data. Enough to reproduce the key deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnScryptParams {
    pub salt: [u8; SALT_SIZE],
    pub log_n: u8,
    pub iterations: u32,
}

impl EnScryptParams {
    /// Wire size: salt, log_n u8, iterations u32 LE
    pub const ENCODED_LEN: usize = SALT_SIZE + 1 + 4;

    /// Reproduce the key these parameters were calibrated for.
    pub fn derive(&self, password: &[u8]) -> SqrlResult<DerivedKey> {
        self.derive_with_progress(password, None)
    }

    /// [`Self::derive`] with an observer. The iteration count comes from
    /// the container, so this is the only way to abandon a block that
    /// claims an absurd amount of work.
    pub fn derive_with_progress(
        &self,
        password: &[u8],
        progress: Option<&mut dyn FnMut(u32, Duration) -> ControlFlow<()>>,
    ) -> SqrlResult<DerivedKey> {
        let out = enscrypt_with_progress(
            password,
            &self.salt,
            self.log_n,
            self.iterations,
            Duration::ZERO,
            progress,
        )?;
        Ok(out.key)
    }

    /// Draw a fresh salt and stretch `password` until `policy` is satisfied,
    /// recording the iteration count actually performed.
    pub fn calibrate<R: RngCore + CryptoRng>(
        password: &[u8],
        policy: &EnScryptPolicy,
        rng: &mut R,
        progress: Option<&mut dyn FnMut(u32, Duration) -> ControlFlow<()>>,
    ) -> SqrlResult<(Self, DerivedKey)> {
        let mut salt = [0u8; SALT_SIZE];
        rng.fill_bytes(&mut salt);

        let out = enscrypt_with_progress(
            password,
            &salt,
            policy.log_n,
            policy.min_iterations,
            policy.min_duration,
            progress,
        )?;
        let params = Self {
            salt,
            log_n: policy.log_n,
            iterations: out.iterations,
        };
        Ok((params, out.key))
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.salt);
        out.push(self.log_n);
        out.extend_from_slice(&self.iterations.to_le_bytes());
    }

    /// Parse from exactly [`Self::ENCODED_LEN`] bytes. A cost exponent
    /// outside `1..=MAX_LOG_N` is rejected here, before any stretching.
    pub fn decode(data: &[u8]) -> Result<Self, String> {
        if data.len() != Self::ENCODED_LEN {
            return Err(format!(
                "EnScrypt parameters are {} bytes (expected {})",
                data.len(),
                Self::ENCODED_LEN
            ));
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&data[..SALT_SIZE]);
        let log_n = data[SALT_SIZE];
        if log_n == 0 || log_n > MAX_LOG_N {
            return Err(format!("EnScrypt log_n {log_n} outside 1..={MAX_LOG_N}"));
        }
        let mut iterations = [0u8; 4];
        iterations.copy_from_slice(&data[SALT_SIZE + 1..]);
        Ok(Self {
            salt,
            log_n,
            iterations: u32::from_le_bytes(iterations),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // Use a tiny N for testing
    const TEST_LOG_N: u8 = 4;

    #[test]
    fn test_enscrypt_deterministic() {
        let salt = [1u8; SALT_SIZE];
        let a = enscrypt(b"test-passphrase-123", &salt, TEST_LOG_N, 5, Duration::ZERO).unwrap();
        let b = enscrypt(b"test-passphrase-123", &salt, TEST_LOG_N, 5, Duration::ZERO).unwrap();

        assert_eq!(a.iterations, 5);
        assert_eq!(b.iterations, 5);
        assert_eq!(a.key.as_bytes(), b.key.as_bytes(), "EnScrypt must be deterministic");
    }

    #[test]
    fn test_single_iteration_is_plain_scrypt() {
        let salt = [9u8; SALT_SIZE];
        let out = enscrypt(b"pw", &salt, TEST_LOG_N, 1, Duration::ZERO).unwrap();

        let params = scrypt::Params::new(TEST_LOG_N, SCRYPT_R, SCRYPT_P, KEY_SIZE).unwrap();
        let mut expected = [0u8; KEY_SIZE];
        scrypt::scrypt(b"pw", &salt, &params, &mut expected).unwrap();

        assert_eq!(out.iterations, 1);
        assert_eq!(out.key.as_bytes(), &expected);
    }

    #[test]
    fn test_later_rounds_feed_output_back_as_password() {
        let salt = [9u8; SALT_SIZE];
        let out = enscrypt(b"pw", &salt, TEST_LOG_N, 2, Duration::ZERO).unwrap();

        let params = scrypt::Params::new(TEST_LOG_N, SCRYPT_R, SCRYPT_P, KEY_SIZE).unwrap();
        let mut r1 = [0u8; KEY_SIZE];
        scrypt::scrypt(b"pw", &salt, &params, &mut r1).unwrap();
        let mut r2 = [0u8; KEY_SIZE];
        scrypt::scrypt(&r1, &[], &params, &mut r2).unwrap();
        let mut expected = r1;
        xor_into(&mut expected, &r2);

        assert_eq!(out.key.as_bytes(), &expected);
    }

    #[test]
    fn test_different_iterations_different_keys() {
        let salt = [1u8; SALT_SIZE];
        let a = enscrypt(b"pw", &salt, TEST_LOG_N, 3, Duration::ZERO).unwrap();
        let b = enscrypt(b"pw", &salt, TEST_LOG_N, 4, Duration::ZERO).unwrap();
        assert_ne!(a.key.as_bytes(), b.key.as_bytes());
    }

    #[test]
    fn test_different_salts() {
        let a = enscrypt(b"same-passphrase", &[1u8; 16], TEST_LOG_N, 2, Duration::ZERO).unwrap();
        let b = enscrypt(b"same-passphrase", &[2u8; 16], TEST_LOG_N, 2, Duration::ZERO).unwrap();
        assert_ne!(a.key.as_bytes(), b.key.as_bytes(), "different salts must produce different keys");
    }

    #[test]
    fn test_time_floor_is_honoured() {
        let floor = Duration::from_millis(150);
        let out = enscrypt(b"pw", &[0u8; 16], TEST_LOG_N, 2, floor).unwrap();
        assert!(out.elapsed >= floor);
        assert!(out.iterations >= 2);
    }

    #[test]
    fn test_calibrate_then_reproduce() {
        let mut rng = StdRng::seed_from_u64(1337);
        let policy = EnScryptPolicy {
            log_n: TEST_LOG_N,
            min_iterations: 3,
            min_duration: Duration::from_millis(50),
        };
        let (params, key) = EnScryptParams::calibrate(b"monkey lipstick", &policy, &mut rng, None).unwrap();

        assert!(params.iterations >= 3);
        let again = params.derive(b"monkey lipstick").unwrap();
        assert_eq!(key.as_bytes(), again.as_bytes());

        let wrong = params.derive(b"monkey lipstock").unwrap();
        assert_ne!(key.as_bytes(), wrong.as_bytes());
    }

    #[test]
    fn test_progress_can_cancel() {
        let mut seen = 0u32;
        let mut observer = |iterations: u32, _elapsed: Duration| {
            seen = iterations;
            if iterations >= 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        let err = enscrypt_with_progress(b"pw", &[0u8; 16], TEST_LOG_N, 10, Duration::ZERO, Some(&mut observer))
            .unwrap_err();

        assert!(matches!(err, SqrlError::Cancelled));
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_rejects_out_of_range_log_n() {
        for log_n in [0, MAX_LOG_N + 1, 40, u8::MAX] {
            let err = enscrypt(b"pw", &[0u8; 16], log_n, 1, Duration::ZERO).unwrap_err();
            assert!(matches!(err, SqrlError::InvalidParams(_)), "log_n={log_n}");
        }
    }

    #[test]
    fn test_derive_can_be_cancelled() {
        let params = EnScryptParams {
            salt: [3u8; SALT_SIZE],
            log_n: TEST_LOG_N,
            iterations: u32::MAX,
        };
        let mut rounds = 0u32;
        let mut observer = |iterations: u32, _elapsed: Duration| {
            rounds = iterations;
            if iterations >= 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        let err = params.derive_with_progress(b"pw", Some(&mut observer)).unwrap_err();

        assert!(matches!(err, SqrlError::Cancelled));
        assert_eq!(rounds, 3);
    }

    #[test]
    fn test_params_wire_layout() {
        let params = EnScryptParams {
            salt: [0xAB; SALT_SIZE],
            log_n: 9,
            iterations: 0x0102_0304,
        };
        let mut out = Vec::new();
        params.encode_into(&mut out);

        assert_eq!(out.len(), EnScryptParams::ENCODED_LEN);
        assert_eq!(out[16], 9);
        assert_eq!(&out[17..], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(EnScryptParams::decode(&out), Ok(params));
        assert!(EnScryptParams::decode(&out[1..]).is_err());
    }

    #[test]
    fn test_decode_rejects_unbounded_cost() {
        let mut out = Vec::new();
        EnScryptParams {
            salt: [0u8; SALT_SIZE],
            log_n: 9,
            iterations: 20,
        }
        .encode_into(&mut out);

        for log_n in [0, MAX_LOG_N + 1, 40] {
            out[SALT_SIZE] = log_n;
            assert!(EnScryptParams::decode(&out).is_err(), "log_n={log_n}");
        }
        out[SALT_SIZE] = MAX_LOG_N;
        assert_eq!(EnScryptParams::decode(&out).unwrap().log_n, MAX_LOG_N);
    }

    #[test]
    fn test_default_policies() {
        let interactive = EnScryptPolicy::interactive(1);
        assert_eq!(interactive.min_iterations, 20);
        assert_eq!(interactive.min_duration, Duration::from_secs(1));
        let sensitive = EnScryptPolicy::sensitive();
        assert_eq!(sensitive.min_iterations, 100);
        assert_eq!(sensitive.min_duration, Duration::from_secs(60));
        assert_eq!(sensitive.log_n, 9);
    }
}
