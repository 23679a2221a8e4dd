//! Proximity one-time codes
//!
//! TOTP (RFC 6238) with HMAC-SHA256. The seed is handed to the client alongside
//! the offline payload; the server accepts the current time step and a small
//! number of previous ones.

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;

use crate::error::{KeywardError, Result};
use crate::kdf::hmac_sha256;

/// Length of a freshly generated seed.
pub const SEED_LEN: usize = 16;

pub const MIN_DIGITS: u32 = 6;
pub const MAX_DIGITS: u32 = 10;

/// Random seed for a new proximity check.
pub fn generate_seed() -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);
    seed
}

/// Time-stepped code generator and checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityOtp {
    digits: u32,
    step_secs: u64,
    backward_steps: u32,
}

impl ProximityOtp {
    pub fn new(digits: u32, step_secs: u64, backward_steps: u32) -> Result<Self> {
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits) {
            return Err(KeywardError::Encoding(format!(
                "OTP length must be between {} and {}",
                MIN_DIGITS, MAX_DIGITS
            )));
        }
        if step_secs == 0 {
            return Err(KeywardError::Encoding("OTP step must be positive".into()));
        }
        Ok(Self {
            digits,
            step_secs,
            backward_steps,
        })
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    fn time_step(&self, at: DateTime<Utc>) -> Result<u64> {
        let secs = u64::try_from(at.timestamp())
            .map_err(|_| KeywardError::Encoding("timestamp before Unix epoch".into()))?;
        Ok(secs / self.step_secs)
    }

    fn code_for_step(&self, seed: &[u8], step: u64) -> Result<String> {
        let mac = hmac_sha256(seed, &step.to_be_bytes())?;
        let offset = (mac[mac.len() - 1] & 0x0F) as usize;
        let binary = u32::from_be_bytes([
            mac[offset] & 0x7F,
            mac[offset + 1],
            mac[offset + 2],
            mac[offset + 3],
        ]);
        let code = u64::from(binary) % 10u64.pow(self.digits);
        Ok(format!("{:0width$}", code, width = self.digits as usize))
    }

    /// Code for the step containing `at`.
    pub fn generate(&self, seed: &[u8], at: DateTime<Utc>) -> Result<String> {
        self.code_for_step(seed, self.time_step(at)?)
    }

    /// Accept `otp` if it matches the current step or one of the allowed previous steps.
    pub fn verify(&self, seed: &[u8], otp: &str, at: DateTime<Utc>) -> Result<bool> {
        let current = self.time_step(at)?;
        let mut matched = false;
        for back in 0..=u64::from(self.backward_steps) {
            let Some(step) = current.checked_sub(back) else {
                break;
            };
            let expected = self.code_for_step(seed, step)?;
            matched |= bool::from(expected.as_bytes().ct_eq(otp.as_bytes()));
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RFC_SEED: &[u8] = b"12345678901234567890123456789012";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn test_rfc6238_sha256_vectors() {
        let otp = ProximityOtp::new(8, 30, 0).unwrap();
        assert_eq!(otp.generate(RFC_SEED, at(59)).unwrap(), "46119246");
        assert_eq!(otp.generate(RFC_SEED, at(1111111109)).unwrap(), "68084774");
        assert_eq!(otp.generate(RFC_SEED, at(1111111111)).unwrap(), "67062674");
    }

    #[test]
    fn test_backward_window() {
        let otp = ProximityOtp::new(8, 30, 1).unwrap();
        let seed = generate_seed();
        let code = otp.generate(&seed, at(1_000_000)).unwrap();

        assert!(otp.verify(&seed, &code, at(1_000_000)).unwrap());
        assert!(otp.verify(&seed, &code, at(1_000_030)).unwrap(), "one step back");
        assert!(!otp.verify(&seed, &code, at(1_000_060)).unwrap(), "two steps back");
        assert!(!otp.verify(&seed, &code, at(999_960)).unwrap(), "future code");
    }

    #[test]
    fn test_wrong_seed_fails() {
        let otp = ProximityOtp::new(6, 30, 1).unwrap();
        let code = otp.generate(&[1u8; 16], at(5_000)).unwrap();
        assert_eq!(code.len(), 6);
        assert!(!otp.verify(&[2u8; 16], &code, at(5_000)).unwrap());
    }

    #[test]
    fn test_parameter_validation() {
        assert!(ProximityOtp::new(5, 30, 1).is_err());
        assert!(ProximityOtp::new(11, 30, 1).is_err());
        assert!(ProximityOtp::new(8, 0, 1).is_err());
    }
}
