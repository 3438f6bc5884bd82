//! Cryptographically secure random identifiers
//!
//! Operation correlation IDs, bootstrap-token secrets and encryption keys are
//! drawn from the FIPS-validated aws-lc-rs RNG.

use crate::Error;

/// Lowercase alphanumerics, the alphabet of bootstrap-token IDs and secrets
pub const LOWER_ALPHANUMERIC: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of a maintenance operation correlation ID
pub const OPERATION_ID_LENGTH: usize = 8;

/// Fill a buffer of `len` random bytes
pub fn random_bytes(len: usize) -> Result<Vec<u8>, Error> {
    let mut raw = vec![0u8; len];
    aws_lc_rs::rand::fill(&mut raw).map_err(|_| {
        Error::internal_with_context("random", "cryptographic RNG unavailable")
    })?;
    Ok(raw)
}

/// Generate a random string of `len` characters drawn uniformly from `charset`
///
/// Rejection sampling keeps the distribution uniform for charsets whose size
/// does not divide 256.
pub fn random_string_from_charset(len: usize, charset: &[u8]) -> Result<String, Error> {
    if charset.is_empty() || charset.len() > 256 {
        return Err(Error::validation("charset must hold between 1 and 256 symbols"));
    }
    let limit = 256 - (256 % charset.len());
    let mut out = String::with_capacity(len);

    while out.len() < len {
        for b in random_bytes(len)? {
            if (b as usize) < limit {
                out.push(charset[b as usize % charset.len()] as char);
                if out.len() == len {
                    break;
                }
            }
        }
    }
    Ok(out)
}

/// A fresh correlation ID for one maintenance pass
pub fn operation_id() -> Result<String, Error> {
    random_string_from_charset(OPERATION_ID_LENGTH, LOWER_ALPHANUMERIC)
}
