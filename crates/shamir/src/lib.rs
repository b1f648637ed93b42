//! Shamir secret sharing over a 64-bit prime field.
//!
//! All order scalars are secret-shared as elements of ℤ_p for a fixed prime
//! p just below 2⁶⁴. Shares are points on a random polynomial; any k shares
//! with distinct indices reconstruct the secret by Lagrange interpolation at
//! zero, and fewer than k reveal nothing.
//!
//! The field also carries the sign convention used by the match test: a
//! value v is interpreted as negative iff v > p/2.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use rand::Rng;
use serde::{Deserialize, Serialize};

/// The prime defining the field ℤ_p. All share arithmetic is mod this prime.
pub const PRIME: u64 = 17_012_364_981_921_935_471;

/// Truncated half of [`PRIME`]. Values at or below this are non-negative
/// under the field's sign convention; values above it are negative.
pub const HALF_PRIME: u64 = PRIME / 2;

/// Errors produced by splitting and joining shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ShamirError {
    /// The k-of-n parameters are unusable (k < 1 or k > n).
    #[error("invalid threshold: k = {k} must be in 1..={n}")]
    InvalidThreshold { n: u64, k: u64 },

    /// The secret is not an element of the field.
    #[error("secret is not a field element (must be < {PRIME})")]
    SecretOutOfRange,

    /// Reconstruction was attempted with fewer than k shares.
    #[error("insufficient shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    /// Two shares presented for reconstruction carry the same index.
    #[error("duplicate share index {index}")]
    DuplicateIndex { index: u64 },
}

/// One point on the sharing polynomial: the evaluation of f at `index`.
///
/// Indices are 1-based. Index 0 is never issued because f(0) is the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub index: u64,
    pub value: u64,
}

impl Share {
    /// Returns a new share at `index` holding `value`.
    pub fn new(index: u64, value: u64) -> Self {
        Self { index, value }
    }

    /// Pointwise addition. The result is a share of the sum of the two
    /// underlying secrets. Both operands must come from the same index.
    pub fn add(&self, other: &Share) -> Share {
        debug_assert_eq!(self.index, other.index);
        Share {
            index: self.index,
            value: add_mod(self.value, other.value),
        }
    }

    /// Pointwise subtraction. The result is a share of the difference of the
    /// two underlying secrets. Both operands must come from the same index.
    pub fn sub(&self, other: &Share) -> Share {
        debug_assert_eq!(self.index, other.index);
        Share {
            index: self.index,
            value: sub_mod(self.value, other.value),
        }
    }
}

/// Splits `secret` into `n` shares such that any `k` of them reconstruct it.
///
/// A fresh polynomial of degree k−1 with uniformly random coefficients is
/// sampled from `rng` for every call, so repeated splits of the same secret
/// are unlinkable.
pub fn split(
    secret: u64,
    n: u64,
    k: u64,
    rng: &mut impl Rng,
) -> Result<Vec<Share>, ShamirError> {
    if k < 1 || k > n {
        return Err(ShamirError::InvalidThreshold { n, k });
    }
    if secret >= PRIME {
        return Err(ShamirError::SecretOutOfRange);
    }

    // coefficients[0] is the secret; the rest are the random polynomial.
    let mut coefficients = Vec::with_capacity(k as usize);
    coefficients.push(secret);
    for _ in 1..k {
        coefficients.push(rng.gen_range(0..PRIME));
    }

    let shares = (1..=n)
        .map(|index| Share {
            index,
            value: eval_poly(&coefficients, index),
        })
        .collect();
    Ok(shares)
}

/// Reconstructs the secret from at least `k` distinct-index shares by
/// Lagrange interpolation at zero. Only the first `k` shares are used.
pub fn join(shares: &[Share], k: usize) -> Result<u64, ShamirError> {
    if shares.len() < k {
        return Err(ShamirError::InsufficientShares {
            have: shares.len(),
            need: k,
        });
    }
    let shares = &shares[..k];
    for (i, share) in shares.iter().enumerate() {
        if shares[..i].iter().any(|other| other.index == share.index) {
            return Err(ShamirError::DuplicateIndex { index: share.index });
        }
    }

    let mut secret = 0u64;
    for share in shares {
        let mut numerator = 1u64;
        let mut denominator = 1u64;
        for other in shares {
            if other.index == share.index {
                continue;
            }
            numerator = mul_mod(numerator, other.index % PRIME);
            denominator = mul_mod(denominator, sub_mod(other.index % PRIME, share.index % PRIME));
        }
        let basis = mul_mod(numerator, inv_mod(denominator));
        secret = add_mod(secret, mul_mod(share.value, basis));
    }
    Ok(secret)
}

/// Evaluates the polynomial with the given coefficients at x (Horner).
fn eval_poly(coefficients: &[u64], x: u64) -> u64 {
    let x = x % PRIME;
    let mut acc = 0u64;
    for &coefficient in coefficients.iter().rev() {
        acc = add_mod(mul_mod(acc, x), coefficient);
    }
    acc
}

/// (a + b) mod p.
pub fn add_mod(a: u64, b: u64) -> u64 {
    (((a as u128) + (b as u128)) % (PRIME as u128)) as u64
}

/// (a − b) mod p.
pub fn sub_mod(a: u64, b: u64) -> u64 {
    let a = a % PRIME;
    let b = b % PRIME;
    if a >= b { a - b } else { PRIME - b + a }
}

/// (a · b) mod p.
pub fn mul_mod(a: u64, b: u64) -> u64 {
    (((a as u128) * (b as u128)) % (PRIME as u128)) as u64
}

/// a⁻¹ mod p, via Fermat's little theorem. `a` must be nonzero mod p.
pub fn inv_mod(a: u64) -> u64 {
    debug_assert_ne!(a % PRIME, 0, "zero has no inverse");
    pow_mod(a, PRIME - 2)
}

fn pow_mod(mut base: u64, mut exponent: u64) -> u64 {
    base %= PRIME;
    let mut acc = 1u64;
    while exponent > 0 {
        if exponent & 1 == 1 {
            acc = mul_mod(acc, base);
        }
        base = mul_mod(base, base);
        exponent >>= 1;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn split_then_join_recovers_the_secret() {
        let mut rng = rng();
        for _ in 0..32 {
            let secret = rng.gen_range(0..PRIME);
            let shares = split(secret, 24, 16, &mut rng).unwrap();
            assert_eq!(shares.len(), 24);
            assert_eq!(join(&shares, 16).unwrap(), secret);
        }
    }

    #[test]
    fn any_k_subset_recovers_the_secret() {
        let mut rng = rng();
        let secret = 1234567890;
        let shares = split(secret, 12, 8, &mut rng).unwrap();

        // Contiguous windows and a scattered pick.
        for start in 0..4 {
            assert_eq!(join(&shares[start..start + 8], 8).unwrap(), secret);
        }
        let scattered: Vec<Share> = shares.iter().step_by(2).chain(shares.iter().skip(1).step_by(4)).copied().collect();
        assert_eq!(join(&scattered[..8], 8).unwrap(), secret);
    }

    #[test]
    fn fewer_than_k_shares_fail() {
        let mut rng = rng();
        let shares = split(99, 6, 4, &mut rng).unwrap();
        assert_eq!(
            join(&shares[..3], 4),
            Err(ShamirError::InsufficientShares { have: 3, need: 4 })
        );
    }

    #[test]
    fn duplicate_indices_fail() {
        let mut rng = rng();
        let mut shares = split(99, 6, 4, &mut rng).unwrap();
        shares[1] = shares[0];
        assert_eq!(
            join(&shares[..4], 4),
            Err(ShamirError::DuplicateIndex { index: shares[0].index })
        );
    }

    #[test]
    fn invalid_thresholds_fail() {
        let mut rng = rng();
        assert_eq!(
            split(1, 6, 0, &mut rng),
            Err(ShamirError::InvalidThreshold { n: 6, k: 0 })
        );
        assert_eq!(
            split(1, 6, 7, &mut rng),
            Err(ShamirError::InvalidThreshold { n: 6, k: 7 })
        );
    }

    #[test]
    fn secrets_outside_the_field_fail() {
        let mut rng = rng();
        assert_eq!(split(PRIME, 6, 4, &mut rng), Err(ShamirError::SecretOutOfRange));
        assert_eq!(split(u64::MAX, 6, 4, &mut rng), Err(ShamirError::SecretOutOfRange));
    }

    #[test]
    fn shares_are_additively_homomorphic() {
        let mut rng = rng();
        let (x, y) = (rng.gen_range(0..PRIME), rng.gen_range(0..PRIME));
        let xs = split(x, 9, 6, &mut rng).unwrap();
        let ys = split(y, 9, 6, &mut rng).unwrap();

        let sums: Vec<Share> = xs.iter().zip(&ys).map(|(a, b)| a.add(b)).collect();
        assert_eq!(join(&sums, 6).unwrap(), add_mod(x, y));

        let diffs: Vec<Share> = xs.iter().zip(&ys).map(|(a, b)| a.sub(b)).collect();
        assert_eq!(join(&diffs, 6).unwrap(), sub_mod(x, y));
    }

    #[test]
    fn negative_differences_land_above_half_prime() {
        let mut rng = rng();
        let xs = split(100, 6, 4, &mut rng).unwrap();
        let ys = split(200, 6, 4, &mut rng).unwrap();
        let diffs: Vec<Share> = xs.iter().zip(&ys).map(|(a, b)| a.sub(b)).collect();

        let value = join(&diffs, 4).unwrap();
        assert_eq!(value, PRIME - 100);
        assert!(value > HALF_PRIME);
    }

    #[test]
    fn inverse_is_an_inverse() {
        let mut rng = rng();
        for _ in 0..16 {
            let a = rng.gen_range(1..PRIME);
            assert_eq!(mul_mod(a, inv_mod(a)), 1);
        }
    }

    /// Below the threshold a share carries no information: across many
    /// splits of the same secret, a single share's value is uniform over
    /// the field. A chi-square fit against 16 equal buckets must not reject
    /// uniformity (15 degrees of freedom; the bound sits far past the 1%
    /// critical value ≈ 30.6 to keep the fixed-seed run stable).
    #[test]
    fn single_shares_look_uniform() {
        let mut rng = rng();
        const BUCKETS: usize = 16;
        const SAMPLES: usize = 4096;
        let bucket_width = PRIME / BUCKETS as u64 + 1;

        for secret in [0u64, 1, PRIME - 1, 123_456_789] {
            let mut counts = [0usize; BUCKETS];
            for _ in 0..SAMPLES {
                let shares = split(secret, 3, 2, &mut rng).unwrap();
                counts[(shares[0].value / bucket_width) as usize] += 1;
            }

            let expected = SAMPLES as f64 / BUCKETS as f64;
            let chi_square: f64 = counts
                .iter()
                .map(|&count| {
                    let diff = count as f64 - expected;
                    diff * diff / expected
                })
                .sum();
            assert!(
                chi_square < 45.0,
                "share distribution rejects uniformity for secret {secret}: {chi_square}"
            );
        }
    }
}
