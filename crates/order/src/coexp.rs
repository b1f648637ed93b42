//! The CoExp encoding of prices and volumes.
//!
//! A magnitude is stored as a coefficient and a base-10 exponent so that it
//! fits a single field element while spanning many orders of magnitude. The
//! encodings are not symmetric: prices carry an exponent adjustment of 26
//! and a scale of 1/200, volumes are unadjusted with a scale of 1/5.

use serde::{Deserialize, Serialize};

/// Exponent adjustment applied to encoded prices.
const PRICE_EXP_ADJUSTMENT: u64 = 26;

/// A coefficient-exponent pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoExp {
    pub co: u64,
    pub exp: u64,
}

/// Encodes a price into CoExp form.
///
/// The bands keep the coefficient in a narrow range while the exponent
/// absorbs the magnitude; prices above the top band lose their lowest
/// decimal digits.
pub fn price_to_co_exp(price: u64) -> CoExp {
    match price {
        0 => CoExp { co: 0, exp: PRICE_EXP_ADJUSTMENT },
        1..=9 => CoExp { co: price * 200, exp: 26 },
        10..=99 => CoExp { co: price * 20, exp: 27 },
        100..=999 => CoExp { co: price * 2, exp: 28 },
        1000..=9999 => CoExp { co: price / 5, exp: 29 },
        _ => {
            let inner = price_to_co_exp(price / 10);
            CoExp { co: inner.co, exp: inner.exp + 1 }
        }
    }
}

/// Encodes a volume into CoExp form.
pub fn volume_to_co_exp(volume: u64) -> CoExp {
    match volume {
        0 => CoExp { co: 0, exp: 0 },
        1..=9 => CoExp { co: volume * 5, exp: 0 },
        10..=99 => CoExp { co: volume / 2, exp: 1 },
        _ => {
            let inner = volume_to_co_exp(volume / 10);
            CoExp { co: inner.co, exp: inner.exp + 1 }
        }
    }
}

/// Decodes a price from CoExp form: co · 10^(exp−26) / 200.
pub fn price_from_co_exp(co: u64, exp: u64) -> u64 {
    if co == 0 || exp < PRICE_EXP_ADJUSTMENT {
        return 0;
    }
    let scaled = (co as u128) * 10u128.pow((exp - PRICE_EXP_ADJUSTMENT) as u32);
    (scaled / 200) as u64
}

/// Decodes a volume from CoExp form: co · 10^exp / 5.
pub fn volume_from_co_exp(co: u64, exp: u64) -> u64 {
    let scaled = (co as u128) * 10u128.pow(exp as u32);
    (scaled / 5) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_bands() {
        assert_eq!(price_to_co_exp(0), CoExp { co: 0, exp: 26 });
        assert_eq!(price_to_co_exp(7), CoExp { co: 1400, exp: 26 });
        assert_eq!(price_to_co_exp(55), CoExp { co: 1100, exp: 27 });
        assert_eq!(price_to_co_exp(555), CoExp { co: 1110, exp: 28 });
        assert_eq!(price_to_co_exp(5555), CoExp { co: 1111, exp: 29 });
        assert_eq!(price_to_co_exp(55550), CoExp { co: 1111, exp: 30 });
    }

    #[test]
    fn volume_bands() {
        assert_eq!(volume_to_co_exp(0), CoExp { co: 0, exp: 0 });
        assert_eq!(volume_to_co_exp(7), CoExp { co: 35, exp: 0 });
        assert_eq!(volume_to_co_exp(54), CoExp { co: 27, exp: 1 });
        assert_eq!(volume_to_co_exp(540), CoExp { co: 27, exp: 2 });
    }

    #[test]
    fn prices_in_band_roundtrip_exactly() {
        for price in [1, 9, 10, 42, 99, 100, 500, 999, 100000] {
            let CoExp { co, exp } = price_to_co_exp(price);
            assert_eq!(price_from_co_exp(co, exp), price, "price {price}");
        }
    }

    #[test]
    fn volumes_in_band_roundtrip_exactly() {
        for volume in [1, 5, 9, 10, 54, 98] {
            let CoExp { co, exp } = volume_to_co_exp(volume);
            assert_eq!(volume_from_co_exp(co, exp), volume, "volume {volume}");
        }
    }

    #[test]
    fn out_of_band_prices_truncate() {
        // 5557 falls in the ÷5 band, so the last digits are lost.
        let CoExp { co, exp } = price_to_co_exp(5557);
        assert_eq!(price_from_co_exp(co, exp), 5555);
    }

    #[test]
    fn zero_coefficient_decodes_to_zero() {
        assert_eq!(price_from_co_exp(0, 26), 0);
        assert_eq!(volume_from_co_exp(0, 0), 0);
    }
}
