// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::Error;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Parses a quantity into thousandths of its base unit, rounding up like the apiserver does
/// for sub-milli precision.
///
/// Accepts decimal SI suffixes (`n`, `u`, `m`, `k`, `M`, `G`, `T`, `P`, `E`), binary suffixes
/// (`Ki` .. `Ei`) and decimal exponents (`1e3`, `5E-1`).
pub fn parse_milli(quantity: &Quantity) -> Result<i128, Error> {
    let invalid = || Error::InvalidQuantity(quantity.0.clone());
    let raw = quantity.0.trim();
    let (negative, unsigned) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let number_len = unsigned
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);
    if number.is_empty() || number == "." {
        return Err(invalid());
    }

    let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
    if frac_part.contains('.') {
        return Err(invalid());
    }
    let digits: i128 = format!("{}{}", int_part, frac_part).parse().map_err(|_| invalid())?;
    let frac_len = u32::try_from(frac_part.len()).map_err(|_| invalid())?;

    let (numerator, denominator) = scale_of(suffix).ok_or_else(invalid)?;
    let numerator = numerator.checked_mul(digits).and_then(|n| n.checked_mul(1000)).ok_or_else(invalid)?;
    let denominator = 10i128
        .checked_pow(frac_len)
        .and_then(|p| p.checked_mul(denominator))
        .ok_or_else(invalid)?;
    let milli = numerator / denominator + i128::from(numerator % denominator != 0);
    Ok(if negative { -milli } else { milli })
}

/// Compares two quantities by value rather than by spelling.
pub fn quantity_eq(a: &Quantity, b: &Quantity) -> bool {
    match (parse_milli(a), parse_milli(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.0 == b.0,
    }
}

fn scale_of(suffix: &str) -> Option<(i128, i128)> {
    let pow10 = |exp: u32| 10i128.checked_pow(exp);
    let pow2 = |exp: u32| 2i128.checked_pow(exp);
    let scale = match suffix {
        "" => (1, 1),
        "n" => (1, pow10(9)?),
        "u" => (1, pow10(6)?),
        "m" => (1, pow10(3)?),
        "k" => (pow10(3)?, 1),
        "M" => (pow10(6)?, 1),
        "G" => (pow10(9)?, 1),
        "T" => (pow10(12)?, 1),
        "P" => (pow10(15)?, 1),
        "E" => (pow10(18)?, 1),
        "Ki" => (pow2(10)?, 1),
        "Mi" => (pow2(20)?, 1),
        "Gi" => (pow2(30)?, 1),
        "Ti" => (pow2(40)?, 1),
        "Pi" => (pow2(50)?, 1),
        "Ei" => (pow2(60)?, 1),
        _ => {
            let exponent: i32 = suffix.strip_prefix(['e', 'E'])?.parse().ok()?;
            if exponent >= 0 {
                (pow10(exponent.unsigned_abs())?, 1)
            } else {
                (1, pow10(exponent.unsigned_abs())?)
            }
        }
    };
    Some(scale)
}
