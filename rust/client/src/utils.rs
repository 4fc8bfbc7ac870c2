use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use starknet::core::types::Felt;
use starknet::core::utils::{cairo_short_string_to_felt, parse_cairo_short_string};

use crate::error::ClientError;

pub type Address = Felt;

pub fn parse_felt(value: &str) -> Result<Felt, ClientError> {
    if value.starts_with("0x") {
        Felt::from_hex(value).map_err(|_| ClientError::InvalidInput("invalid felt".to_string()))
    } else {
        Felt::from_dec_str(value).map_err(|_| ClientError::InvalidInput("invalid felt".to_string()))
    }
}

/// Accepts hex, decimal or a Cairo short string such as `SN_SEPOLIA`.
pub fn parse_chain_id(value: &str) -> Result<Felt, ClientError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ClientError::InvalidInput("chain id is empty".to_string()));
    }
    if trimmed.starts_with("0x") || trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return parse_felt(trimmed);
    }
    cairo_short_string_to_felt(trimmed)
        .map_err(|err| ClientError::InvalidInput(format!("invalid chain id {trimmed}: {err}")))
}

pub fn format_chain_id(chain_id: Felt) -> String {
    match parse_cairo_short_string(&chain_id) {
        Ok(text) if !text.is_empty() && text.bytes().all(|b| b.is_ascii_graphic()) => {
            format!("{text} ({})", felt_to_hex(chain_id))
        }
        _ => felt_to_hex(chain_id),
    }
}

pub fn felt_to_hex(value: Felt) -> String {
    format!("0x{:x}", value)
}

pub fn felt_to_u128(value: &Felt) -> Result<u128, ClientError> {
    let bytes = value.to_bytes_be();
    if bytes[..16].iter().any(|b| *b != 0) {
        return Err(ClientError::InvalidInput("felt exceeds u128".to_string()));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[16..32]);
    Ok(u128::from_be_bytes(buf))
}

pub fn felt_to_bool(value: &Felt) -> Result<bool, ClientError> {
    if value == &Felt::ZERO {
        Ok(false)
    } else if value == &Felt::ONE {
        Ok(true)
    } else {
        Err(ClientError::InvalidInput("invalid bool felt".to_string()))
    }
}

pub fn bool_to_felt(value: bool) -> Felt {
    if value { Felt::ONE } else { Felt::ZERO }
}

pub fn max_u256() -> BigUint {
    (BigUint::one() << 256) - BigUint::one()
}

pub fn biguint_to_u256_felts(value: &BigUint) -> Result<(Felt, Felt), ClientError> {
    if value > &max_u256() {
        return Err(ClientError::InvalidInput("value exceeds u256".to_string()));
    }
    let mask = (BigUint::one() << 128) - BigUint::one();
    let low = (value & &mask)
        .to_u128()
        .ok_or_else(|| ClientError::InvalidInput("u256 low word overflow".to_string()))?;
    let high = (value >> 128u32)
        .to_u128()
        .ok_or_else(|| ClientError::InvalidInput("u256 high word overflow".to_string()))?;
    Ok((Felt::from(low), Felt::from(high)))
}

pub fn u256_felts_to_biguint(low: &Felt, high: &Felt) -> Result<BigUint, ClientError> {
    let low = felt_to_u128(low)?;
    let high = felt_to_u128(high)?;
    Ok((BigUint::from(high) << 128u32) + BigUint::from(low))
}

/// Sign-magnitude encoding used for ticks: `[mag, sign]`, sign set for negatives.
pub fn i32_to_signed_felts(value: i32) -> [Felt; 2] {
    [Felt::from(value.unsigned_abs()), bool_to_felt(value < 0)]
}

pub fn signed_felts_to_i32(mag: &Felt, sign: &Felt) -> Result<i32, ClientError> {
    let mag = felt_to_u128(mag)?;
    let negative = felt_to_bool(sign)?;
    let value = if negative { -(mag as i128) } else { mag as i128 };
    i32::try_from(value).map_err(|_| ClientError::InvalidInput("tick out of i32 range".to_string()))
}

pub fn parse_units(amount: &str, decimals: u8) -> Result<BigUint, ClientError> {
    let amount = amount.trim();
    let mut parts = amount.split('.');
    let integer_part = parts.next().unwrap_or_default();
    let fraction_part = parts.next().unwrap_or_default();
    if parts.next().is_some() {
        return Err(ClientError::InvalidInput(format!("invalid amount: {amount}")));
    }
    if integer_part.is_empty() && fraction_part.is_empty() {
        return Err(ClientError::InvalidInput("amount is empty".to_string()));
    }
    if !integer_part.bytes().chain(fraction_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(ClientError::InvalidInput(format!("invalid amount: {amount}")));
    }
    if fraction_part.len() > decimals as usize {
        return Err(ClientError::InvalidInput(format!(
            "too many decimal places (max {decimals} for this token)"
        )));
    }
    let digits = format!(
        "{}{:0<width$}",
        integer_part,
        fraction_part,
        width = decimals as usize
    );
    if digits.is_empty() {
        return Ok(BigUint::zero());
    }
    BigUint::parse_bytes(digits.as_bytes(), 10)
        .ok_or_else(|| ClientError::InvalidInput(format!("invalid amount: {amount}")))
}

pub fn format_units(value: &BigUint, decimals: u8) -> String {
    let digits = value.to_str_radix(10);
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }
    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (integer, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        integer.to_string()
    } else {
        format!("{integer}.{fraction}")
    }
}
