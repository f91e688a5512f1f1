//! # トランザクションビルダー
//!
//! `POST /sign` の文字列フィールドを検証し、`UnsignedTransaction` に変換する。
//! 経済的な妥当性（ガスがゼロでないか等）はここでは検証しない。

use alloy_primitives::{Address, Bytes, U256};
use custody_types::SignTransactionRequest;

use crate::{TxError, UnsignedTransaction};

/// 署名リクエストから署名前トランザクションを構築する。
///
/// 失敗時は最初に不正と判定したフィールド名を `TxError::InvalidField` で返す。
pub fn build(request: &SignTransactionRequest) -> Result<UnsignedTransaction, TxError> {
    Ok(UnsignedTransaction {
        nonce: parse_decimal("nonce", &request.nonce)?,
        value: parse_decimal("value", &request.value)?,
        gas_limit: parse_decimal("gasLimit", &request.gas_limit)?,
        gas_price: parse_decimal("gasPrice", &request.gas_price)?,
        to: parse_address("to", &request.to)?,
        data: parse_hex_data("data", &request.data)?,
        chain_id: request.chain_id,
    })
}

/// 10進数文字列を256ビット符号なし整数に変換する。
///
/// 受け付けるのはASCII数字のみ（符号・空白・空文字列は不可）。
pub fn parse_decimal(field: &'static str, input: &str) -> Result<U256, TxError> {
    if input.is_empty() {
        return Err(invalid(field, "空文字列です"));
    }
    if !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(field, format!("10進数ではありません: {input:?}")));
    }

    U256::from_str_radix(input, 10)
        .map_err(|e| invalid(field, format!("256ビットに収まりません: {e}")))
}

/// 20バイトの16進数アドレスをパースする（`0x` 省略可、大文字小文字は区別しない）。
pub fn parse_address(field: &'static str, input: &str) -> Result<Address, TxError> {
    let digits = strip_hex_prefix(input);
    if digits.len() != 40 {
        return Err(invalid(
            field,
            format!("アドレスは40桁の16進数である必要があります（実際: {} 桁）", digits.len()),
        ));
    }

    let bytes = hex::decode(digits).map_err(|e| invalid(field, format!("16進数デコードに失敗: {e}")))?;
    Ok(Address::from_slice(&bytes))
}

/// 16進数のバイト列をパースする（`0x` 省略可、空文字列は空のバイト列）。
pub fn parse_hex_data(field: &'static str, input: &str) -> Result<Bytes, TxError> {
    let bytes = hex::decode(strip_hex_prefix(input))
        .map_err(|e| invalid(field, format!("16進数デコードに失敗: {e}")))?;
    Ok(Bytes::from(bytes))
}

fn strip_hex_prefix(input: &str) -> &str {
    input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input)
}

fn invalid(field: &'static str, reason: impl Into<String>) -> TxError {
    TxError::InvalidField {
        field,
        reason: reason.into(),
    }
}
