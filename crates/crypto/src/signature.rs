//! # 署名の後処理
//!
//! カストディサービスが返すDER形式のECDSA署名を、EVMトランザクションに
//! 埋め込める `(r, s, recoveryId)` に変換する。
//!
//! ## 処理段階
//! 1. デコード: DER `SEQUENCE { INTEGER r, INTEGER s }` を整数に分解
//! 2. low-S正規化: `s > N/2` なら `s = N - s`（署名の可鍛性を排除）
//! 3. パディング: `r`, `s` を32バイトのビッグエンディアンに左詰め
//! 4. リカバリーID: 候補0/1から公開鍵を復元し、署名者アドレスと一致する方を選ぶ
//! 5. v値: `chainId * 2 + 35 + recoveryId`

use alloy_primitives::{uint, Address, U256};
use der::asn1::UintRef;
use der::{Decode, Sequence};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};

use crate::address::derive_address;
use crate::CryptoError;

/// secp256k1の曲線位数 N
pub const SECP256K1_ORDER: U256 =
    uint!(0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141_U256);

/// N / 2（切り捨て）。正規形の `s` はこの値以下。
pub const SECP256K1_HALF_ORDER: U256 =
    uint!(0x7FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF5D576E7357A4501DDFE92F46681B20A0_U256);

/// EIP-155のv値オフセット
const EIP155_V_OFFSET: u64 = 35;

/// RFC 3279 `Ecdsa-Sig-Value`
#[derive(Sequence)]
struct EcdsaSigValue<'a> {
    r: UintRef<'a>,
    s: UintRef<'a>,
}

/// DERからデコードした直後の署名。
/// 値は先頭ゼロを除いたビッグエンディアン表現で、範囲検証前。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSignature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

/// low-S正規化と32バイトパディングを終えた署名。リカバリーID未決定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
}

/// トランザクションに埋め込む最終的な署名。
///
/// 不変条件: `0 < r < N`、`0 < s <= N/2`、`recovery_id ∈ {0, 1}`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

/// DER形式のECDSA署名を `r`, `s` に分解する。
pub fn decode_der_signature(der: &[u8]) -> Result<RawSignature, CryptoError> {
    let value = EcdsaSigValue::from_der(der)
        .map_err(|e| CryptoError::SignatureDecode(format!("DER署名のパースに失敗: {e}")))?;

    Ok(RawSignature {
        r: value.r.as_bytes().to_vec(),
        s: value.s.as_bytes().to_vec(),
    })
}

/// `s` をlow-S形に正規化する。
///
/// `s > N/2` の場合は `N - s` を返し、それ以外はそのまま返す。冪等。
/// 呼び出し側は `s < N` を保証すること。
pub fn enforce_low_s(s: U256) -> U256 {
    if s > SECP256K1_HALF_ORDER {
        SECP256K1_ORDER.saturating_sub(s)
    } else {
        s
    }
}

/// ビッグエンディアン整数を32バイトに左詰めする。
///
/// 先頭のゼロバイトを除いた表現が32バイトを超える場合はエラー。
pub fn left_pad_32(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let significant = &bytes[start..];
    if significant.len() > 32 {
        return Err(CryptoError::Encoding(format!(
            "整数が32バイトを超えています: {} バイト",
            significant.len()
        )));
    }

    let mut out = [0u8; 32];
    out[32 - significant.len()..].copy_from_slice(significant);
    Ok(out)
}

/// EIP-155のv値を計算する。
pub fn eip155_v(chain_id: u64, recovery_id: u8) -> Result<u64, CryptoError> {
    if recovery_id > 1 {
        return Err(CryptoError::Encoding(format!(
            "リカバリーIDは0または1である必要があります: {recovery_id}"
        )));
    }

    chain_id
        .checked_mul(2)
        .and_then(|v| v.checked_add(EIP155_V_OFFSET + u64::from(recovery_id)))
        .ok_or_else(|| {
            CryptoError::Encoding(format!("chainId {chain_id} のv値がu64に収まりません"))
        })
}

impl RawSignature {
    /// low-S正規化と32バイトパディングを行う。
    pub fn normalize(&self) -> Result<CanonicalSignature, CryptoError> {
        let s = U256::try_from_be_slice(&self.s).ok_or_else(|| {
            CryptoError::Encoding(format!("sが32バイトを超えています: {} バイト", self.s.len()))
        })?;
        if s.is_zero() || s >= SECP256K1_ORDER {
            return Err(CryptoError::SignatureDecode(
                "sが曲線位数の範囲外です".to_string(),
            ));
        }

        let r = left_pad_32(&self.r)?;
        let r_value = U256::from_be_bytes(r);
        if r_value.is_zero() || r_value >= SECP256K1_ORDER {
            return Err(CryptoError::SignatureDecode(
                "rが曲線位数の範囲外です".to_string(),
            ));
        }

        let s = enforce_low_s(s).to_be_bytes::<32>();
        Ok(CanonicalSignature { r, s })
    }
}

impl CanonicalSignature {
    /// リカバリーIDの候補（0, 1）それぞれで公開鍵を復元し、
    /// `expected` のアドレスと一致する方を採用する。
    ///
    /// どちらも一致しない場合は `SignatureDecode`。
    pub fn recover(&self, digest: &[u8; 32], expected: &Address) -> Result<Signature, CryptoError> {
        let signature = EcdsaSignature::from_slice(&[self.r, self.s].concat())
            .map_err(|e| CryptoError::SignatureDecode(format!("署名の構築に失敗: {e}")))?;

        for candidate in 0..=1u8 {
            let Some(recovery_id) = RecoveryId::from_byte(candidate) else {
                continue;
            };
            match recover_address(digest, &signature, recovery_id) {
                Ok(address) if address == *expected => {
                    return Ok(Signature {
                        r: self.r,
                        s: self.s,
                        recovery_id: candidate,
                    });
                }
                _ => continue,
            }
        }

        Err(CryptoError::SignatureDecode(
            "どのリカバリーIDでも署名者のアドレスと一致しません".to_string(),
        ))
    }
}

impl Signature {
    /// このシグネチャのEIP-155 v値。
    pub fn v(&self, chain_id: u64) -> Result<u64, CryptoError> {
        eip155_v(chain_id, self.recovery_id)
    }
}

fn recover_address(
    digest: &[u8; 32],
    signature: &EcdsaSignature,
    recovery_id: RecoveryId,
) -> Result<Address, CryptoError> {
    let key = VerifyingKey::recover_from_prehash(digest, signature, recovery_id)
        .map_err(|e| CryptoError::SignatureDecode(format!("公開鍵の復元に失敗: {e}")))?;
    derive_address(key.to_encoded_point(false).as_bytes())
}
