//! # アドレス導出
//!
//! 非圧縮secp256k1公開鍵からEVMアカウントアドレス（20バイト）を導出する。
//! カストディサービスはDER形式（SubjectPublicKeyInfo）で公開鍵を返すため、
//! そのデコードもここで扱う。

use alloy_primitives::Address;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::pkcs8::DecodePublicKey;

use crate::{keccak256, CryptoError};

/// 非圧縮公開鍵のバイト長（フォーマットバイト `0x04` + X座標32バイト + Y座標32バイト）
pub const UNCOMPRESSED_PUBLIC_KEY_LEN: usize = 65;

/// DER形式（SubjectPublicKeyInfo）の公開鍵を非圧縮形式の65バイトに変換する。
pub fn public_key_from_der(der: &[u8]) -> Result<[u8; UNCOMPRESSED_PUBLIC_KEY_LEN], CryptoError> {
    let public_key = k256::PublicKey::from_public_key_der(der).map_err(|e| {
        CryptoError::InvalidPublicKey(format!("SubjectPublicKeyInfoのデコードに失敗: {e}"))
    })?;

    let point = public_key.to_encoded_point(false);
    point.as_bytes().try_into().map_err(|_| {
        CryptoError::InvalidPublicKey(format!(
            "非圧縮公開鍵の長さが不正です: {} バイト",
            point.as_bytes().len()
        ))
    })
}

/// 非圧縮公開鍵からアカウントアドレスを導出する。
///
/// 先頭1バイトのフォーマットプレフィックスを除いた64バイトに対して
/// Keccak-256を計算し、下位20バイトをアドレスとする。
pub fn derive_address(public_key: &[u8]) -> Result<Address, CryptoError> {
    if public_key.len() < UNCOMPRESSED_PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidPublicKey(format!(
            "非圧縮公開鍵は{UNCOMPRESSED_PUBLIC_KEY_LEN}バイト必要です（実際: {} バイト）",
            public_key.len()
        )));
    }

    let hash = keccak256(&public_key[1..UNCOMPRESSED_PUBLIC_KEY_LEN]);
    Ok(Address::from_slice(&hash[12..]))
}

/// アドレスを `0x` プレフィックス付きの小文字16進数文字列に変換する。
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}
