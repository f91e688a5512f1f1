//! # Custody Gateway 暗号処理
//!
//! 秘密鍵を一切保持せず、カストディサービスが返す公開鍵・署名を
//! EVMチェーンが受理する正規形に変換する。
//!
//! ## 暗号アルゴリズム
//! | 用途 | アルゴリズム |
//! |------|------------|
//! | 曲線 | secp256k1 |
//! | アドレス導出 | Keccak-256（下位20バイト） |
//! | 署名 | ECDSA（DER形式、low-S正規化） |
//! | リプレイ保護 | EIP-155 `v = chainId * 2 + 35 + recoveryId` |

pub mod address;
pub mod signature;

pub use address::{derive_address, format_address, public_key_from_der, UNCOMPRESSED_PUBLIC_KEY_LEN};
pub use signature::{
    decode_der_signature, eip155_v, enforce_low_s, left_pad_32, CanonicalSignature, RawSignature,
    Signature, SECP256K1_HALF_ORDER, SECP256K1_ORDER,
};

pub use alloy_primitives::{Address, U256};

/// 暗号処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// 公開鍵の形式が不正（長さ不足、DERデコード失敗）
    #[error("公開鍵が不正です: {0}")]
    InvalidPublicKey(String),
    /// 署名のデコードまたはリカバリーIDの決定に失敗
    #[error("署名のデコードに失敗しました: {0}")]
    SignatureDecode(String),
    /// 固定長エンコード（32バイト）やv値の計算に失敗
    #[error("エンコードに失敗しました: {0}")]
    Encoding(String),
}

/// Keccak-256ハッシュ計算。
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    alloy_primitives::keccak256(data).0
}
