//! # 鍵カストディ抽象化
//!
//! 秘密鍵を保持する外部サービス（KMS）への操作を抽象化するトレイト。
//! 環境変数 `CUSTODY_BACKEND` で実装を切り替える。
//!
//! 現在のバックエンド実装:
//! - `aws`: AWS KMS（feature `vendor-aws`）
//! - `mock`: ローカル開発・テスト用（メモリ内のsecp256k1鍵）
//!
//! 秘密鍵はゲートウェイのプロセスに一切入らない。ゲートウェイが扱うのは
//! 鍵ハンドル・DER公開鍵・DER署名のみ。

pub mod client;
#[cfg(feature = "vendor-aws")]
pub mod kms;
pub mod mock;

use std::fmt;
use std::time::Duration;

pub use client::{CallContext, CustodyClient, RetryPolicy};

/// カストディサービス上の鍵を識別する不透明なハンドル（AWS KMSではKeyId）。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHandle(String);

impl KeyHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 鍵の用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    SignVerify,
}

/// 鍵の曲線
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCurve {
    /// secp256k1（KMS上の `ECC_SECG_P256K1`）
    Secp256k1,
}

/// 新規鍵の作成パラメータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub description: String,
    pub usage: KeyUsage,
    pub curve: KeyCurve,
}

impl Default for KeySpec {
    fn default() -> Self {
        Self {
            description: "Wallet key".to_string(),
            usage: KeyUsage::SignVerify,
            curve: KeyCurve::Secp256k1,
        }
    }
}

/// 署名アルゴリズム。
///
/// ダイジェストはそのまま署名させる（サービス側で再ハッシュさせない）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    EcdsaSha256,
}

/// カストディ呼び出しのエラー分類
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CustodyError {
    /// サービスに到達できない、または内部エラー
    #[error("カストディサービスを利用できません: {0}")]
    ServiceUnavailable(String),
    /// 鍵ハンドルが存在しない
    #[error("鍵が見つかりません: {0}")]
    KeyNotFound(String),
    /// レート制限
    #[error("カストディサービスのレート制限: {0}")]
    Throttled(String),
    /// 権限不足、鍵の無効化、用途不一致
    #[error("カストディサービスへのアクセスが拒否されました: {0}")]
    AccessDenied(String),
    /// 呼び出し期限を超過
    #[error("カストディ呼び出しがタイムアウトしました（{0:?}）")]
    Timeout(Duration),
    /// 呼び出し元によるキャンセル
    #[error("カストディ呼び出しがキャンセルされました")]
    Cancelled,
}

impl CustodyError {
    /// 再試行で回復しうるエラーかどうか
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CustodyError::ServiceUnavailable(_)
                | CustodyError::Throttled(_)
                | CustodyError::Timeout(_)
        )
    }
}

/// 鍵カストディバックエンドのトレイト。
///
/// 実装は呼び出しごとの期限・キャンセル・同時実行数を気にしなくてよい。
/// それらは [`CustodyClient`] が一括で適用する。
#[async_trait::async_trait]
pub trait KeyCustody: Send + Sync {
    /// バックエンド種別（ログ出力用）
    fn backend_name(&self) -> &str;

    /// 新しいsecp256k1署名鍵を作成し、ハンドルを返す。
    async fn create_key(&self, spec: &KeySpec) -> Result<KeyHandle, CustodyError>;

    /// 公開鍵をDER形式（SubjectPublicKeyInfo）のまま返す。
    async fn fetch_public_key(&self, key: &KeyHandle) -> Result<Vec<u8>, CustodyError>;

    /// 32バイトのダイジェストに署名し、DER形式のECDSA署名を返す。
    async fn sign_digest(
        &self,
        key: &KeyHandle,
        digest: &[u8; 32],
        algorithm: SigningAlgorithm,
    ) -> Result<Vec<u8>, CustodyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classes() {
        assert!(CustodyError::ServiceUnavailable("down".into()).is_transient());
        assert!(CustodyError::Throttled("slow down".into()).is_transient());
        assert!(CustodyError::Timeout(Duration::from_secs(1)).is_transient());

        assert!(!CustodyError::KeyNotFound("k".into()).is_transient());
        assert!(!CustodyError::AccessDenied("no".into()).is_transient());
        assert!(!CustodyError::Cancelled.is_transient());
    }

    #[test]
    fn test_default_key_spec() {
        let spec = KeySpec::default();
        assert_eq!(spec.description, "Wallet key");
        assert_eq!(spec.usage, KeyUsage::SignVerify);
        assert_eq!(spec.curve, KeyCurve::Secp256k1);
    }
}
