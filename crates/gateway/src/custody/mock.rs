//! # ローカル開発用モックカストディ
//!
//! KMSが利用できない開発環境・テストで使用するモック実装。
//! メモリ内にsecp256k1鍵を保持し、RFC 6979の決定的署名をDER形式で返す。
//!
//! テスト用に以下の挙動を差し込める。
//! - high-S署名の返却（正規化処理の検証用）
//! - 署名呼び出しの失敗（再試行・エラー分類の検証用）
//! - 固定の署名バイト列（不正DERの検証用）
//! - 署名呼び出しの遅延（期限・同時実行数の検証用）

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey};
use k256::pkcs8::EncodePublicKey;
use tokio::sync::{Mutex, RwLock};

use super::{CustodyError, KeyCurve, KeyCustody, KeyHandle, KeySpec, SigningAlgorithm};

/// メモリ内モックカストディ。ローカル開発・テスト用。
#[derive(Default)]
pub struct MockCustody {
    keys: RwLock<HashMap<String, SigningKey>>,
    emit_high_s: AtomicBool,
    sign_failures: Mutex<VecDeque<CustodyError>>,
    fixed_signature: Mutex<Option<Vec<u8>>>,
    sign_delay_ms: AtomicU64,
    create_calls: AtomicUsize,
    public_key_calls: AtomicUsize,
    sign_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// 既存の秘密鍵を登録し、そのハンドルを返す。
    pub async fn insert_key(&self, signing_key: SigningKey) -> KeyHandle {
        let handle = KeyHandle::new(uuid::Uuid::new_v4().to_string());
        self.keys
            .write()
            .await
            .insert(handle.as_str().to_string(), signing_key);
        handle
    }

    /// 署名のsを `n - s`（high-S）にして返すかどうか
    pub fn set_emit_high_s(&self, enabled: bool) {
        self.emit_high_s.store(enabled, Ordering::SeqCst);
    }

    /// 次回以降の署名呼び出しで返すエラーを積む（先入れ先出し）
    pub async fn push_sign_failure(&self, error: CustodyError) {
        self.sign_failures.lock().await.push_back(error);
    }

    /// 署名呼び出しが常に返すバイト列を固定する
    pub async fn set_fixed_signature(&self, der: Vec<u8>) {
        *self.fixed_signature.lock().await = Some(der);
    }

    pub fn set_sign_delay(&self, delay: Duration) {
        self.sign_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn public_key_calls(&self) -> usize {
        self.public_key_calls.load(Ordering::SeqCst)
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    /// これまでに同時に実行された署名呼び出し数の最大値
    pub fn max_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// 全カストディ呼び出しの合計
    pub fn total_calls(&self) -> usize {
        self.create_calls() + self.public_key_calls() + self.sign_calls()
    }

    async fn lookup(&self, key: &KeyHandle) -> Result<SigningKey, CustodyError> {
        self.keys
            .read()
            .await
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| CustodyError::KeyNotFound(key.to_string()))
    }

    async fn sign_inner(&self, key: &KeyHandle, digest: &[u8; 32]) -> Result<Vec<u8>, CustodyError> {
        let delay = self.sign_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if let Some(error) = self.sign_failures.lock().await.pop_front() {
            return Err(error);
        }
        if let Some(der) = self.fixed_signature.lock().await.clone() {
            return Ok(der);
        }

        let signing_key = self.lookup(key).await?;
        let signature: EcdsaSignature = signing_key
            .sign_prehash(digest)
            .map_err(|e| CustodyError::ServiceUnavailable(format!("署名に失敗: {e}")))?;

        let signature = if self.emit_high_s.load(Ordering::SeqCst) {
            // k256 は常に low-S を返すため、s を反転して high-S を作る
            EcdsaSignature::from_scalars(signature.r(), -signature.s())
                .map_err(|e| CustodyError::ServiceUnavailable(format!("high-S署名の構築に失敗: {e}")))?
        } else {
            signature
        };

        Ok(signature.to_der().as_bytes().to_vec())
    }
}

/// 同時実行数を数えるためのガード
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl KeyCustody for MockCustody {
    fn backend_name(&self) -> &str {
        "mock"
    }

    async fn create_key(&self, spec: &KeySpec) -> Result<KeyHandle, CustodyError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let KeyCurve::Secp256k1 = spec.curve;

        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let handle = self.insert_key(signing_key).await;
        tracing::debug!(key_id = %handle, description = %spec.description, "モック鍵を作成");
        Ok(handle)
    }

    async fn fetch_public_key(&self, key: &KeyHandle) -> Result<Vec<u8>, CustodyError> {
        self.public_key_calls.fetch_add(1, Ordering::SeqCst);

        let signing_key = self.lookup(key).await?;
        let der = k256::PublicKey::from(signing_key.verifying_key())
            .to_public_key_der()
            .map_err(|e| CustodyError::ServiceUnavailable(format!("公開鍵のエンコードに失敗: {e}")))?;
        Ok(der.as_bytes().to_vec())
    }

    async fn sign_digest(
        &self,
        key: &KeyHandle,
        digest: &[u8; 32],
        algorithm: SigningAlgorithm,
    ) -> Result<Vec<u8>, CustodyError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        let SigningAlgorithm::EcdsaSha256 = algorithm;

        let _guard = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        self.sign_inner(key, digest).await
    }
}
