//! # 署名パイプライン
//!
//! `POST /sign` 1件を以下の段階で処理する。段階は単調に進み、どの段階で失敗しても
//! それ以降の段階は実行されない。
//!
//! | 段階 | 内容 |
//! |------|------|
//! | Validating | ウォレットアドレス・鍵ハンドルの検証 |
//! | Building | 文字列フィールドから署名前トランザクションを構築 |
//! | Hashing | EIP-155 署名ダイジェストの計算 |
//! | AwaitingSignature | 公開鍵取得・アドレス照合・カストディ署名 |
//! | Decoding | DER署名のデコード |
//! | Normalizing | low-S正規化・リカバリーID決定・v計算 |
//! | Encoding | 署名済みトランザクションのRLPエンコード |
//!
//! 入力の検証に失敗した場合、カストディサービスは一度も呼ばれない。

use custody_core::{parse_address, SignedTransaction};
use custody_crypto::{decode_der_signature, derive_address, format_address, public_key_from_der};
use custody_types::SignTransactionRequest;

use crate::config::GatewayState;
use crate::custody::KeyHandle;
use crate::error::GatewayError;

/// パイプラインの段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    Validating,
    Building,
    Hashing,
    AwaitingSignature,
    Decoding,
    Normalizing,
    Encoding,
    Done,
}

struct Pipeline {
    stage: Stage,
}

impl Pipeline {
    fn new() -> Self {
        Self { stage: Stage::Idle }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "段階は逆行しない: {:?} -> {:?}", self.stage, next);
        tracing::debug!(from = ?self.stage, to = ?next, "署名パイプラインの段階遷移");
        self.stage = next;
    }

    async fn run(
        &mut self,
        state: &GatewayState,
        request: &SignTransactionRequest,
    ) -> Result<SignedTransaction, GatewayError> {
        self.advance(Stage::Validating);
        let wallet = parse_address("walletAddress", &request.wallet_address)?;
        if request.key_id.trim().is_empty() {
            return Err(GatewayError::invalid_field("keyId", "空文字列です"));
        }
        let key = KeyHandle::new(request.key_id.clone());
        if let Some(registered) = state.registry.lookup(&wallet).await {
            if registered != key {
                return Err(GatewayError::AddressMismatch {
                    expected: format_address(&wallet),
                    derived: format!("登録済みの鍵 {registered} と異なる鍵 {key}"),
                });
            }
        }

        self.advance(Stage::Building);
        let tx = custody_core::build(request)?;

        self.advance(Stage::Hashing);
        let digest = tx.signing_digest();

        self.advance(Stage::AwaitingSignature);
        let ctx = state.call_context();
        let der_public_key = state.custody.fetch_public_key(&ctx, &key).await?;
        let public_key = public_key_from_der(&der_public_key)?;
        let derived = derive_address(&public_key)?;
        if derived != wallet {
            return Err(GatewayError::AddressMismatch {
                expected: format_address(&wallet),
                derived: format_address(&derived),
            });
        }
        let der_signature = state.custody.sign_with_retry(&ctx, &key, &digest).await?;

        self.advance(Stage::Decoding);
        let raw = decode_der_signature(&der_signature)?;

        self.advance(Stage::Normalizing);
        let signature = raw.normalize()?.recover(&digest, &derived)?;
        let v = signature.v(tx.chain_id)?;

        self.advance(Stage::Encoding);
        let chain_id = tx.chain_id;
        let signed = SignedTransaction::new(tx, v, signature.r, signature.s)?;

        self.advance(Stage::Done);
        tracing::info!(
            wallet = %format_address(&derived),
            key_id = %key,
            chain_id,
            recovery_id = signature.recovery_id,
            tx_hash = %format!("0x{}", hex::encode(signed.hash())),
            "トランザクションに署名しました"
        );
        Ok(signed)
    }
}

/// 署名リクエストを処理し、署名済みトランザクションを返す。
pub async fn sign_transaction(
    state: &GatewayState,
    request: &SignTransactionRequest,
) -> Result<SignedTransaction, GatewayError> {
    let mut pipeline = Pipeline::new();
    let result = pipeline.run(state, request).await;
    if let Err(e) = &result {
        tracing::warn!(
            stage = ?pipeline.stage,
            wallet = %request.wallet_address,
            error = %e,
            "署名パイプラインが失敗しました"
        );
    }
    result
}
