//! # Custody Gateway 共有型定義
//!
//! HTTP API（JSON）で送受信されるデータ構造をRust構造体として提供する。
//!
//! ## エンコーディング規則
//! - アドレス: `0x` プレフィックス付きの小文字16進数（20バイト）
//! - 数値フィールド: 10進数文字列（任意精度、`chainId` のみJSON数値）
//! - バイト列（`data`、署名済みトランザクション）: 16進数文字列

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ウォレット
// ---------------------------------------------------------------------------

/// カストディサービス上の鍵と、その公開鍵から導出したアドレスの組。
///
/// `POST /wallet` のレスポンス、および `GET /wallets` の配列要素。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    /// `0x` プレフィックス付き小文字16進数のアカウントアドレス
    pub address: String,
    /// カストディサービスの鍵ハンドル（AWS KMSではKeyId）
    pub key_id: String,
}

// ---------------------------------------------------------------------------
// 署名リクエスト / レスポンス
// ---------------------------------------------------------------------------

/// `POST /sign` のリクエストボディ。
///
/// 数値フィールドは全て10進数文字列で受け取り、ビルダーで任意精度整数に変換する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionRequest {
    /// 署名者として期待するウォレットアドレス
    pub wallet_address: String,
    /// 署名に使用するカストディ鍵ハンドル
    pub key_id: String,
    /// ノンス（10進数文字列）
    pub nonce: String,
    /// 送金先アドレス（16進数、`0x` 省略可）
    pub to: String,
    /// 送金額 wei（10進数文字列）
    pub value: String,
    /// ガスリミット（10進数文字列）
    pub gas_limit: String,
    /// ガス価格 wei（10進数文字列）
    pub gas_price: String,
    /// コールデータ（16進数、`0x` 省略可、省略時は空）
    #[serde(default)]
    pub data: String,
    /// EIP-155 チェーンID
    pub chain_id: u64,
}

/// `POST /sign` のレスポンスボディ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionResponse {
    /// ブロードキャスト可能な署名済みトランザクション（`0x` プレフィックス付き16進数）
    pub signed_transaction: String,
}

// ---------------------------------------------------------------------------
// ヘルスチェック
// ---------------------------------------------------------------------------

/// `GET /` のレスポンスボディ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub message: String,
}
