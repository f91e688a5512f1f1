//! # Custody Gateway Core
//!
//! 署名対象となるEVMレガシートランザクションの構築・ハッシュ・エンコードを実装する。
//! I/Oを一切行わない純粋な処理のみを置く。
//!
//! ## 処理フロー
//! 1. 信頼できない文字列入力から `UnsignedTransaction` を構築する（[`build`]）
//! 2. EIP-155のプリイメージ `(nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0)`
//!    をRLPエンコードし、Keccak-256で署名ダイジェストを得る
//! 3. `(v, r, s)` を付与した `SignedTransaction` をRLPエンコードし、
//!    ブロードキャスト可能なバイト列にする

mod builder;
mod encoding;

pub use alloy_primitives::{Address, Bytes, U256};
pub use builder::{build, parse_address, parse_decimal, parse_hex_data};
pub use encoding::decode_signed;

/// Coreモジュールのエラー型
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    /// 入力フィールドのパースに失敗
    #[error("フィールド {field} が不正です: {reason}")]
    InvalidField {
        /// JSON上のフィールド名
        field: &'static str,
        /// 失敗理由
        reason: String,
    },
    /// 署名済みトランザクションの組み立てに失敗
    #[error("トランザクションのエンコードに失敗しました: {0}")]
    Encoding(String),
    /// 署名済みトランザクションのデコードに失敗
    #[error("トランザクションのデコードに失敗しました: {0}")]
    Decoding(String),
}

/// 署名前のレガシートランザクション。
///
/// 数値フィールドはチェーンのワード幅（256ビット）までの任意精度整数で保持する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    /// EIP-155 チェーンID
    pub chain_id: u64,
}

/// `(v, r, s)` 付きの署名済みトランザクション。
///
/// 構築時に `v` と `chain_id` の整合性を検証し、以後は変更しない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: UnsignedTransaction,
    v: u64,
    r: [u8; 32],
    s: [u8; 32],
}

impl SignedTransaction {
    /// 署名を付与する。
    ///
    /// `v` が `chain_id * 2 + 35 + {0, 1}` でない場合、または `r`/`s` がゼロの場合は
    /// `TxError::Encoding`。
    pub fn new(tx: UnsignedTransaction, v: u64, r: [u8; 32], s: [u8; 32]) -> Result<Self, TxError> {
        let base = tx
            .chain_id
            .checked_mul(2)
            .and_then(|x| x.checked_add(35))
            .ok_or_else(|| TxError::Encoding(format!("chainId {} が大きすぎます", tx.chain_id)))?;
        if v < base || v - base > 1 {
            return Err(TxError::Encoding(format!(
                "v={v} は chainId {} のEIP-155 v値ではありません",
                tx.chain_id
            )));
        }
        if r == [0u8; 32] || s == [0u8; 32] {
            return Err(TxError::Encoding("r または s がゼロです".to_string()));
        }

        Ok(Self { tx, v, r, s })
    }

    pub fn transaction(&self) -> &UnsignedTransaction {
        &self.tx
    }

    pub fn v(&self) -> u64 {
        self.v
    }

    pub fn r(&self) -> &[u8; 32] {
        &self.r
    }

    pub fn s(&self) -> &[u8; 32] {
        &self.s
    }

    /// `v` から逆算したリカバリーID（0 または 1）
    pub fn recovery_id(&self) -> u8 {
        // new() で v - (chainId * 2 + 35) ∈ {0, 1} を検証済み
        (self.v - self.tx.chain_id * 2 - 35) as u8
    }

    /// ブロードキャスト用の `0x` プレフィックス付き16進数文字列
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.encode()))
    }

    /// トランザクションハッシュ（エンコード結果のKeccak-256）
    pub fn hash(&self) -> [u8; 32] {
        alloy_primitives::keccak256(self.encode()).0
    }
}
