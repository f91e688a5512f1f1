//! # RLPエンコード
//!
//! EIP-155の署名プリイメージと署名済みレガシートランザクションのRLP表現。
//!
//! 数値は先頭ゼロなしのビッグエンディアン（ゼロは空文字列 `0x80`）、
//! `to` は20バイト文字列、`data` はバイト文字列としてエンコードする。

use alloy_primitives::{keccak256, Address, Bytes, U256};
use alloy_rlp::{BufMut, Decodable, Encodable, Header};

use crate::{SignedTransaction, TxError, UnsignedTransaction};

/// EIP-155 のv値オフセット
const EIP155_V_OFFSET: u64 = 35;

impl UnsignedTransaction {
    fn common_fields_len(&self) -> usize {
        self.nonce.length()
            + self.gas_price.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.data.length()
    }

    fn encode_common_fields(&self, out: &mut dyn BufMut) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.data.encode(out);
    }

    /// EIP-155の署名プリイメージ
    /// `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`
    pub fn signing_payload(&self) -> Vec<u8> {
        let payload_length = self.common_fields_len() + self.chain_id.length() + 2 * 0u8.length();

        let mut out = Vec::with_capacity(payload_length + 4);
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.encode_common_fields(&mut out);
        self.chain_id.encode(&mut out);
        0u8.encode(&mut out);
        0u8.encode(&mut out);
        out
    }

    /// 署名ダイジェスト（プリイメージのKeccak-256）。
    ///
    /// チェーンIDがプリイメージに含まれるため、別チェーンでの再生はできない。
    pub fn signing_digest(&self) -> [u8; 32] {
        keccak256(self.signing_payload()).0
    }
}

impl SignedTransaction {
    /// `rlp([nonce, gasPrice, gasLimit, to, value, data, v, r, s])`
    ///
    /// `r`/`s` は32バイト固定長で保持しているが、RLP上は整数として先頭ゼロを落とす。
    pub fn encode(&self) -> Vec<u8> {
        let r = U256::from_be_bytes(self.r);
        let s = U256::from_be_bytes(self.s);
        let payload_length =
            self.tx.common_fields_len() + self.v.length() + r.length() + s.length();

        let mut out = Vec::with_capacity(payload_length + 4);
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.tx.encode_common_fields(&mut out);
        self.v.encode(&mut out);
        r.encode(&mut out);
        s.encode(&mut out);
        out
    }
}

/// 署名済みレガシートランザクションをデコードする。
///
/// チェーンIDは `v` から逆算する（EIP-155以前の `v = 27/28` は受け付けない）。
pub fn decode_signed(raw: &[u8]) -> Result<SignedTransaction, TxError> {
    let mut buf = raw;
    let header = Header::decode(&mut buf).map_err(rlp_error)?;
    if !header.list {
        return Err(TxError::Decoding("RLPリストではありません".to_string()));
    }
    if header.payload_length != buf.len() {
        return Err(TxError::Decoding(format!(
            "ペイロード長が一致しません: ヘッダー {} / 実際 {}",
            header.payload_length,
            buf.len()
        )));
    }

    let nonce = U256::decode(&mut buf).map_err(rlp_error)?;
    let gas_price = U256::decode(&mut buf).map_err(rlp_error)?;
    let gas_limit = U256::decode(&mut buf).map_err(rlp_error)?;
    let to = Address::decode(&mut buf).map_err(rlp_error)?;
    let value = U256::decode(&mut buf).map_err(rlp_error)?;
    let data = Bytes::decode(&mut buf).map_err(rlp_error)?;
    let v = u64::decode(&mut buf).map_err(rlp_error)?;
    let r = U256::decode(&mut buf).map_err(rlp_error)?;
    let s = U256::decode(&mut buf).map_err(rlp_error)?;
    if !buf.is_empty() {
        return Err(TxError::Decoding(format!("末尾に {} バイトの余剰があります", buf.len())));
    }

    if v < EIP155_V_OFFSET {
        return Err(TxError::Decoding(format!("EIP-155形式のv値ではありません: {v}")));
    }
    let chain_id = (v - EIP155_V_OFFSET) / 2;

    let tx = UnsignedTransaction {
        nonce,
        gas_price,
        gas_limit,
        to,
        value,
        data,
        chain_id,
    };
    SignedTransaction::new(tx, v, r.to_be_bytes(), s.to_be_bytes())
}

fn rlp_error(e: alloy_rlp::Error) -> TxError {
    TxError::Decoding(e.to_string())
}
