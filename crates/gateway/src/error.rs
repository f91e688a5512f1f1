//! # Gateway エラー型
//!
//! 下位クレートのエラーをHTTPステータスへ対応付ける。

use axum::http::StatusCode;
use custody_core::TxError;
use custody_crypto::CryptoError;

use crate::custody::CustodyError;

/// Gatewayエラー型。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// リクエストボディをデコードできない
    #[error("不正なリクエスト: {0}")]
    InvalidRequest(String),
    /// リクエストのフィールドが不正
    #[error("不正なフィールド {field}: {reason}")]
    InvalidField { field: String, reason: String },
    /// 鍵から導出したアドレスがリクエストのウォレットアドレスと一致しない
    #[error("ウォレットアドレスが鍵と一致しません: 期待 {expected} / 導出 {derived}")]
    AddressMismatch { expected: String, derived: String },
    /// カストディサービスの呼び出しに失敗
    #[error(transparent)]
    Custody(#[from] CustodyError),
    /// カストディサービスが返した公開鍵が不正
    #[error("公開鍵が不正です: {0}")]
    InvalidPublicKey(String),
    /// カストディサービスが返した署名が不正
    #[error("署名のデコードに失敗しました: {0}")]
    SignatureDecode(String),
    /// 署名済みトランザクションのエンコードに失敗
    #[error("エンコードに失敗しました: {0}")]
    Encoding(String),
    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) | GatewayError::InvalidField { .. } => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::AddressMismatch { .. } => StatusCode::UNAUTHORIZED,
            GatewayError::Custody(_)
            | GatewayError::InvalidPublicKey(_)
            | GatewayError::SignatureDecode(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Encoding(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<CryptoError> for GatewayError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidPublicKey(msg) => GatewayError::InvalidPublicKey(msg),
            CryptoError::SignatureDecode(msg) => GatewayError::SignatureDecode(msg),
            CryptoError::Encoding(msg) => GatewayError::Encoding(msg),
        }
    }
}

impl From<TxError> for GatewayError {
    fn from(e: TxError) -> Self {
        match e {
            TxError::InvalidField { field, reason } => GatewayError::invalid_field(field, reason),
            TxError::Encoding(msg) | TxError::Decoding(msg) => GatewayError::Encoding(msg),
        }
    }
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::invalid_field("nonce", "x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::InvalidRequest("missing field `nonce`".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::AddressMismatch {
                expected: "0xa".into(),
                derived: "0xb".into()
            }
            .status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::from(CustodyError::AccessDenied("x".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::from(CryptoError::SignatureDecode("x".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::from(CryptoError::Encoding("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_invalid_field_keeps_field_name() {
        let err = GatewayError::from(TxError::InvalidField {
            field: "gasLimit",
            reason: "空文字列です".into(),
        });
        match err {
            GatewayError::InvalidField { field, .. } => assert_eq!(field, "gasLimit"),
            other => panic!("InvalidFieldを期待: {other:?}"),
        }
    }
}
