//! # POST /sign
//!
//! 署名パイプラインを実行し、ブロードキャスト可能なトランザクションを返す。

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use custody_types::{SignTransactionRequest, SignTransactionResponse};

use crate::config::GatewayState;
use crate::error::GatewayError;
use crate::pipeline::sign_transaction;

/// POST /sign: トランザクションに署名する。
///
/// ボディのデコード失敗（型違い・欠落フィールド・Content-Type不正）は全て400にする。
pub async fn handle_sign(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<SignTransactionRequest>, JsonRejection>,
) -> Result<Json<SignTransactionResponse>, GatewayError> {
    let Json(body) = payload.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    let signed = sign_transaction(&state, &body).await?;

    Ok(Json(SignTransactionResponse {
        signed_transaction: signed.to_hex(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use tokio_util::sync::CancellationToken;

    use crate::custody::mock::MockCustody;
    use crate::custody::{CustodyClient, RetryPolicy};
    use crate::endpoints::handle_create_wallet;

    fn test_state(mock: Arc<MockCustody>) -> Arc<GatewayState> {
        Arc::new(GatewayState::new(
            CustodyClient::new(mock, 8, RetryPolicy::default()),
            Duration::from_secs(5),
            CancellationToken::new(),
        ))
    }

    fn request_for(address: &str, key_id: &str) -> SignTransactionRequest {
        SignTransactionRequest {
            wallet_address: address.to_string(),
            key_id: key_id.to_string(),
            nonce: "3".to_string(),
            to: "0x3535353535353535353535353535353535353535".to_string(),
            value: "0".to_string(),
            gas_limit: "60000".to_string(),
            gas_price: "1000000000".to_string(),
            data: "0xa9059cbb".to_string(),
            chain_id: 1,
        }
    }

    #[tokio::test]
    async fn test_sign_created_wallet() {
        let state = test_state(Arc::new(MockCustody::new()));
        let wallet = handle_create_wallet(State(state.clone())).await.unwrap().0;

        let response = handle_sign(
            State(state),
            Ok(Json(request_for(&wallet.address, &wallet.key_id))),
        )
        .await
        .unwrap()
        .0;

        assert!(response.signed_transaction.starts_with("0x"));
        assert!(!response.signed_transaction.starts_with("0x0x"));
        let raw = hex::decode(&response.signed_transaction[2..]).unwrap();
        let decoded = custody_core::decode_signed(&raw).unwrap();
        assert_eq!(&decoded.transaction().data[..], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert!(decoded.v() == 37 || decoded.v() == 38);
    }

    #[tokio::test]
    async fn test_sign_error_statuses() {
        let state = test_state(Arc::new(MockCustody::new()));
        let wallet = handle_create_wallet(State(state.clone())).await.unwrap().0;
        let other = handle_create_wallet(State(state.clone())).await.unwrap().0;

        let mut bad_value = request_for(&wallet.address, &wallet.key_id);
        bad_value.value = "1.5".to_string();
        let err = handle_sign(State(state.clone()), Ok(Json(bad_value)))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let mismatched = request_for(&other.address, &wallet.key_id);
        let err = handle_sign(State(state.clone()), Ok(Json(mismatched)))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);

        let unknown_key = request_for("0x1111111111111111111111111111111111111111", "missing-key");
        let err = handle_sign(State(state), Ok(Json(unknown_key)))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
