//! # POST /wallet, GET /wallets
//!
//! カストディサービスに鍵を作らせ、その公開鍵から導出したアドレスをレジストリに登録する。

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use custody_crypto::{derive_address, format_address, public_key_from_der};
use custody_types::Wallet;

use crate::config::GatewayState;
use crate::custody::KeySpec;
use crate::error::GatewayError;

/// POST /wallet: 新しいウォレットを作成する。
///
/// 鍵作成後に失敗した場合、鍵はカストディサービス側に残るがレジストリには登録されない。
pub async fn handle_create_wallet(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Wallet>, GatewayError> {
    let ctx = state.call_context();
    let key = state.custody.create_key(&ctx, &KeySpec::default()).await?;
    let der = state.custody.fetch_public_key(&ctx, &key).await?;

    let public_key = public_key_from_der(&der)?;
    let address = derive_address(&public_key)?;
    let wallet = state.registry.insert(address, key).await?;

    tracing::info!(
        address = %format_address(&address),
        key_id = %wallet.key_id,
        backend = state.custody.backend_name(),
        "ウォレットを作成しました"
    );
    Ok(Json(wallet))
}

/// GET /wallets: 作成済みウォレットを作成順に返す。
pub async fn handle_list_wallets(State(state): State<Arc<GatewayState>>) -> Json<Vec<Wallet>> {
    Json(state.registry.list().await)
}
