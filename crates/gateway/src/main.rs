//! # Custody Gateway
//!
//! 秘密鍵を保持しないEVMトランザクション署名ゲートウェイ。
//! 署名そのものは外部の鍵カストディサービス（AWS KMS）に委譲し、
//! 返された署名をチェーンが受理する正規形に整えてから返す。
//!
//! ## API エンドポイント
//! - `GET /`: 死活監視
//! - `POST /wallet`: カストディ鍵の作成 + ウォレット登録
//! - `GET /wallets`: 作成済みウォレットの一覧
//! - `POST /sign`: EIP-155 署名済みトランザクションの生成

mod config;
mod custody;
mod endpoints;
mod error;
mod pipeline;
mod registry;

use std::sync::Arc;

use axum::http::{header, Method};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{CustodyBackend, GatewayConfig, GatewayState};
use crate::custody::{CustodyClient, KeyCustody};

/// ルーターを構築する。
fn build_router(state: Arc<GatewayState>) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    axum::Router::new()
        .route("/", axum::routing::get(endpoints::handle_health))
        .route("/wallet", axum::routing::post(endpoints::handle_create_wallet))
        .route("/wallets", axum::routing::get(endpoints::handle_list_wallets))
        .route("/sign", axum::routing::post(endpoints::handle_sign))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 設定に応じてカストディバックエンドを選択する。
async fn select_backend(config: &GatewayConfig) -> anyhow::Result<Arc<dyn KeyCustody>> {
    match config.backend {
        CustodyBackend::Mock => {
            tracing::warn!("MockCustodyで起動します（開発環境用、鍵はメモリ内に保持されます）");
            Ok(Arc::new(custody::mock::MockCustody::new()))
        }
        #[cfg(feature = "vendor-aws")]
        CustodyBackend::Aws => {
            tracing::info!(region = ?config.aws_region, "AWS KMSで起動します");
            Ok(Arc::new(
                custody::kms::KmsCustody::from_env(config.aws_region.clone()).await,
            ))
        }
        #[cfg(not(feature = "vendor-aws"))]
        CustodyBackend::Aws => {
            anyhow::bail!("AWS KMSバックエンドは無効です（feature `vendor-aws` でビルドしてください）")
        }
    }
}

/// Ctrl-C を受けたら終了トークンをキャンセルする。
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "終了シグナルの待機に失敗しました");
    }
    tracing::info!("終了シグナルを受信しました");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env()?;
    let backend = select_backend(&config).await?;
    let custody = CustodyClient::new(backend, config.max_in_flight, config.retry_policy());

    let shutdown = CancellationToken::new();
    let state = Arc::new(GatewayState::new(
        custody,
        config.call_timeout,
        shutdown.clone(),
    ));

    let app = build_router(state);

    tracing::info!(
        addr = %config.bind_addr,
        call_timeout_ms = config.call_timeout.as_millis() as u64,
        max_in_flight = config.max_in_flight,
        "Gatewayを起動します"
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}
