//! # Gateway設定・共有状態
//!
//! 環境変数からの設定読み込みとGatewayの共有状態の定義。

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::custody::{CallContext, CustodyClient, RetryPolicy};
use crate::registry::WalletRegistry;

/// バックオフ待ち時間の上限
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// カストディバックエンドの種別（`CUSTODY_BACKEND`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustodyBackend {
    Aws,
    Mock,
}

impl FromStr for CustodyBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws" | "kms" => Ok(CustodyBackend::Aws),
            "mock" => Ok(CustodyBackend::Mock),
            other => anyhow::bail!("CUSTODY_BACKEND は aws または mock である必要があります: {other}"),
        }
    }
}

/// 起動時に一度だけ読み込む設定
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub backend: CustodyBackend,
    /// 未指定ならSDKの既定チェーンで解決する
    pub aws_region: Option<String>,
    pub call_timeout: Duration,
    pub max_in_flight: usize,
    pub sign_max_attempts: u32,
    pub sign_retry_base: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の変数ソースから設定を組み立てる。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = parse_or(&lookup, "BIND_ADDR", "0.0.0.0:8080".parse::<SocketAddr>()?)?;
        let backend = parse_or(&lookup, "CUSTODY_BACKEND", CustodyBackend::Aws)?;
        let aws_region = lookup("AWS_REGION").filter(|r| !r.is_empty());
        let call_timeout_ms: u64 = parse_or(&lookup, "CUSTODY_CALL_TIMEOUT_MS", 10_000)?;
        let max_in_flight: usize = parse_or(&lookup, "CUSTODY_MAX_IN_FLIGHT", 64)?;
        let sign_max_attempts: u32 = parse_or(&lookup, "SIGN_MAX_ATTEMPTS", 3)?;
        let sign_retry_base_ms: u64 = parse_or(&lookup, "SIGN_RETRY_BASE_MS", 100)?;

        anyhow::ensure!(call_timeout_ms > 0, "CUSTODY_CALL_TIMEOUT_MS は1以上である必要があります");
        anyhow::ensure!(max_in_flight > 0, "CUSTODY_MAX_IN_FLIGHT は1以上である必要があります");
        anyhow::ensure!(sign_max_attempts > 0, "SIGN_MAX_ATTEMPTS は1以上である必要があります");

        Ok(Self {
            bind_addr,
            backend,
            aws_region,
            call_timeout: Duration::from_millis(call_timeout_ms),
            max_in_flight,
            sign_max_attempts,
            sign_retry_base: Duration::from_millis(sign_retry_base_ms),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sign_max_attempts,
            base_delay: self.sign_retry_base,
            max_delay: MAX_RETRY_DELAY,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("環境変数 {name} の値が不正です: {raw:?}")),
        _ => Ok(default),
    }
}

/// Gatewayの共有状態。
pub struct GatewayState {
    pub registry: WalletRegistry,
    pub custody: CustodyClient,
    /// カストディ呼び出し1回あたりの期限
    pub call_timeout: Duration,
    /// プロセス終了時にキャンセルされるトークン
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(custody: CustodyClient, call_timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            registry: WalletRegistry::new(),
            custody,
            call_timeout,
            shutdown,
        }
    }

    /// リクエストごとのカストディ呼び出しコンテキスト
    pub fn call_context(&self) -> CallContext {
        CallContext::new(self.call_timeout, self.shutdown.child_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<GatewayConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.backend, CustodyBackend::Aws);
        assert_eq!(config.aws_region, None);
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("CUSTODY_BACKEND", "MOCK"),
            ("AWS_REGION", "eu-west-1"),
            ("CUSTODY_CALL_TIMEOUT_MS", "2500"),
            ("CUSTODY_MAX_IN_FLIGHT", "8"),
            ("SIGN_MAX_ATTEMPTS", "5"),
            ("SIGN_RETRY_BASE_MS", "50"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.backend, CustodyBackend::Mock);
        assert_eq!(config.aws_region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.call_timeout, Duration::from_millis(2500));
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.retry_policy().base_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_malformed_values_fail() {
        assert!(config_from(&[("CUSTODY_CALL_TIMEOUT_MS", "soon")]).is_err());
        assert!(config_from(&[("CUSTODY_MAX_IN_FLIGHT", "0")]).is_err());
        assert!(config_from(&[("CUSTODY_BACKEND", "vault")]).is_err());
        assert!(config_from(&[("BIND_ADDR", "localhost")]).is_err());
    }

    /// リクエストごとのコンテキストは終了トークンの子であること
    #[test]
    fn test_call_context_follows_shutdown() {
        let shutdown = CancellationToken::new();
        let custody = CustodyClient::new(
            std::sync::Arc::new(crate::custody::mock::MockCustody::new()),
            1,
            RetryPolicy::default(),
        );
        let state = GatewayState::new(custody, Duration::from_secs(1), shutdown.clone());

        let ctx = state.call_context();
        assert!(!ctx.cancellation().is_cancelled());
        shutdown.cancel();
        assert!(ctx.cancellation().is_cancelled());
    }
}
