//! # カストディクライアント
//!
//! バックエンドを包み、全てのカストディ呼び出しに以下を適用する。
//! - 呼び出しごとの期限とキャンセル（[`CallContext`]）
//! - 同時実行数の上限（セマフォ）
//! - `Sign` の一時的エラーに対する指数バックオフ付き再試行

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use super::{CustodyError, KeyCustody, KeyHandle, KeySpec, SigningAlgorithm};

/// 呼び出しごとの期限とキャンセルトークン。
///
/// 期限はセマフォ待ちと呼び出し本体の合計に適用される。
#[derive(Debug, Clone)]
pub struct CallContext {
    timeout: Duration,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 期限内かつ未キャンセルの間だけ `fut` を駆動する。
    pub async fn run<T, F>(&self, fut: F) -> Result<T, CustodyError>
    where
        F: Future<Output = Result<T, CustodyError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CustodyError::Cancelled),
            result = tokio::time::timeout(self.timeout, fut) => {
                result.unwrap_or(Err(CustodyError::Timeout(self.timeout)))
            }
        }
    }
}

/// 指数バックオフの再試行ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 初回を含む最大試行回数（1以上）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// `attempt` 回目（1始まり）の失敗後に待つ時間。`base * 2^(attempt-1)`、上限 `max_delay`。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// 同時実行数と期限を管理するカストディクライアント。
#[derive(Clone)]
pub struct CustodyClient {
    backend: Arc<dyn KeyCustody>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl CustodyClient {
    pub fn new(backend: Arc<dyn KeyCustody>, max_in_flight: usize, retry: RetryPolicy) -> Self {
        Self {
            backend,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            retry,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>, CustodyError> {
        self.permits.acquire().await.map_err(|_| {
            CustodyError::ServiceUnavailable("カストディ呼び出しプールが閉じられています".to_string())
        })
    }

    /// 指定した [`KeySpec`] で新しい鍵を作成する。
    pub async fn create_key(&self, ctx: &CallContext, spec: &KeySpec) -> Result<KeyHandle, CustodyError> {
        ctx.run(async {
            let _permit = self.acquire().await?;
            self.backend.create_key(spec).await
        })
        .await
    }

    /// DER形式の公開鍵を取得する。
    pub async fn fetch_public_key(&self, ctx: &CallContext, key: &KeyHandle) -> Result<Vec<u8>, CustodyError> {
        ctx.run(async {
            let _permit = self.acquire().await?;
            self.backend.fetch_public_key(key).await
        })
        .await
    }

    /// ダイジェストに1回だけ署名する。
    pub async fn sign_digest(
        &self,
        ctx: &CallContext,
        key: &KeyHandle,
        digest: &[u8; 32],
    ) -> Result<Vec<u8>, CustodyError> {
        ctx.run(async {
            let _permit = self.acquire().await?;
            self.backend
                .sign_digest(key, digest, SigningAlgorithm::EcdsaSha256)
                .await
        })
        .await
    }

    /// 一時的エラー（`is_transient`）の間だけ再試行しながら署名する。
    ///
    /// 再試行の待ち時間中もキャンセルに反応する。非一時的エラーは即座に返す。
    pub async fn sign_with_retry(
        &self,
        ctx: &CallContext,
        key: &KeyHandle,
        digest: &[u8; 32],
    ) -> Result<Vec<u8>, CustodyError> {
        let mut attempt = 1u32;
        loop {
            match self.sign_digest(ctx, key, digest).await {
                Ok(der) => return Ok(der),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        key_id = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "署名呼び出しが一時的に失敗しました。再試行します"
                    );
                    tokio::select! {
                        _ = ctx.cancellation().cancelled() => return Err(CustodyError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::mock::MockCustody;

    fn client_with(mock: Arc<MockCustody>, max_in_flight: usize) -> CustodyClient {
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        CustodyClient::new(mock, max_in_flight, retry)
    }

    fn ctx(timeout: Duration) -> CallContext {
        CallContext::new(timeout, CancellationToken::new())
    }

    #[test]
    fn test_retry_delay_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_call_context_timeout() {
        let result: Result<(), _> = ctx(Duration::from_millis(20))
            .run(std::future::pending())
            .await;
        assert_eq!(result, Err(CustodyError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_call_context_cancellation() {
        let token = CancellationToken::new();
        let context = CallContext::new(Duration::from_secs(30), token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let result: Result<(), _> = context.run(std::future::pending()).await;
        assert_eq!(result, Err(CustodyError::Cancelled));
        canceller.await.unwrap();
    }

    /// 一時的エラーは再試行され、2回目で成功すること
    #[tokio::test]
    async fn test_sign_with_retry_recovers_from_transient_error() {
        let mock = Arc::new(MockCustody::new());
        let key = mock.create_key(&KeySpec::default()).await.unwrap();
        mock.push_sign_failure(CustodyError::Throttled("rate".into())).await;

        let client = client_with(mock.clone(), 4);
        let der = client
            .sign_with_retry(&ctx(Duration::from_secs(5)), &key, &[7u8; 32])
            .await
            .unwrap();

        assert!(!der.is_empty());
        assert_eq!(mock.sign_calls(), 2);
    }

    /// 非一時的エラーは再試行しないこと
    #[tokio::test]
    async fn test_sign_with_retry_stops_on_access_denied() {
        let mock = Arc::new(MockCustody::new());
        let key = mock.create_key(&KeySpec::default()).await.unwrap();
        mock.push_sign_failure(CustodyError::AccessDenied("disabled".into())).await;

        let client = client_with(mock.clone(), 4);
        let err = client
            .sign_with_retry(&ctx(Duration::from_secs(5)), &key, &[7u8; 32])
            .await
            .unwrap_err();

        assert!(matches!(err, CustodyError::AccessDenied(_)));
        assert_eq!(mock.sign_calls(), 1);
    }

    /// 試行回数の上限に達したら最後のエラーを返すこと
    #[tokio::test]
    async fn test_sign_with_retry_gives_up_after_max_attempts() {
        let mock = Arc::new(MockCustody::new());
        let key = mock.create_key(&KeySpec::default()).await.unwrap();
        for _ in 0..5 {
            mock.push_sign_failure(CustodyError::ServiceUnavailable("503".into()))
                .await;
        }

        let client = client_with(mock.clone(), 4);
        let err = client
            .sign_with_retry(&ctx(Duration::from_secs(5)), &key, &[7u8; 32])
            .await
            .unwrap_err();

        assert!(matches!(err, CustodyError::ServiceUnavailable(_)));
        assert_eq!(mock.sign_calls(), 3);
    }

    /// プールサイズ1では署名呼び出しが直列化されること
    #[tokio::test]
    async fn test_pool_bounds_in_flight_calls() {
        let mock = Arc::new(MockCustody::new());
        let key = mock.create_key(&KeySpec::default()).await.unwrap();
        mock.set_sign_delay(Duration::from_millis(50));

        let client = client_with(mock.clone(), 1);
        let context = ctx(Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        let (a, b) = tokio::join!(
            client.sign_digest(&context, &key, &[1u8; 32]),
            client.sign_digest(&context, &key, &[2u8; 32]),
        );

        assert!(a.is_ok() && b.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(mock.max_in_flight(), 1);
    }

    /// 期限はバックエンドの遅延にも適用されること
    #[tokio::test]
    async fn test_sign_digest_times_out_on_slow_backend() {
        let mock = Arc::new(MockCustody::new());
        let key = mock.create_key(&KeySpec::default()).await.unwrap();
        mock.set_sign_delay(Duration::from_millis(200));

        let client = CustodyClient::new(
            mock.clone(),
            4,
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
        );
        let err = client
            .sign_with_retry(&ctx(Duration::from_millis(20)), &key, &[1u8; 32])
            .await
            .unwrap_err();

        assert_eq!(err, CustodyError::Timeout(Duration::from_millis(20)));
    }
}
