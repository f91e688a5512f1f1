//! # AWS KMS カストディ
//!
//! `aws-sdk-kms` による本番用バックエンド。
//! 認証情報とリージョンはSDKの既定プロバイダチェーン
//! （`AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_REGION` 等）から解決する。

use aws_config::meta::region::RegionProviderChain;
use aws_sdk_kms as kms;
use kms::config::Region;
use kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use kms::primitives::Blob;
use kms::types::{KeySpec as KmsKeySpec, KeyUsageType, MessageType, SigningAlgorithmSpec};
use kms::Client;

use super::{CustodyError, KeyCurve, KeyCustody, KeyHandle, KeySpec, KeyUsage, SigningAlgorithm};

/// AWS KMS バックエンド
#[derive(Debug, Clone)]
pub struct KmsCustody {
    client: Client,
}

impl KmsCustody {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// SDKの既定設定からクライアントを構築する。`region` 指定時はそれを優先する。
    pub async fn from_env(region: Option<String>) -> Self {
        let region_provider = RegionProviderChain::first_try(region.map(Region::new))
            .or_default_provider();
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        Self::new(Client::new(&config))
    }
}

#[async_trait::async_trait]
impl KeyCustody for KmsCustody {
    fn backend_name(&self) -> &str {
        "aws-kms"
    }

    async fn create_key(&self, spec: &KeySpec) -> Result<KeyHandle, CustodyError> {
        let key_spec = match spec.curve {
            KeyCurve::Secp256k1 => KmsKeySpec::EccSecgP256K1,
        };
        let key_usage = match spec.usage {
            KeyUsage::SignVerify => KeyUsageType::SignVerify,
        };

        let output = self
            .client
            .create_key()
            .description(&spec.description)
            .key_spec(key_spec)
            .key_usage(key_usage)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let metadata = output.key_metadata().ok_or_else(|| {
            CustodyError::ServiceUnavailable("CreateKeyの応答にKeyMetadataがありません".to_string())
        })?;
        Ok(KeyHandle::new(metadata.key_id()))
    }

    async fn fetch_public_key(&self, key: &KeyHandle) -> Result<Vec<u8>, CustodyError> {
        let output = self
            .client
            .get_public_key()
            .key_id(key.as_str())
            .send()
            .await
            .map_err(classify_sdk_error)?;

        output
            .public_key()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| {
                CustodyError::ServiceUnavailable("GetPublicKeyの応答に公開鍵がありません".to_string())
            })
    }

    async fn sign_digest(
        &self,
        key: &KeyHandle,
        digest: &[u8; 32],
        algorithm: SigningAlgorithm,
    ) -> Result<Vec<u8>, CustodyError> {
        let algorithm = match algorithm {
            SigningAlgorithm::EcdsaSha256 => SigningAlgorithmSpec::EcdsaSha256,
        };

        let output = self
            .client
            .sign()
            .key_id(key.as_str())
            .message(Blob::new(digest.to_vec()))
            .message_type(MessageType::Digest)
            .signing_algorithm(algorithm)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        output
            .signature()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| {
                CustodyError::ServiceUnavailable("Signの応答に署名がありません".to_string())
            })
    }
}

/// SDKエラーをカストディのエラー分類に変換する。
fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> CustodyError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            CustodyError::ServiceUnavailable(message)
        }
        _ => classify_error_code(err.code(), message),
    }
}

/// KMSのエラーコードを分類する。未知のコードはサービス側の障害として扱う。
fn classify_error_code(code: Option<&str>, message: String) -> CustodyError {
    match code {
        Some("NotFoundException") => CustodyError::KeyNotFound(message),
        Some("ThrottlingException" | "LimitExceededException") => CustodyError::Throttled(message),
        Some(
            "AccessDeniedException"
            | "DisabledException"
            | "KMSInvalidStateException"
            | "InvalidKeyUsageException"
            | "IncorrectKeyException",
        ) => CustodyError::AccessDenied(message),
        _ => CustodyError::ServiceUnavailable(message),
    }
}
