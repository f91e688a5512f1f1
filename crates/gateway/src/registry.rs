//! # ウォレットレジストリ
//!
//! 作成済みウォレット（アドレスと鍵ハンドルの組）のプロセス内一覧。
//! 永続化はしない。再起動で空になる。

use std::collections::HashMap;

use custody_crypto::{format_address, Address};
use custody_types::Wallet;
use tokio::sync::RwLock;

use crate::custody::KeyHandle;
use crate::error::GatewayError;

#[derive(Default)]
struct Entries {
    /// 挿入順
    wallets: Vec<Wallet>,
    by_address: HashMap<Address, KeyHandle>,
}

/// ウォレットレジストリ。
///
/// ロックは一覧の読み書きの間だけ保持し、カストディ呼び出しをまたがない。
#[derive(Default)]
pub struct WalletRegistry {
    entries: RwLock<Entries>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// ウォレットを追加する。同じアドレスが既に登録済みなら `Internal`。
    pub async fn insert(&self, address: Address, key: KeyHandle) -> Result<Wallet, GatewayError> {
        let mut entries = self.entries.write().await;
        if entries.by_address.contains_key(&address) {
            return Err(GatewayError::Internal(format!(
                "アドレス {} は登録済みです",
                format_address(&address)
            )));
        }

        let wallet = Wallet {
            address: format_address(&address),
            key_id: key.as_str().to_string(),
        };
        entries.by_address.insert(address, key);
        entries.wallets.push(wallet.clone());
        Ok(wallet)
    }

    /// 挿入順のスナップショットを返す。
    pub async fn list(&self) -> Vec<Wallet> {
        self.entries.read().await.wallets.clone()
    }

    /// アドレスに登録された鍵ハンドル
    pub async fn lookup(&self, address: &Address) -> Option<KeyHandle> {
        self.entries.read().await.by_address.get(address).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[tokio::test]
    async fn test_insert_and_list_in_order() {
        let registry = WalletRegistry::new();
        registry.insert(address(1), KeyHandle::new("k1")).await.unwrap();
        registry.insert(address(2), KeyHandle::new("k2")).await.unwrap();
        registry.insert(address(3), KeyHandle::new("k3")).await.unwrap();

        let keys: Vec<_> = registry.list().await.into_iter().map(|w| w.key_id).collect();
        assert_eq!(keys, vec!["k1", "k2", "k3"]);
        assert_eq!(registry.list().await.len(), 3);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_address() {
        let registry = WalletRegistry::new();
        registry.insert(address(1), KeyHandle::new("k1")).await.unwrap();

        let err = registry.insert(address(1), KeyHandle::new("k2")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Internal(_)));
        assert_eq!(registry.list().await.len(), 1);
        assert_eq!(registry.lookup(&address(1)).await, Some(KeyHandle::new("k1")));
    }

    #[tokio::test]
    async fn test_wallet_address_is_lowercase_hex() {
        let registry = WalletRegistry::new();
        let wallet = registry.insert(address(0xab), KeyHandle::new("k")).await.unwrap();
        assert_eq!(wallet.address, format!("0x{}", "ab".repeat(20)));
        assert_eq!(registry.lookup(&address(0xcd)).await, None);
    }

    /// 列挙結果は呼び出し時点のスナップショットであること
    #[tokio::test]
    async fn test_list_is_a_snapshot() {
        let registry = WalletRegistry::new();
        registry.insert(address(1), KeyHandle::new("k1")).await.unwrap();

        let snapshot = registry.list().await;
        registry.insert(address(2), KeyHandle::new("k2")).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.list().await.len(), 2);
    }
}
