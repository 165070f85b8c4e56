use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

/// Ephemeral per-wallet field map holding decrypted secrets while a wallet is unlocked.
///
/// Nothing here is durable; losing the cache simply re-locks every encrypted wallet.
pub trait SecretCache: Send + Sync {
    fn get(&self, wallet_id: &Uuid, field: &str) -> Option<String>;
    fn set(&self, wallet_id: &Uuid, field: &str, value: String);
    fn delete_field(&self, wallet_id: &Uuid, field: &str);
    /// Drops every field of the wallet.
    fn delete(&self, wallet_id: &Uuid);
}

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<Uuid, HashMap<String, String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretCache for MemoryCache {
    fn get(&self, wallet_id: &Uuid, field: &str) -> Option<String> {
        self.entries
            .read()
            .get(wallet_id)
            .and_then(|fields| fields.get(field).cloned())
    }

    fn set(&self, wallet_id: &Uuid, field: &str, value: String) {
        self.entries
            .write()
            .entry(*wallet_id)
            .or_default()
            .insert(field.to_string(), value);
    }

    fn delete_field(&self, wallet_id: &Uuid, field: &str) {
        let mut entries = self.entries.write();
        if let Some(fields) = entries.get_mut(wallet_id) {
            fields.remove(field);
            if fields.is_empty() {
                entries.remove(wallet_id);
            }
        }
    }

    fn delete(&self, wallet_id: &Uuid) {
        self.entries.write().remove(wallet_id);
    }
}
