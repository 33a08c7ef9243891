// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for transaction history first-page lookups.
//!
//! Caches the first page of a user's transaction log to avoid repeated redb
//! reads for the most common query. Every ledger mutation for a user must
//! call [`HistoryCache::invalidate`].

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::TransactionRecord;

struct CacheEntry {
    page: Vec<TransactionRecord>,
    next_cursor: Option<String>,
    inserted_at: Instant,
}

/// In-process LRU cache keyed by user id.
pub struct HistoryCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl HistoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    /// Cached first page and its cursor. `None` if absent or expired.
    pub fn get_first_page(
        &self,
        user_id: &str,
    ) -> Option<(Vec<TransactionRecord>, Option<String>)> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(user_id) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some((entry.page.clone(), entry.next_cursor.clone()));
            }
            cache.pop(user_id);
        }
        None
    }

    pub fn put_first_page(
        &self,
        user_id: &str,
        page: Vec<TransactionRecord>,
        next_cursor: Option<String>,
    ) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                user_id.to_string(),
                CacheEntry {
                    page,
                    next_cursor,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    pub fn invalidate(&self, user_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Currency, TxKind, TxStatus};
    use chrono::Utc;
    use rust_decimal::dec;

    fn sample_tx() -> TransactionRecord {
        TransactionRecord {
            id: "tx-1".into(),
            user_id: "u1".into(),
            kind: TxKind::Deposit,
            currency: Currency::Ngn,
            amount: dec!(5000),
            status: TxStatus::Completed,
            reference: Some("ref".into()),
            order_id: None,
            chain: None,
            destination: None,
            usd_value: None,
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn cache_put_and_get() {
        let cache = HistoryCache::new(10, Duration::from_secs(300));
        assert!(cache.get_first_page("u1").is_none());

        cache.put_first_page("u1", vec![sample_tx()], Some("cursor".into()));
        let (page, cursor) = cache.get_first_page("u1").unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "tx-1");
        assert_eq!(cursor.as_deref(), Some("cursor"));
    }

    #[test]
    fn cache_invalidate() {
        let cache = HistoryCache::new(10, Duration::from_secs(300));
        cache.put_first_page("u1", vec![sample_tx()], None);
        cache.invalidate("u1");
        assert!(cache.get_first_page("u1").is_none());
    }

    #[test]
    fn cache_ttl_expiry() {
        let cache = HistoryCache::new(10, Duration::from_millis(1));
        cache.put_first_page("u1", vec![sample_tx()], None);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get_first_page("u1").is_none());
    }

    #[test]
    fn zero_capacity_still_caches_one() {
        let cache = HistoryCache::new(0, Duration::from_secs(300));
        cache.put_first_page("u1", vec![sample_tx()], None);
        assert!(cache.get_first_page("u1").is_some());
    }
}
