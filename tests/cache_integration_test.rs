//! Integration tests for the Redis token cache
//!
//! These tests require a running Redis instance.
//! Run with: REDIS_URL=redis://localhost:6379 cargo test --features cache --test cache_integration_test -- --ignored

mod common;

#[cfg(feature = "cache")]
mod cache_tests {
    use super::common::{start_mock_daraja, ACCESS_TOKEN, CONSUMER_KEY, CONSUMER_SECRET};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use stkpay::cache::{init_cache_pool, CacheConfig, RedisTokenCache, TokenCache};
    use stkpay::payments::providers::mpesa::{CachedToken, MpesaConfig, MpesaGateway};
    use stkpay::payments::types::StkPushRequest;
    use stkpay::payments::PaymentGateway;

    async fn setup_cache() -> RedisTokenCache {
        let config = CacheConfig {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            ..Default::default()
        };

        let pool = init_cache_pool(config)
            .await
            .expect("Failed to init cache pool");
        RedisTokenCache::new(pool)
    }

    fn gateway(base_url: &str, short_code: &str, cache: RedisTokenCache) -> MpesaGateway {
        MpesaGateway::new(MpesaConfig {
            consumer_key: CONSUMER_KEY.to_string(),
            consumer_secret: CONSUMER_SECRET.to_string(),
            business_short_code: short_code.to_string(),
            base_url_override: Some(base_url.to_string()),
            ..Default::default()
        })
        .unwrap()
        .with_shared_token_cache(Arc::new(cache))
    }

    fn push_request() -> StkPushRequest {
        StkPushRequest {
            phone_number: "254712345678".to_string(),
            amount: 1,
            account_reference: "Online Payment".to_string(),
            transaction_desc: "Payment for Online Payment".to_string(),
        }
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_token_shared_between_instances() {
        let cache = setup_cache().await;
        let short_code = "900001";
        cache.invalidate(short_code).await.unwrap();

        let (mock, base_url) = start_mock_daraja().await;
        let first = gateway(&base_url, short_code, cache.clone());
        let second = gateway(&base_url, short_code, cache.clone());

        assert_eq!(first.access_token().await.unwrap(), ACCESS_TOKEN);
        assert_eq!(second.access_token().await.unwrap(), ACCESS_TOKEN);
        assert_eq!(mock.token_requests(), 1);

        let stored = cache.load(short_code).await.unwrap();
        assert_eq!(stored.unwrap().access_token, ACCESS_TOKEN);

        cache.invalidate(short_code).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_rejected_token_is_dropped_for_every_instance() {
        let cache = setup_cache().await;
        let short_code = "900002";
        cache.invalidate(short_code).await.unwrap();

        let (mock, base_url) = start_mock_daraja().await;
        let gateway = gateway(&base_url, short_code, cache.clone());
        gateway.stk_push(push_request()).await.unwrap();
        assert!(cache.load(short_code).await.unwrap().is_some());

        mock.revoke_token.store(true, Ordering::SeqCst);
        assert!(gateway.stk_push(push_request()).await.is_err());
        assert_eq!(cache.load(short_code).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_entry_expires_with_token() {
        let cache = setup_cache().await;
        let short_code = "900003";
        let token = CachedToken {
            access_token: "short-lived".to_string(),
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(2),
        };

        cache.store(short_code, &token).await.unwrap();
        assert_eq!(cache.load(short_code).await.unwrap(), Some(token));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(cache.load(short_code).await.unwrap(), None);
        assert!(!cache.invalidate(short_code).await.unwrap());
    }
}
