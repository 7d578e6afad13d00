//! # Lifecycle Scenarios
//!
//! Shutdown, restart with a persistent store, and servers found through
//! the pool instead of registered by hand.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;
    use qc_18_light_odr::test_utils::{MockConnection, MockDialer};
    use qc_18_light_odr::{
        InMemoryKVStore, OdrApi, OdrError, RequestKind, SessionKind, ValidationError,
        NEUTRAL_SCORE,
    };

    use crate::fixtures::{
        add_peer, candidate, client, client_with_store, expect_valid, receipts, VALID_PAYLOAD,
    };

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    #[tokio::test]
    async fn test_close_cancels_every_pending_request() {
        const M: usize = 6;
        let client = Arc::new(client());
        add_peer(&client, 1, MockConnection::hanging());

        let pending: Vec<_> = (0..M as u64)
            .map(|n| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.retrieve(receipts(n), expect_valid, None).await })
            })
            .collect();
        while client.distributor().pending_count() < M {
            tokio::task::yield_now().await;
        }

        client.close().await;
        let outcomes = join_all(pending).await;
        assert_eq!(outcomes.len(), M);
        for outcome in outcomes {
            assert_eq!(outcome.unwrap().unwrap_err(), OdrError::Cancelled);
        }

        // Second close is a no-op; new work is refused.
        OdrApi::close(client.as_ref()).await;
        let err = client
            .retrieve(receipts(1), expect_valid, None)
            .await
            .unwrap_err();
        assert_eq!(err, OdrError::Cancelled);
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    #[tokio::test]
    async fn test_bad_reputation_survives_restart() {
        let store = Arc::new(InMemoryKVStore::new());
        let liar;
        {
            let client = client_with_store(store.clone(), Vec::new());
            liar = add_peer(&client, 7, MockConnection::responding(b"forged".to_vec()));
            for n in 0..3 {
                let err = client
                    .retrieve(receipts(n), expect_valid, None)
                    .await
                    .unwrap_err();
                assert_eq!(err, OdrError::Exhausted { attempts: 1 });
            }
            client.close().await;
        }

        let client = client_with_store(store, Vec::new());
        assert!(client.tracker().long_term_score(&liar) < NEUTRAL_SCORE);

        // Reconnecting restores the per-kind history too.
        add_peer(&client, 7, MockConnection::responding(VALID_PAYLOAD.to_vec()));
        assert!(client.tracker().score(&liar, RequestKind::Receipts) < NEUTRAL_SCORE);
    }

    // =========================================================================
    // SERVER POOL
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_pool_dials_discovered_servers_and_serves_requests() {
        let client = client_with_store(
            Arc::new(InMemoryKVStore::new()),
            (1..=5).map(candidate).collect(),
        );
        let dialer = MockDialer::new(Arc::clone(client.registry()));
        dialer.refuse(candidate(1).id);
        client.start(dialer.clone(), &[0; 32], 4);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let connected = client.pool().connected();
        assert_eq!(connected.len(), 3);
        assert!(connected.iter().all(|(id, _)| *id != candidate(1).id));
        assert!(connected
            .iter()
            .all(|(_, kind)| matches!(kind, SessionKind::Explore | SessionKind::Exploit)));
        assert_eq!(client.peer_count(), 3);

        let refused = client.pool().entry(&candidate(1).id).unwrap();
        assert!(refused.dial_failures >= 1);
        assert!(!refused.explored);

        // Pool-dialed servers answer b"ok".
        let accept_ok = |raw: &[u8]| -> Result<usize, ValidationError> {
            if raw == b"ok" {
                Ok(raw.len())
            } else {
                Err(ValidationError::new("unexpected"))
            }
        };
        let got = client.retrieve(receipts(2), accept_ok, None).await.unwrap();
        assert_eq!(got.value, 2);

        client.close().await;
        assert!(!client.pool().is_running());
    }
}
