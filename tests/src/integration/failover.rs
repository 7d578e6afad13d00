//! # Failover Scenarios
//!
//! A request must end up at a server that answers correctly, no matter how
//! many others hang, fail, lie or disconnect on the way.
//!
//! | Scenario | Expected outcome |
//! |----------|------------------|
//! | hang, lie, answer | answered by the honest server, liars score lower |
//! | N failing servers | `Exhausted { attempts: N }`, one send each |
//! | only server disconnects | `Exhausted { attempts: 1 }` |
//! | server disconnects, another waits | answered by the other |

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use qc_18_light_odr::test_utils::{MockBehavior, MockConnection};
    use qc_18_light_odr::{OdrApi, OdrError, RequestKind, NEUTRAL_SCORE};

    use crate::fixtures::{add_peer, client, expect_valid, receipts, VALID_PAYLOAD};

    // =========================================================================
    // CONVERGENCE
    // =========================================================================

    /// Hanging and lying servers are skipped and scored down.
    #[tokio::test(start_paused = true)]
    async fn test_request_converges_on_honest_server() {
        let client = client();
        let hanging = MockConnection::hanging();
        let lying = MockConnection::responding(b"forged".to_vec());
        let honest = MockConnection::responding(VALID_PAYLOAD.to_vec());
        let a = add_peer(&client, 1, hanging.clone());
        let b = add_peer(&client, 2, lying.clone());
        let c = add_peer(&client, 3, honest.clone());

        let got = client.retrieve(receipts(10), expect_valid, None).await.unwrap();
        assert_eq!(got.peer, c);
        assert_eq!(got.attempts, 3);
        assert_eq!(got.value, VALID_PAYLOAD.to_vec());
        assert_eq!(
            (hanging.calls(), lying.calls(), honest.calls()),
            (1, 1, 1)
        );

        let tracker = client.tracker();
        assert!(tracker.score(&a, RequestKind::Receipts) < NEUTRAL_SCORE);
        assert!(tracker.score(&b, RequestKind::Receipts) < NEUTRAL_SCORE);
        assert!(tracker.score(&c, RequestKind::Receipts) > NEUTRAL_SCORE);

        // The next request goes straight to the honest server.
        let again = client.retrieve(receipts(11), expect_valid, None).await.unwrap();
        assert_eq!(again.peer, c);
        assert_eq!(again.attempts, 1);
        assert_eq!(hanging.calls(), 1);
    }

    /// A slow but honest server still wins once the fast liar is excluded.
    #[tokio::test(start_paused = true)]
    async fn test_slow_honest_server_beats_fast_liar() {
        let client = client();
        add_peer(&client, 1, MockConnection::responding(b"forged".to_vec()));
        let slow = add_peer(
            &client,
            2,
            MockConnection::new(MockBehavior::RespondAfter(
                Duration::from_millis(50),
                VALID_PAYLOAD.to_vec(),
            )),
        );

        let got = client.retrieve(receipts(1), expect_valid, None).await.unwrap();
        assert_eq!(got.peer, slow);
        assert!(client.tracker().expected_latency(&slow).is_some());
    }

    // =========================================================================
    // EXHAUSTION
    // =========================================================================

    #[tokio::test]
    async fn test_n_failing_servers_give_n_attempts() {
        const N: u8 = 5;
        let client = client();
        let connections: Vec<_> = (1..=N)
            .map(|b| {
                let conn = MockConnection::failing();
                add_peer(&client, b, conn.clone());
                conn
            })
            .collect();

        let err = client
            .retrieve(receipts(3), expect_valid, None)
            .await
            .unwrap_err();
        assert_eq!(err, OdrError::Exhausted { attempts: N as usize });
        assert!(connections.iter().all(|c| c.calls() == 1));
    }

    #[tokio::test]
    async fn test_every_server_lies() {
        let client = client();
        for b in 1..=3 {
            add_peer(&client, b, MockConnection::responding(b"forged".to_vec()));
        }
        let err = client
            .retrieve(receipts(3), expect_valid, None)
            .await
            .unwrap_err();
        assert_eq!(err, OdrError::Exhausted { attempts: 3 });
    }

    // =========================================================================
    // DISCONNECTS
    // =========================================================================

    #[tokio::test]
    async fn test_only_server_disconnects_mid_flight() {
        let client = Arc::new(client());
        let conn = MockConnection::hanging();
        let id = add_peer(&client, 1, conn.clone());

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.retrieve(receipts(5), expect_valid, None).await })
        };
        while conn.calls() == 0 {
            tokio::task::yield_now().await;
        }
        client.unregister_peer(&id).unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err, OdrError::Exhausted { attempts: 1 });
        assert_eq!(client.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_over_to_other_server() {
        let client = Arc::new(client());
        // Equal scores: the earlier registration is tried first.
        let first = MockConnection::hanging();
        let gone = add_peer(&client, 1, first.clone());
        let other = add_peer(&client, 2, MockConnection::responding(VALID_PAYLOAD.to_vec()));

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.retrieve(receipts(5), expect_valid, None).await })
        };
        while first.calls() == 0 {
            tokio::task::yield_now().await;
        }
        client.unregister_peer(&gone).unwrap();

        let got = pending.await.unwrap().unwrap();
        assert_eq!(got.peer, other);
        assert_eq!(got.attempts, 2);
    }

    #[tokio::test]
    async fn test_double_unregister_reports_not_found() {
        let client = client();
        let id = add_peer(&client, 1, MockConnection::hanging());
        client.unregister_peer(&id).unwrap();
        assert_eq!(client.unregister_peer(&id), Err(OdrError::NotFound(id)));
        assert_eq!(client.peer_count(), 0);

        // The same ID may come back.
        add_peer(&client, 1, MockConnection::responding(VALID_PAYLOAD.to_vec()));
        let got = client.retrieve(receipts(1), expect_valid, None).await.unwrap();
        assert_eq!(got.peer, id);
    }

    // =========================================================================
    // DEADLINES
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_deadline_without_servers() {
        let client = client();
        let err = client
            .retrieve(receipts(1), expect_valid, Some(Duration::from_millis(500)))
            .await
            .unwrap_err();
        assert_eq!(err, OdrError::Timeout);
        assert_eq!(client.distributor().pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_server_serves_waiting_request() {
        let client = Arc::new(client());
        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.retrieve(receipts(1), expect_valid, None).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let late = add_peer(&client, 9, MockConnection::responding(VALID_PAYLOAD.to_vec()));

        let got = pending.await.unwrap().unwrap();
        assert_eq!(got.peer, late);
    }
}
