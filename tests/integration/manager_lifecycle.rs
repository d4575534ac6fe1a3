//! Identity manager lifecycle on a paused clock

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use uid2_integration::{
    Identity, IdentityManager, IdentityStatus, ManagerConfig, ManagerState, MockIdentityClient,
    MockIdentityStorage, MockTimeSource, NetworkError, ResponsePackage,
};

const NOW: i64 = 1_700_000_000_000;
const HOUR: i64 = 3_600_000;

fn identity(token: &str, refresh_from: i64, identity_expires: i64, refresh_expires: i64) -> Identity {
    Identity::new(
        format!("ad-{}", token),
        format!("rt-{}", token),
        NOW + identity_expires,
        NOW + refresh_from,
        NOW + refresh_expires,
        "key",
    )
}

/// An identity that needs no attention for an hour.
fn quiet(token: &str) -> Identity {
    identity(token, HOUR, 2 * HOUR, 3 * HOUR)
}

struct Harness {
    manager: IdentityManager,
    client: Arc<MockIdentityClient>,
    storage: Arc<MockIdentityStorage>,
    statuses: Arc<Mutex<Vec<IdentityStatus>>>,
}

fn harness_with(storage: MockIdentityStorage, config: ManagerConfig) -> Harness {
    let client = Arc::new(MockIdentityClient::new());
    let storage = Arc::new(storage);
    let manager = IdentityManager::with_components(
        config,
        client.clone(),
        storage.clone(),
        Arc::new(MockTimeSource::new(NOW)),
    );

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = statuses.clone();
    manager.add_listener(move |_: Option<&Identity>, status: IdentityStatus| {
        sink.lock().push(status);
    });

    Harness {
        manager,
        client,
        storage,
        statuses,
    }
}

fn harness() -> Harness {
    harness_with(MockIdentityStorage::new(), ManagerConfig::default())
}

async fn settle(manager: &IdentityManager) {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    manager.flush().await;
}

async fn sleep_ms(manager: &IdentityManager, ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle(manager).await;
}

fn connection_failed() -> uid2_integration::UID2Error {
    NetworkError::ConnectionFailed {
        message: "connection reset".to_string(),
    }
    .into()
}

#[tokio::test(start_paused = true)]
async fn test_refresh_fires_exactly_at_refresh_from() {
    let h = harness();
    h.client.queue_refreshed(quiet("next"));

    h.manager.set_identity(identity("a", 5_000, HOUR, 2 * HOUR));
    h.manager.flush().await;

    sleep_ms(&h.manager, 4_999).await;
    assert_eq!(h.client.refresh_count(), 0);

    sleep_ms(&h.manager, 1).await;
    assert_eq!(h.client.refresh_count(), 1);
    assert_eq!(h.client.refresh_tokens(), vec!["rt-a".to_string()]);
    assert_eq!(h.manager.state(), ManagerState::Refreshed(quiet("next")));
}

#[tokio::test(start_paused = true)]
async fn test_two_failures_then_success() {
    let h = harness();
    h.client
        .queue_refresh(Err(connection_failed()))
        .queue_refresh(Err(NetworkError::RequestFailed { status: 503 }.into()))
        .queue_refreshed(quiet("next"));

    h.manager.set_identity(identity("a", 0, HOUR, 2 * HOUR));
    settle(&h.manager).await;
    assert_eq!(h.client.refresh_count(), 1);

    sleep_ms(&h.manager, 9_900).await;
    assert_eq!(h.client.refresh_count(), 2);
    assert_eq!(h.manager.current_identity_status(), IdentityStatus::Established);

    sleep_ms(&h.manager, 200).await;
    assert_eq!(h.client.refresh_count(), 3);
    assert_eq!(h.manager.state(), ManagerState::Refreshed(quiet("next")));
    assert_eq!(
        h.storage.stored(),
        Some((quiet("next"), IdentityStatus::Refreshed))
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_slows_down_after_five_failures() {
    let h = harness();
    h.manager.set_identity(identity("a", 0, HOUR, 2 * HOUR));
    settle(&h.manager).await;

    // Five short retries: attempts at 0, 5, 10, 15, 20 and 25 seconds.
    sleep_ms(&h.manager, 26_000).await;
    assert_eq!(h.client.refresh_count(), 6);

    sleep_ms(&h.manager, 58_000).await;
    assert_eq!(h.client.refresh_count(), 6);

    sleep_ms(&h.manager, 2_000).await;
    assert_eq!(h.client.refresh_count(), 7);

    sleep_ms(&h.manager, 60_000).await;
    assert_eq!(h.client.refresh_count(), 8);
    assert_eq!(h.manager.current_identity_status(), IdentityStatus::Established);
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_once_refresh_expires() {
    let config = ManagerConfig {
        check_expiration: false,
        ..Default::default()
    };
    let h = harness_with(MockIdentityStorage::new(), config);

    h.manager.set_identity(identity("a", 0, 4_000, 12_000));
    settle(&h.manager).await;

    // Attempts at 0, 5 and 10 seconds; the one due at 15 is past refresh_expires.
    sleep_ms(&h.manager, 60_000).await;
    assert_eq!(h.client.refresh_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_opt_out_clears_identity() {
    let h = harness();
    h.client.queue_refresh(Ok(ResponsePackage {
        identity: None,
        status: IdentityStatus::OptOut,
        message: "User opted out".to_string(),
    }));

    h.manager.set_identity(identity("a", 0, HOUR, 2 * HOUR));
    settle(&h.manager).await;

    assert_eq!(h.manager.state(), ManagerState::OptOut);
    assert_eq!(h.manager.get_advertising_token(), None);
    assert!(!h.manager.has_identity());
    assert!(h.storage.stored().is_none());
    assert_eq!(h.statuses.lock().last(), Some(&IdentityStatus::OptOut));

    // Nothing left to refresh.
    sleep_ms(&h.manager, 120_000).await;
    assert_eq!(h.client.refresh_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_and_refresh_without_identity_are_noops() {
    let h = harness();
    h.manager.wait_until_initialized().await;

    h.manager.reset_identity();
    h.manager.refresh_identity();
    settle(&h.manager).await;

    assert_eq!(h.manager.state(), ManagerState::NoIdentity);
    assert_eq!(h.storage.clear_count(), 0);
    assert_eq!(h.client.refresh_count(), 0);
    assert_eq!(*h.statuses.lock(), vec![IdentityStatus::NoIdentity]);
}

#[tokio::test(start_paused = true)]
async fn test_established_then_refreshed() {
    let h = harness();
    h.client.queue_refreshed(quiet("next"));

    h.manager.set_identity(quiet("a"));
    h.manager.flush().await;
    assert_eq!(h.manager.get_advertising_token().as_deref(), Some("ad-a"));

    h.manager.refresh_identity();
    settle(&h.manager).await;

    assert_eq!(h.manager.get_advertising_token().as_deref(), Some("ad-next"));
    assert_eq!(
        *h.statuses.lock(),
        vec![
            IdentityStatus::NoIdentity,
            IdentityStatus::Established,
            IdentityStatus::Refreshed
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_expiration_checks_walk_down_the_statuses() {
    let config = ManagerConfig {
        automatic_refresh_enabled: false,
        ..Default::default()
    };
    let h = harness_with(MockIdentityStorage::new(), config);

    h.manager.set_identity(identity("a", 30_000, 60_000, 120_000));
    h.manager.flush().await;

    sleep_ms(&h.manager, 60_040).await;
    assert_eq!(h.manager.current_identity_status(), IdentityStatus::Established);

    // Expired identities are held but their token is not handed out.
    sleep_ms(&h.manager, 20).await;
    assert_eq!(h.manager.current_identity_status(), IdentityStatus::Expired);
    assert_eq!(h.manager.get_advertising_token(), None);
    assert!(h.manager.has_identity());
    assert_eq!(
        h.storage.stored().map(|(_, status)| status),
        Some(IdentityStatus::Expired)
    );

    sleep_ms(&h.manager, 60_000).await;
    assert_eq!(h.manager.state(), ManagerState::RefreshExpired);
    assert_eq!(h.manager.current_identity(), None);
    assert!(h.storage.stored().is_none());
    assert_eq!(h.client.refresh_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_check_expiration_disabled() {
    let config = ManagerConfig {
        automatic_refresh_enabled: false,
        check_expiration: false,
        ..Default::default()
    };
    let h = harness_with(MockIdentityStorage::new(), config);

    h.manager.set_identity(identity("a", 30_000, 60_000, 120_000));
    sleep_ms(&h.manager, 200_000).await;

    assert_eq!(h.manager.current_identity_status(), IdentityStatus::Established);
}

#[tokio::test(start_paused = true)]
async fn test_operations_before_init_are_applied_in_order() {
    let storage = MockIdentityStorage::with_identity(quiet("stored"), IdentityStatus::Refreshed);
    let h = harness_with(storage, ManagerConfig::default());
    assert!(!h.manager.is_initialized());

    h.manager.set_identity(quiet("b"));
    h.manager.wait_until_initialized().await;
    h.manager.flush().await;

    assert_eq!(h.storage.load_count(), 1);
    assert_eq!(h.manager.state(), ManagerState::Established(quiet("b")));
    assert_eq!(
        *h.statuses.lock(),
        vec![IdentityStatus::Refreshed, IdentityStatus::Established]
    );
}

#[tokio::test(start_paused = true)]
async fn test_restored_opt_out_stays_opted_out() {
    let storage = MockIdentityStorage::with_identity(quiet("stored"), IdentityStatus::OptOut);
    let h = harness_with(storage, ManagerConfig::default());

    h.manager.wait_until_initialized().await;
    assert_eq!(h.manager.state(), ManagerState::OptOut);
    assert_eq!(h.manager.get_advertising_token(), None);
}

#[tokio::test(start_paused = true)]
async fn test_restored_stale_identity_refreshes_immediately() {
    let storage = MockIdentityStorage::with_identity(
        identity("stored", -1_000, HOUR, 2 * HOUR),
        IdentityStatus::Established,
    );
    let h = harness_with(storage, ManagerConfig::default());
    h.client.queue_refreshed(quiet("next"));

    h.manager.wait_until_initialized().await;
    settle(&h.manager).await;

    assert_eq!(h.client.refresh_tokens(), vec!["rt-stored".to_string()]);
    assert_eq!(h.manager.state(), ManagerState::Refreshed(quiet("next")));
}

#[tokio::test(start_paused = true)]
async fn test_state_stream_replays_current_state() {
    let h = harness();
    h.manager.set_identity(quiet("a"));
    h.manager.flush().await;

    let mut states = Box::pin(h.manager.state_stream());
    assert_eq!(states.next().await, Some(ManagerState::Established(quiet("a"))));

    h.manager.reset_identity();
    assert_eq!(states.next().await, Some(ManagerState::NoIdentity));
}

#[tokio::test(start_paused = true)]
async fn test_disabling_automatic_refresh_cancels_pending() {
    let h = harness();
    h.client.queue_refreshed(quiet("next"));

    h.manager.set_identity(identity("a", 5_000, HOUR, 2 * HOUR));
    h.manager.set_automatic_refresh_enabled(false);
    sleep_ms(&h.manager, 10_000).await;
    assert_eq!(h.client.refresh_count(), 0);

    // Re-enabling past refresh_from refreshes straight away.
    h.manager.set_automatic_refresh_enabled(true);
    settle(&h.manager).await;
    assert_eq!(h.client.refresh_count(), 1);
    assert_eq!(h.manager.state(), ManagerState::Refreshed(quiet("next")));
}

#[tokio::test(start_paused = true)]
async fn test_manual_refresh_replaces_scheduled_chain() {
    let h = harness();
    h.client.set_delay(Duration::from_millis(500));
    h.client.queue_refreshed(quiet("manual"));

    h.manager.set_identity(identity("a", 1_000, HOUR, 2 * HOUR));
    h.manager.refresh_identity();
    h.manager.flush().await;

    sleep_ms(&h.manager, 2_000).await;
    assert_eq!(h.client.refresh_count(), 1);
    assert_eq!(h.manager.state(), ManagerState::Refreshed(quiet("manual")));
}
