use std::sync::Arc;

use chrono::Utc;
use testcontainers_modules::{
    redis::Redis,
    testcontainers::{ContainerAsync, runners::AsyncRunner},
};
use tollgate_core::{
    CounterSnapshot, CounterStore, FailureKey, KeyKind, LastLogin, LastLoginRecord, UserId,
};
use tollgate_storage_redis::RedisCounterStore;

async fn start() -> (ContainerAsync<Redis>, RedisCounterStore) {
    let _ = tracing_subscriber::fmt().try_init();

    let container = Redis::default().start().await.unwrap();
    let host_port = container.get_host_port_ipv4(6379).await.unwrap();
    let store = RedisCounterStore::connect(&format!("redis://127.0.0.1:{host_port}/"), "test")
        .await
        .unwrap();
    (container, store)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_counters() {
    let (_container, store) = start().await;
    store.health_check().await.unwrap();

    let user = FailureKey::user(UserId::new(1));
    let address = FailureKey::address("2001:db8::1");

    assert_eq!(store.get(&user).await.unwrap(), 0);
    assert_eq!(store.increment(&user).await.unwrap(), 1);
    assert_eq!(store.increment(&user).await.unwrap(), 2);
    assert_eq!(store.increment(&address).await.unwrap(), 1);

    assert_eq!(
        store.scan(KeyKind::Address).await.unwrap(),
        vec![(address.clone(), 1)]
    );
    assert_eq!(store.scan(KeyKind::User).await.unwrap(), vec![(user.clone(), 2)]);

    store.reset(&user).await.unwrap();
    assert_eq!(store.get(&user).await.unwrap(), 0);
    assert!(store.scan(KeyKind::User).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_increments_are_not_lost() {
    let (_container, store) = start().await;
    let store = Arc::new(store);
    let key = FailureKey::address("10.0.0.1");

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move { store.increment(&key).await.unwrap() })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.get(&key).await.unwrap(), 50);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_last_login_shift() {
    let (_container, store) = start().await;
    let user_id = UserId::new(3);
    let first = LastLogin {
        address: "1.1.1.1".to_string(),
        at: Utc::now(),
    };
    let second = LastLogin {
        address: "2.2.2.2".to_string(),
        at: Utc::now(),
    };

    assert!(store.last_login(user_id).await.unwrap().is_none());

    store.shift_last_login(user_id, first.clone()).await.unwrap();
    let record = store.last_login(user_id).await.unwrap().unwrap();
    assert_eq!(record.current.address, "1.1.1.1");
    assert!(record.previous.is_none());

    store.shift_last_login(user_id, second).await.unwrap();
    let record = store.last_login(user_id).await.unwrap().unwrap();
    assert_eq!(record.current.address, "2.2.2.2");
    assert_eq!(
        record.previous.unwrap().at.timestamp_millis(),
        first.at.timestamp_millis()
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_replace_all() {
    let (_container, store) = start().await;
    store
        .increment(&FailureKey::address("6.6.6.6"))
        .await
        .unwrap();
    store
        .shift_last_login(
            UserId::new(9),
            LastLogin {
                address: "6.6.6.6".to_string(),
                at: Utc::now(),
            },
        )
        .await
        .unwrap();

    let mut snapshot = CounterSnapshot::new();
    snapshot.failures.insert(FailureKey::user(UserId::new(1)), 3);
    snapshot.last_logins.insert(
        UserId::new(1),
        LastLoginRecord::first(LastLogin {
            address: "1.1.1.1".to_string(),
            at: Utc::now(),
        }),
    );
    store.replace_all(snapshot).await.unwrap();

    assert!(store.scan(KeyKind::Address).await.unwrap().is_empty());
    assert!(store.last_login(UserId::new(9)).await.unwrap().is_none());
    assert_eq!(
        store.get(&FailureKey::user(UserId::new(1))).await.unwrap(),
        3
    );
    let record = store.last_login(UserId::new(1)).await.unwrap().unwrap();
    assert_eq!(record.current.address, "1.1.1.1");
}
