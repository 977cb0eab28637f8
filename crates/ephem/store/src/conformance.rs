//! Behavior every backend must share.

use crate::{StackStore, StoreError};
use chrono::{Duration, Utc};
use ephem_types::{Provider, ResourceSpec, Stack, StackName, StackState};
use std::sync::Arc;

pub fn stack(name: &str, deadline_in: Option<Duration>) -> Stack {
    let now = Utc::now();
    Stack::planned(
        StackName::new(name).unwrap(),
        Provider::LocalCluster,
        vec![
            ResourceSpec::new("db", "postgres"),
            ResourceSpec::new("api", "mlflow-server").exposed(),
        ],
        deadline_in.map(|d| now + d),
        now,
    )
    .unwrap()
}

fn advanced(stack: &Stack, state: StackState) -> Stack {
    let mut next = stack.clone();
    next.transition(state, Utc::now()).unwrap();
    next
}

pub async fn create_and_get(store: &dyn StackStore) {
    let demo = stack("demo", Some(Duration::hours(1)));
    store.create(&demo).await.unwrap();

    let loaded = store.get(&demo.name).await.unwrap();
    assert_eq!(loaded.name, demo.name);
    assert_eq!(loaded.state, StackState::Planned);
    assert_eq!(loaded.resources.len(), 2);
    assert_eq!(
        loaded.teardown_deadline.map(|d| d.timestamp_millis()),
        demo.teardown_deadline.map(|d| d.timestamp_millis())
    );

    let err = store.create(&demo).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));

    let missing = StackName::new("missing").unwrap();
    assert!(matches!(store.get(&missing).await, Err(StoreError::NotFound(_))));
}

pub async fn compare_and_swap(store: &dyn StackStore) {
    let demo = stack("cas", None);
    store.create(&demo).await.unwrap();

    let provisioning = advanced(&demo, StackState::Provisioning);
    let stored = store
        .compare_and_swap(&demo.name, StackState::Planned, &provisioning)
        .await
        .unwrap();
    assert_eq!(stored.state, StackState::Provisioning);

    // Stale expectation loses
    let err = store
        .compare_and_swap(&demo.name, StackState::Planned, &provisioning)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.kind(), ephem_types::ErrorKind::Busy);
    assert_eq!(store.get(&demo.name).await.unwrap().state, StackState::Provisioning);

    let missing = stack("ghost", None);
    let err = store
        .compare_and_swap(&missing.name, StackState::Planned, &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

pub async fn listing(store: &dyn StackStore) {
    let expired = stack("expired", Some(Duration::seconds(-5)));
    let fresh = stack("fresh", Some(Duration::hours(1)));
    let forever = stack("forever", None);
    for s in [&expired, &fresh, &forever] {
        store.create(s).await.unwrap();
    }

    let now = Utc::now();
    let names: Vec<String> = store
        .list_expired(now)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name.to_string())
        .collect();
    assert_eq!(names, vec!["expired".to_string()]);

    // Destroyed stacks drop out of the active views but stay listed
    let mut gone = advanced(&expired, StackState::TearingDown);
    store
        .compare_and_swap(&expired.name, StackState::Planned, &gone)
        .await
        .unwrap();
    gone.transition(StackState::Destroyed, Utc::now()).unwrap();
    store
        .compare_and_swap(&expired.name, StackState::TearingDown, &gone)
        .await
        .unwrap();

    assert!(store.list_expired(now).await.unwrap().is_empty());
    assert_eq!(store.list_active().await.unwrap().len(), 2);
    assert_eq!(store.list_all().await.unwrap().len(), 3);
}

pub async fn schedule_swap(store: &dyn StackStore) {
    let demo = stack("sched", Some(Duration::seconds(-1)));
    store.create(&demo).await.unwrap();

    let schedule = store.get_schedule(&demo.name).await.unwrap();
    assert_eq!(schedule.revision, 0);
    assert!(schedule.deadline.is_some());
    assert_eq!(store.list_expired(Utc::now()).await.unwrap().len(), 1);

    let cancelled = store
        .swap_schedule(&demo.name, 0, None, Utc::now())
        .await
        .unwrap();
    assert_eq!(cancelled.revision, 1);
    assert!(cancelled.deadline.is_none());
    assert!(store.list_expired(Utc::now()).await.unwrap().is_empty());
    assert!(store.get(&demo.name).await.unwrap().teardown_deadline.is_none());

    let err = store
        .swap_schedule(&demo.name, 0, None, Utc::now())
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    // Stack writes never clobber the schedule's deadline
    let mut running = advanced(&demo, StackState::Provisioning);
    running.teardown_deadline = Some(Utc::now() - Duration::days(1));
    store
        .compare_and_swap(&demo.name, StackState::Planned, &running)
        .await
        .unwrap();
    assert!(store.get(&demo.name).await.unwrap().teardown_deadline.is_none());
}

pub async fn concurrent_writers_one_wins<S: StackStore + 'static>(store: Arc<S>) {
    let demo = stack("race", None);
    store.create(&demo).await.unwrap();

    let first = advanced(&demo, StackState::Provisioning);
    let second = advanced(&demo, StackState::TearingDown);
    let a = {
        let store = store.clone();
        let name = demo.name.clone();
        tokio::spawn(async move { store.compare_and_swap(&name, StackState::Planned, &first).await })
    };
    let b = {
        let store = store.clone();
        let name = demo.name.clone();
        tokio::spawn(async move { store.compare_and_swap(&name, StackState::Planned, &second).await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_conflict()))
        .count();
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 1);
}

pub async fn destroyed_name_is_reusable(store: &dyn StackStore) {
    let first = stack("reuse", Some(Duration::hours(1)));
    store.create(&first).await.unwrap();
    let schedule = store.get_schedule(&first.name).await.unwrap();

    // Held while active
    let tearing = advanced(&first, StackState::TearingDown);
    store
        .compare_and_swap(&first.name, StackState::Planned, &tearing)
        .await
        .unwrap();
    let err = store.create(&stack("reuse", None)).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));

    let destroyed = advanced(&tearing, StackState::Destroyed);
    store
        .compare_and_swap(&first.name, StackState::TearingDown, &destroyed)
        .await
        .unwrap();

    let second = stack("reuse", None);
    let created = store.create(&second).await.unwrap();
    assert_eq!(created.state, StackState::Planned);
    assert!(created.teardown_deadline.is_none());
    assert_eq!(store.list_active().await.unwrap().len(), 1);
    assert_eq!(store.list_all().await.unwrap().len(), 1);

    // Schedule writes made against the old stack no longer apply
    let renewed = store.get_schedule(&first.name).await.unwrap();
    assert!(renewed.revision > schedule.revision);
    assert!(renewed.deadline.is_none());
    let stale = store
        .swap_schedule(&first.name, schedule.revision, Some(Utc::now()), Utc::now())
        .await
        .unwrap_err();
    assert!(stale.is_conflict());
}
