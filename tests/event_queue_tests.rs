/// Event queue tests
///
/// Deferred listener delivery through the manager's event queue
/// Run with: cargo test --test event_queue_tests

use entitycache::{
    Delivery, EntityError, EntityEvent, EntityKind, EntityManager, EventQueue, InMemoryProvider,
    Interest, ManagerConfig, TransitionKind,
};
use std::sync::{Arc, Mutex};

fn queued_manager() -> (EntityManager, entitycache::EventQueueReceiver) {
    let (queue, receiver) = EventQueue::channel();
    let manager = EntityManager::new_with_queue(
        EntityKind::new("customer"),
        Arc::new(InMemoryProvider::new()),
        ManagerConfig::default(),
        queue,
    )
    .unwrap();
    (manager, receiver)
}

fn labelled(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> entitycache::entity::ListenerFn {
    let sink = log.clone();
    Arc::new(move |event: &EntityEvent| {
        if let Some(t) = event.transition() {
            sink.lock().unwrap().push(format!("{}:{:?}", label, t.kind));
        }
    })
}

#[test]
fn test_queued_listener_waits_for_dispatch() {
    let (manager, mut receiver) = queued_manager();
    let entity = manager.get_new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    entity
        .add_listener(Interest::State, Delivery::EventQueue, labelled(&log, "queued"))
        .unwrap();

    entity.begin_edit().unwrap();
    assert!(log.lock().unwrap().is_empty());

    assert_eq!(receiver.dispatch_pending(), 1);
    assert_eq!(*log.lock().unwrap(), vec!["queued:Edit".to_string()]);
    assert_eq!(receiver.dispatch_pending(), 0);
}

#[test]
fn test_immediate_before_queued_in_priority_order() {
    let (manager, mut receiver) = queued_manager();
    let entity = manager.get_new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    entity
        .add_listener(Interest::State, Delivery::EventQueue, labelled(&log, "queued"))
        .unwrap();
    entity
        .add_listener(Interest::State, Delivery::EventQueuePriority, labelled(&log, "queued-priority"))
        .unwrap();
    entity
        .add_listener(Interest::State, Delivery::Immediate, labelled(&log, "immediate"))
        .unwrap();
    entity
        .add_listener(Interest::State, Delivery::ImmediatePriority, labelled(&log, "immediate-priority"))
        .unwrap();

    entity.begin_edit().unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["immediate-priority:Edit".to_string(), "immediate:Edit".to_string()]
    );

    receiver.dispatch_pending();
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "immediate-priority:Edit".to_string(),
            "immediate:Edit".to_string(),
            "queued-priority:Edit".to_string(),
            "queued:Edit".to_string(),
        ]
    );
}

#[test]
fn test_queued_listener_needs_queue() {
    let manager = EntityManager::new(
        EntityKind::new("customer"),
        Arc::new(InMemoryProvider::new()),
        ManagerConfig::default(),
    )
    .unwrap();
    let entity = manager.get_new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let err = entity
        .add_listener(Interest::All, Delivery::EventQueue, labelled(&log, "queued"))
        .unwrap_err();
    assert!(matches!(err, EntityError::Logic(_)));
    assert_eq!(entity.listener_count(), 0);
}

#[tokio::test]
async fn test_receiver_yields_save_events() {
    let (manager, mut receiver) = queued_manager();
    let entity = manager.get_new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    entity
        .add_listener(Interest::State, Delivery::EventQueue, labelled(&log, "queued"))
        .unwrap();

    entity.set("name", "Alice").unwrap();
    manager.save(&entity).unwrap();
    assert!(log.lock().unwrap().is_empty());

    let edit = receiver.next().await.unwrap();
    assert_eq!(edit.event().transition().map(|t| t.kind), Some(TransitionKind::Edit));
    edit.dispatch();

    let save = receiver.next().await.unwrap();
    assert_eq!(save.event().key(), entity.key());
    save.dispatch();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["queued:Edit".to_string(), "queued:Save".to_string()]
    );
}

#[tokio::test]
async fn test_run_drains_until_queue_closed() {
    let (manager, receiver) = queued_manager();
    let log = Arc::new(Mutex::new(Vec::new()));
    let consumer = tokio::spawn(receiver.run());

    {
        let entity = manager.get_new().unwrap();
        entity
            .add_listener(Interest::State, Delivery::EventQueue, labelled(&log, "queued"))
            .unwrap();
        entity.set("name", "Bob").unwrap();
        manager.save(&entity).unwrap();
        manager.remove(&entity).unwrap();
    }
    drop(manager);

    let dispatched = consumer.await.unwrap();
    assert_eq!(dispatched, 3);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "queued:Edit".to_string(),
            "queued:Save".to_string(),
            "queued:Remove".to_string(),
        ]
    );
}

#[test]
fn test_dropped_receiver_does_not_fail_entity() {
    let (manager, receiver) = queued_manager();
    drop(receiver);
    let entity = manager.get_new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    entity
        .add_listener(Interest::State, Delivery::EventQueue, labelled(&log, "queued"))
        .unwrap();

    entity.set("name", "Carol").unwrap();
    assert!(manager.save(&entity).unwrap().is_saved());
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_block_on_next() {
    let (manager, mut receiver) = queued_manager();
    let entity = manager.get_new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    entity
        .add_listener(Interest::State, Delivery::EventQueue, labelled(&log, "queued"))
        .unwrap();
    entity.begin_edit().unwrap();

    let queued = tokio_test::block_on(receiver.next()).unwrap();
    queued.dispatch();
    assert_eq!(*log.lock().unwrap(), vec!["queued:Edit".to_string()]);
}
