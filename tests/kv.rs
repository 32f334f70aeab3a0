use std::sync::{Arc, Mutex};
use std::time::Duration;

use ormap::{Config, KvStore, MemoryStore, ORMap, Observer};
use sortedkv::Memory;

/// Counts semantic events on a persistent replica.
#[derive(Default)]
struct Counter {
    sets: Mutex<u64>,
    deletes: Mutex<u64>,
    affirms: Mutex<u64>,
}

impl Observer<String> for Counter {
    fn on_set(&self, _key: &str, _value: &String, _previous: Option<&String>) {
        *self.sets.lock().unwrap() += 1;
    }

    fn on_delete(&self, _key: &str, _value: &String) {
        *self.deletes.lock().unwrap() += 1;
    }

    fn on_affirm(&self, _key: &str, _value: &String) {
        *self.affirms.lock().unwrap() += 1;
    }
}

fn config() -> Config {
    Config {
        buffer_publishing: Duration::ZERO,
        ..Config::default()
    }
}

fn new_map(namespace: &str) -> ORMap<String, KvStore<Memory>> {
    let config = Config {
        namespace: namespace.to_owned(),
        ..config()
    };
    ORMap::persistent(Memory::new(), config).unwrap()
}

#[tokio::test]
async fn set_delete_and_size() {
    let map = new_map("kv");
    map.set("a", "1".to_owned()).await.unwrap();
    assert_eq!(map.size(), 1);
    assert!(map.has("a").unwrap());
    map.set("b", "2".to_owned()).await.unwrap();
    assert_eq!(map.size(), 2);
    map.delete("a").await.unwrap();
    assert_eq!(map.size(), 1);
    assert!(!map.has("a").unwrap());
    map.delete("a").await.unwrap();
    assert_eq!(map.size(), 1);
}

#[tokio::test]
async fn overwrite_keeps_one_live_pair_per_key() {
    let map = new_map("kv");
    map.set("k", "one".to_owned()).await.unwrap();
    map.set("k", "two".to_owned()).await.unwrap();
    assert_eq!(map.size(), 1);
    assert_eq!(map.get("k").unwrap(), Some("two".to_owned()));
    // the superseded insertion is tombstoned
    assert_eq!(map.dump().unwrap().1.len(), 1);
}

#[tokio::test]
async fn out_of_order_merge() {
    let alice = new_map("alice");
    let bob = new_map("bob");

    alice.set("k", "v1".to_owned()).await.unwrap();
    let d1 = alice.dump().unwrap();
    alice.set("k", "v2".to_owned()).await.unwrap();
    let d2 = alice.dump().unwrap();

    bob.process(d2).await.unwrap();
    assert_eq!(bob.get("k").unwrap(), Some("v2".to_owned()));
    bob.delete("k").await.unwrap();
    let d3 = bob.dump().unwrap();

    alice.process(d3).await.unwrap();
    assert_eq!(alice.get("k").unwrap(), None);
    bob.process(d1).await.unwrap();
    assert_eq!(bob.get("k").unwrap(), None);
    assert_eq!(alice.keys().unwrap(), bob.keys().unwrap());
}

#[tokio::test]
async fn concurrent_sets_settle_on_the_larger_id() {
    let alice = new_map("a");
    let bob = new_map("b");
    alice
        .set_with_id("k", "A".to_owned(), "000000001aaaa000000a".to_owned())
        .await
        .unwrap();
    bob.set_with_id("k", "B".to_owned(), "000000001bbbb000000b".to_owned())
        .await
        .unwrap();

    let from_alice = alice.dump().unwrap();
    let from_bob = bob.dump().unwrap();
    alice.process(from_bob).await.unwrap();
    bob.process(from_alice).await.unwrap();

    assert_eq!(alice.get("k").unwrap(), Some("B".to_owned()));
    assert_eq!(bob.get("k").unwrap(), Some("B".to_owned()));
}

#[tokio::test]
async fn equal_id_rereceipt_affirms() {
    let counter = Arc::new(Counter::default());
    let store = KvStore::open(Memory::new(), "").unwrap();
    let map = ORMap::new(store, config()).with_observer(counter.clone());

    let sender = new_map("sender");
    sender.set("a", "1".to_owned()).await.unwrap();
    let dump = sender.dump().unwrap();

    map.process(dump.clone()).await.unwrap();
    map.process(dump).await.unwrap();
    assert_eq!(*counter.sets.lock().unwrap(), 1);
    assert_eq!(*counter.affirms.lock().unwrap(), 1);
    assert_eq!(*counter.deletes.lock().unwrap(), 0);
}

#[tokio::test]
async fn converges_with_the_in_memory_variant() {
    let persistent = new_map("p");
    let volatile: ORMap<String, MemoryStore<String>> =
        ORMap::new(MemoryStore::new(), config());

    persistent.set("x", "1".to_owned()).await.unwrap();
    volatile.set("y", "2".to_owned()).await.unwrap();
    volatile.delete("y").await.unwrap();

    persistent.process(volatile.dump().unwrap()).await.unwrap();
    volatile.process(persistent.dump().unwrap()).await.unwrap();

    assert_eq!(persistent.keys().unwrap(), vec!["x".to_owned()]);
    assert_eq!(volatile.keys().unwrap(), vec!["x".to_owned()]);
}

#[tokio::test]
async fn flush_respects_max_age() {
    let map: ORMap<String, KvStore<Memory>> = ORMap::persistent(
        Memory::new(),
        Config {
            max_age: Duration::from_millis(300),
            buffer_publishing: Duration::ZERO,
            namespace: "gc".to_owned(),
        },
    )
    .unwrap();
    for key in ["a", "b", "c"] {
        map.set(key, "v".to_owned()).await.unwrap();
        map.delete(key).await.unwrap();
    }
    assert_eq!(map.dump().unwrap().1.len(), 3);
    map.flush().await.unwrap();
    assert_eq!(map.dump().unwrap().1.len(), 3);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let flushed = map.flush().await.unwrap();
    assert_eq!(flushed, 3);
    assert_eq!(map.dump().unwrap().1.len(), 0);
}

#[tokio::test]
async fn cursor_pages_through_a_large_live_range() {
    let map = new_map("big");
    for i in 0..300 {
        map.set(&format!("key{i:04}"), i.to_string()).await.unwrap();
    }
    assert_eq!(map.size(), 300);
    let keys = map.keys().unwrap();
    assert_eq!(keys.len(), 300);
    assert_eq!(keys[0], "key0000");
    assert_eq!(keys[299], "key0299");
    // dump pages through the same range
    assert_eq!(map.dump().unwrap().0.len(), 300);
}
