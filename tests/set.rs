use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use ormap::{Config, MemoryStore, ORSet, SetObserver};

/// Captures compressed publish buffers, standing in for the transport.
#[derive(Default)]
struct Wire {
    buffers: Mutex<Vec<Vec<u8>>>,
    added: Mutex<Vec<Value>>,
    deleted: Mutex<Vec<Value>>,
}

impl SetObserver<Value> for Wire {
    fn on_add(&self, value: &Value) {
        self.added.lock().unwrap().push(value.clone());
    }

    fn on_delete(&self, value: &Value) {
        self.deleted.lock().unwrap().push(value.clone());
    }

    fn on_publish(&self, buffer: &[u8]) {
        self.buffers.lock().unwrap().push(buffer.to_vec());
    }
}

impl Wire {
    fn buffers(&self) -> Vec<Vec<u8>> {
        self.buffers.lock().unwrap().clone()
    }
}

fn immediate() -> Config {
    Config {
        buffer_publishing: Duration::ZERO,
        ..Config::default()
    }
}

fn new_set() -> (ORSet<Value, MemoryStore<Value>>, Arc<Wire>) {
    let wire = Arc::new(Wire::default());
    let set = ORSet::new(MemoryStore::new(), immediate()).with_observer(wire.clone());
    (set, wire)
}

#[tokio::test]
async fn add_has_delete() {
    let (set, wire) = new_set();
    let value = json!({"name": "a", "n": 1});
    set.add(value.clone()).await.unwrap();
    assert_eq!(set.size(), 1);
    assert!(set.has(&value).unwrap());
    set.delete(&value).await.unwrap();
    assert_eq!(set.size(), 0);
    assert!(!set.has(&value).unwrap());
    assert_eq!(wire.added.lock().unwrap().len(), 1);
    assert_eq!(wire.deleted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn equal_values_collapse_to_one_entry() {
    let (set, _) = new_set();
    // key order inside the value does not matter for the fingerprint
    set.add(json!({"a": 1, "b": 2})).await.unwrap();
    set.add(json!({"b": 2, "a": 1})).await.unwrap();
    assert_eq!(set.size(), 1);
    // one deletion removes the survivor, whichever add installed it
    set.delete(&json!({"a": 1, "b": 2})).await.unwrap();
    assert_eq!(set.size(), 0);
}

#[tokio::test]
async fn publishes_replicate_through_the_compressed_wire() {
    let (alice, alice_wire) = new_set();
    let (bob, _) = new_set();

    alice.add(json!("x")).await.unwrap();
    alice.add(json!({"k": [1, 2]})).await.unwrap();
    for buffer in alice_wire.buffers() {
        bob.process(&buffer).await.unwrap();
    }
    assert_eq!(bob.size(), 2);
    assert!(bob.has(&json!("x")).unwrap());
    assert!(bob.has(&json!({"k": [1, 2]})).unwrap());
    assert_eq!(bob.values().unwrap(), alice.values().unwrap());
}

#[tokio::test]
async fn deletion_travels_with_its_insertion_in_one_batch() {
    let wire = Arc::new(Wire::default());
    let config = Config {
        buffer_publishing: Duration::from_millis(20),
        ..Config::default()
    };
    let alice: ORSet<Value, MemoryStore<Value>> =
        ORSet::new(MemoryStore::new(), config).with_observer(wire.clone());

    alice.add(json!("ephemeral")).await.unwrap();
    alice.delete(&json!("ephemeral")).await.unwrap();
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if !wire.buffers().is_empty() {
            break;
        }
    }
    let buffers = wire.buffers();
    assert_eq!(buffers.len(), 1);

    let (bob, _) = new_set();
    bob.process(&buffers[0]).await.unwrap();
    assert_eq!(bob.size(), 0);
    assert!(!bob.has(&json!("ephemeral")).unwrap());
}

#[tokio::test]
async fn a_deletion_arriving_first_suppresses_the_late_insertion() {
    let (alice, alice_wire) = new_set();
    alice.add(json!(42)).await.unwrap();
    alice.delete(&json!(42)).await.unwrap();
    let buffers = alice_wire.buffers();
    assert_eq!(buffers.len(), 2);

    // carol hears about the deletion before the insertion
    let (carol, _) = new_set();
    carol.process(&buffers[1]).await.unwrap();
    carol.process(&buffers[0]).await.unwrap();
    assert_eq!(carol.size(), 0);
    assert!(!carol.has(&json!(42)).unwrap());
}

#[tokio::test]
async fn delete_on_a_replica_that_learned_the_value_remotely() {
    let (alice, alice_wire) = new_set();
    alice.add(json!("shared")).await.unwrap();
    let (bob, bob_wire) = new_set();
    for buffer in alice_wire.buffers() {
        bob.process(&buffer).await.unwrap();
    }
    assert!(bob.has(&json!("shared")).unwrap());

    // bob deletes, and the bare-id deletion round-trips back to alice
    bob.delete(&json!("shared")).await.unwrap();
    for buffer in bob_wire.buffers() {
        alice.process(&buffer).await.unwrap();
    }
    assert_eq!(alice.size(), 0);
    assert_eq!(bob.size(), 0);
}

#[tokio::test]
async fn values_iterate_identically_on_converged_replicas() {
    let (alice, alice_wire) = new_set();
    let (bob, bob_wire) = new_set();
    alice.add(json!(1)).await.unwrap();
    alice.add(json!({"deep": {"nesting": true}})).await.unwrap();
    bob.add(json!("s")).await.unwrap();

    for buffer in alice_wire.buffers() {
        bob.process(&buffer).await.unwrap();
    }
    for buffer in bob_wire.buffers() {
        alice.process(&buffer).await.unwrap();
    }
    assert_eq!(alice.size(), 3);
    assert_eq!(alice.values().unwrap(), bob.values().unwrap());
}

#[tokio::test]
async fn sync_publishes_a_compressed_dump() {
    let (set, wire) = new_set();
    set.add(json!("a")).await.unwrap();
    set.add(json!("b")).await.unwrap();
    let before = wire.buffers().len();
    set.sync(None).unwrap();
    let buffers = wire.buffers();
    assert_eq!(buffers.len(), before + 1);

    let (other, _) = new_set();
    other.process(buffers.last().unwrap()).await.unwrap();
    assert_eq!(other.size(), 2);
}
