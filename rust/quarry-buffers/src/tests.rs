use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{AccumulationBuffer, SharedBuffer, SharedBytes};

struct Tracked {
    value: u32,
    drops: Arc<AtomicUsize>,
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        Tracked {
            value: self.value,
            drops: self.drops.clone(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_hello_world_scenario() {
    let mut buf = SharedBuffer::allocate(20, "hello".to_string());
    assert_eq!(buf.len(), 20);
    assert!(buf.iter().all(|s| s == "hello"));

    let cbuf = buf.clone();
    unsafe { buf.as_mut_slice()[1] = "world".to_string() };
    assert_eq!(cbuf[1], "world");
    assert_eq!(cbuf[0], "hello");
}

#[test]
fn test_split_buffers_outlive_accumulation() {
    let drops = Arc::new(AtomicUsize::new(0));
    let fill = Tracked {
        value: 0,
        drops: drops.clone(),
    };

    let mut acc = AccumulationBuffer::with_min_buffer(4);
    acc.ensure_length(8, fill.clone());
    for (i, t) in acc.iter_mut().enumerate() {
        t.value = i as u32;
    }
    let head = acc.first(3).unwrap();
    // Growth beyond the spare capacity moves the window to a new allocation;
    // the split-off head keeps the old one alive.
    acc.ensure_length(64, fill.clone());
    drop(acc);

    let values: Vec<u32> = head.iter().map(|t| t.value).collect();
    assert_eq!(values, vec![0, 1, 2]);

    let before = drops.load(Ordering::SeqCst);
    drop(head);
    // The old backing vector held 8 elements and is released with the head.
    assert_eq!(drops.load(Ordering::SeqCst), before + 8);
}

#[test]
fn test_buffers_sent_to_threads_release_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let buffer = SharedBuffer::allocate(
        16,
        Tracked {
            value: 7,
            drops: drops.clone(),
        },
    );

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let part = buffer.slice(i * 2..i * 2 + 2);
            std::thread::spawn(move || part.iter().map(|t| t.value).sum::<u32>())
        })
        .collect();
    drop(buffer);
    let total: u32 = threads.into_iter().map(|t| t.join().unwrap()).sum();
    assert_eq!(total, 7 * 16);
    assert_eq!(drops.load(Ordering::SeqCst), 16);
}

#[test]
fn test_bytes_records_from_accumulation() {
    let mut acc = AccumulationBuffer::<u8>::new();
    acc.ensure_length(10, 0);
    acc.copy_from_slice(b"0123456789");
    let record = acc.first(4).unwrap();
    let copy = SharedBytes::copy_bytes(&record);
    assert_eq!(copy.as_slice(), b"0123");
    assert_ne!(copy.control_block(), record.control_block());
}
