//! BufferPool 单元测试

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::memory::{BufferPool, MemoryError};

#[test]
fn test_alloc_is_zeroed() {
    let pool = BufferPool::new(64, 2);
    let mut buffer = pool.alloc().unwrap();
    assert_eq!(buffer.capacity(), 64);
    assert_eq!(buffer.readable(), 0);
    assert_eq!(buffer.writable(), 64);

    buffer.write(&[1, 2, 3]);
    assert_eq!(buffer.as_slice(), &[1, 2, 3]);
    pool.release(buffer).unwrap();

    // Recycled buffer must come back zeroed.
    let buffer = pool.alloc().unwrap();
    assert_eq!(buffer.readable(), 0);
    assert_eq!(buffer.writable(), 64);
    pool.release(buffer).unwrap();
}

#[test]
fn test_buffer_cursors() {
    let pool = BufferPool::new(8, 1);
    let mut buffer = pool.alloc().unwrap();

    assert_eq!(buffer.write(&[1, 2, 3, 4, 5]), 5);
    assert_eq!(buffer.write(&[6, 7, 8, 9]), 3); // only 3 bytes left
    assert_eq!(buffer.writable(), 0);

    let mut dst = [0u8; 4];
    assert_eq!(buffer.read(&mut dst), 4);
    assert_eq!(dst, [1, 2, 3, 4]);
    assert_eq!(buffer.readable(), 4);
    assert_eq!(buffer.as_slice(), &[5, 6, 7, 8]);
}

#[test]
fn test_outstanding_never_exceeds_capacity() {
    let pool = BufferPool::new(16, 2);
    let a = pool.alloc().unwrap();
    let b = pool.alloc().unwrap();
    assert_eq!(pool.outstanding(), 2);
    assert!(pool.try_alloc().is_none());

    pool.release(a).unwrap();
    assert_eq!(pool.outstanding(), 1);
    let c = pool.try_alloc().unwrap();
    assert_eq!(pool.outstanding(), 2);

    pool.release(b).unwrap();
    pool.release(c).unwrap();
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_alloc_timeout() {
    let pool = BufferPool::new(16, 1);
    let held = pool.alloc().unwrap();

    let timeout = Duration::from_millis(20);
    assert_eq!(
        pool.alloc_timeout(timeout),
        Err(MemoryError::AllocTimeout(timeout))
    );

    pool.release(held).unwrap();
    assert!(pool.alloc_timeout(timeout).is_ok());
}

#[test]
fn test_release_wakes_blocked_allocator() {
    let pool = Arc::new(BufferPool::new(16, 1));
    let held = pool.alloc().unwrap();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.alloc())
    };

    // Give the waiter time to block, then free the only buffer.
    thread::sleep(Duration::from_millis(50));
    pool.release(held).unwrap();

    let buffer = waiter.join().unwrap().unwrap();
    pool.release(buffer).unwrap();
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_capacity_one_producer_consumer_progress() {
    // Pool safety/liveness: repeated alloc/release cycles with capacity 1
    // must make progress without deadlock.
    let pool = Arc::new(BufferPool::new(32, 1));
    let (tx, rx) = crossbeam::channel::bounded(1);

    let producer = {
        let pool = pool.clone();
        thread::spawn(move || {
            for i in 0..200u32 {
                let mut buffer = pool.alloc().unwrap();
                buffer.write(&i.to_le_bytes());
                tx.send(buffer).unwrap();
            }
        })
    };

    let consumer = {
        let pool = pool.clone();
        thread::spawn(move || {
            for i in 0..200u32 {
                let buffer = rx.recv().unwrap();
                let mut got = [0u8; 4];
                got.copy_from_slice(&buffer.as_slice()[..4]);
                assert_eq!(u32::from_le_bytes(got), i);
                pool.release(buffer).unwrap();
            }
        })
    };

    producer.join().unwrap();
    consumer.join().unwrap();
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_shutdown_interrupts_waiters() {
    let pool = Arc::new(BufferPool::new(16, 1));
    let _held = pool.alloc().unwrap();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.alloc())
    };

    thread::sleep(Duration::from_millis(50));
    pool.shutdown();

    assert_eq!(waiter.join().unwrap(), Err(MemoryError::Interrupted));
}

#[test]
fn test_foreign_buffer_rejected() {
    let small = BufferPool::new(16, 1);
    let large = BufferPool::new(64, 1);

    let buffer = small.alloc().unwrap();
    assert!(matches!(
        large.release(buffer),
        Err(MemoryError::ForeignBuffer { got: 16, expected: 64 })
    ));
}
