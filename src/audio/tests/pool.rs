use crate::audio::pool::BufferPool;

#[test]
fn test_reuses_same_size() {
    let pool = BufferPool::new(2);
    let mut buf = pool.get(256);
    buf[0] = 1.0;
    let ptr = buf.as_ptr();
    pool.put(buf);

    let again = pool.get(256);
    assert_eq!(again.as_ptr(), ptr);
    assert_eq!(again[0], 0.0);
    assert_eq!(pool.usage(), (1, 1));
}

#[test]
fn test_sizes_kept_apart() {
    let pool = BufferPool::new(2);
    pool.put(vec![0.0; 128]);

    assert_eq!(pool.get(64).len(), 64);
    assert_eq!(pool.idle(128), 1);
}

#[test]
fn test_idle_bounded_per_size() {
    let pool = BufferPool::new(2);
    for _ in 0..5 {
        pool.put(vec![0.0; 32]);
    }
    assert_eq!(pool.idle(32), 2);

    pool.clear();
    assert_eq!(pool.idle(32), 0);
}
