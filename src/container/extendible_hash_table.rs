use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

/// A bucket holds up to `bucket_size` key/value pairs at a given local depth.
#[derive(Debug)]
struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K: PartialEq, V> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            items: Vec::new(),
        }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| k == key) {
            self.items.remove(pos);
            true
        } else {
            false
        }
    }
}

struct Inner<K, V> {
    global_depth: usize,
    num_buckets: usize,
    /// Directory of size 2^global_depth; entries index into `buckets`.
    /// Several entries may alias the same bucket when its local depth is
    /// smaller than the global depth.
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

impl<K: Hash, V> Inner<K, V> {
    fn index_of(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & ((1usize << self.global_depth) - 1)
    }
}

/// Extendible hash table mapping page ids to frame ids inside the buffer
/// pool.
///
/// A single mutex guards the whole structure. Concurrency inside the hash
/// table is not the goal here: it sits behind the buffer pool and its
/// contention is negligible next to disk I/O.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + PartialEq + Clone,
    V: Clone,
{
    /// Creates a table with a single bucket of the given capacity.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0);
        Self {
            bucket_size,
            inner: Mutex::new(Inner {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![0],
                buckets: vec![Bucket::new(0)],
            }),
        }
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }

    /// Looks up the value for `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let idx = inner.index_of(key);
        inner.buckets[inner.dir[idx]].find(key).cloned()
    }

    /// Removes the entry for `key`, returning whether it existed.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let idx = inner.index_of(key);
        let bucket = inner.dir[idx];
        inner.buckets[bucket].remove(key)
    }

    /// Inserts or overwrites the entry for `key`.
    ///
    /// When the target bucket is full: if its local depth equals the global
    /// depth the directory doubles first, then the bucket splits into two
    /// siblings one bit deeper, its entries redistribute, and the insert
    /// retries against the grown table.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();

        loop {
            let idx = inner.index_of(&key);
            let bucket = inner.dir[idx];

            if inner.buckets[bucket].remove(&key)
                || inner.buckets[bucket].items.len() < self.bucket_size
            {
                inner.buckets[bucket].items.push((key, value));
                return;
            }

            // Full bucket: grow the directory if the bucket is already at
            // maximum depth, then split it.
            if inner.buckets[bucket].depth == inner.global_depth {
                let doubled: Vec<usize> = inner.dir.clone();
                inner.dir.extend(doubled);
                inner.global_depth += 1;
            }

            let new_depth = inner.buckets[bucket].depth + 1;
            inner.buckets[bucket].depth = new_depth;
            let sibling = inner.buckets.len();
            inner.buckets.push(Bucket::new(new_depth));
            inner.num_buckets += 1;

            // Directory slots that alias the old bucket and have the new
            // high bit set now point at the sibling.
            for i in 0..inner.dir.len() {
                if inner.dir[i] == bucket && (i >> (new_depth - 1)) & 1 == 1 {
                    inner.dir[i] = sibling;
                }
            }

            // Redistribute the old bucket's entries across the pair.
            let items = std::mem::take(&mut inner.buckets[bucket].items);
            for (k, v) in items {
                let home = inner.dir[inner.index_of(&k)];
                inner.buckets[home].items.push((k, v));
            }
        }
    }
}
