//! Mock BinlogManager for testing.
//!
//! [`ScriptedReader`] serves a fixed sequence of read outcomes and then
//! behaves like an idle tail (periodic benign pauses). The manager hands
//! out pre-pushed readers in order and records every `add_reader` call
//! so tests can assert on reset positions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fanout_engine::binlog::{
    BinlogManager, BinlogReader, BinlogRecord, BoxFuture, CacheEntity, KeyStateCache, ReadResult,
};

/// One scripted step served by a [`ScriptedReader`].
pub enum ReadStep {
    /// Yield a batch and move the cursor to `(filenum, offset)`.
    Batch(Vec<BinlogRecord>, u64, u64),
    /// The benign pause sentinel.
    Paused,
    /// A read failure.
    Failed(&'static str),
}

/// A reader that replays a script, then idles.
pub struct ScriptedReader {
    steps: VecDeque<ReadStep>,
    position: (u64, u64),
}

impl ScriptedReader {
    pub fn new(position: (u64, u64), steps: Vec<ReadStep>) -> Self {
        Self {
            steps: steps.into(),
            position,
        }
    }
}

impl BinlogReader for ScriptedReader {
    fn read_records(&mut self) -> BoxFuture<'_, ReadResult> {
        Box::pin(async move {
            match self.steps.pop_front() {
                Some(ReadStep::Batch(records, filenum, offset)) => {
                    self.position = (filenum, offset);
                    ReadResult::Records(records)
                }
                Some(ReadStep::Paused) => ReadResult::Paused,
                Some(ReadStep::Failed(message)) => ReadResult::Failed(message.to_string()),
                None => {
                    // Script exhausted: act like a blocked tail read that
                    // wakes up with nothing.
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    ReadResult::Paused
                }
            }
        })
    }

    fn position(&self) -> (u64, u64) {
        self.position
    }
}

/// Key-state cache that records lookups.
#[derive(Default)]
pub struct MockKeyCache {
    entries: Mutex<HashMap<String, Arc<CacheEntity>>>,
    lookups: AtomicUsize,
}

impl MockKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, exec_time: i64) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::new(CacheEntity { exec_time }));
    }

    /// Total lookups observed, hits and misses.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Handles to `key` currently held outside the cache.
    pub fn outstanding_handles(&self, key: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .map(|entry| Arc::strong_count(entry) - 1)
            .unwrap_or(0)
    }
}

impl KeyStateCache for MockKeyCache {
    fn lookup(&self, key: &str) -> Option<Arc<CacheEntity>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().get(key).cloned()
    }
}

/// Scripted binlog manager: hands out pre-pushed readers in order.
pub struct MockBinlogManager {
    scripts: Mutex<VecDeque<ScriptedReader>>,
    cache: Arc<MockKeyCache>,
    add_reader_calls: Mutex<Vec<(u64, u64)>>,
}

impl MockBinlogManager {
    pub fn new(cache: MockKeyCache) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            cache: Arc::new(cache),
            add_reader_calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reader for the next `add_reader` call.
    pub fn push_reader(&self, reader: ScriptedReader) {
        self.scripts.lock().unwrap().push_back(reader);
    }

    /// Every `(filenum, offset)` passed to `add_reader`, in order.
    pub fn add_reader_calls(&self) -> Vec<(u64, u64)> {
        self.add_reader_calls.lock().unwrap().clone()
    }

    pub fn cache(&self) -> &Arc<MockKeyCache> {
        &self.cache
    }
}

impl BinlogManager for MockBinlogManager {
    fn add_reader(&self, filenum: u64, offset: u64) -> Option<Box<dyn BinlogReader>> {
        self.add_reader_calls.lock().unwrap().push((filenum, offset));
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .map(|reader| Box::new(reader) as Box<dyn BinlogReader>)
    }

    fn key_cache(&self) -> Arc<dyn KeyStateCache> {
        let cache: Arc<dyn KeyStateCache> = self.cache.clone();
        cache
    }
}
