// packages/engine/src/recording/memory.rs
//! In-memory recorder keyed by exchange ID

use crate::recording::recorder::Recorder;
use crate::recording::record::ExchangeRecord;
use crate::utils::errors::Result;
use dashmap::DashMap;

/// Last-write-wins snapshot store
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    records: DashMap<String, ExchangeRecord>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot for `id`
    pub fn get(&self, id: &str) -> Option<ExchangeRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// All latest snapshots, oldest exchange first
    pub fn records(&self) -> Vec<ExchangeRecord> {
        let mut records: Vec<ExchangeRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}

impl Recorder for MemoryRecorder {
    fn save_request(&self, record: ExchangeRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record);
        Ok(())
    }
}
