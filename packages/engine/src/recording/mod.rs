// packages/engine/src/recording/mod.rs
//! Exchange capture records and recorder sinks
//!
//! - **Record**: `ExchangeRecord` and its request/response snapshots
//! - **Recorder**: Sink trait, queued recorder, log recorder
//! - **Event Queue**: Lock-free bounded queue behind the queued recorder
//! - **Memory**: Last-write-wins in-memory recorder
//!
//! # Architecture
//!
//! ```text
//! ExchangeSession → save_request() → Lock-Free Queue → Background Writer
//!                   (never blocks)         ↓                  ↓
//!                                    drop when full      wrapped sink
//! ```

pub mod event_queue;
pub mod memory;
pub mod record;
pub mod recorder;

// Re-export commonly used types
pub use event_queue::{EventQueue, QueueStats};
pub use memory::MemoryRecorder;
pub use record::{ExchangeRecord, ExchangeState, RedirectHop, RequestSnapshot, ResponseSnapshot};
pub use recorder::{LogRecorder, QueuedRecorder, Recorder, RecorderConfig, RecorderStats};
