//! Memory records - the fundamental unit of the store
//!
//! Each record mirrors one memory file on disk plus the engine state
//! attached to it: FSRS scheduling fields, access counters, the
//! importance tier, and embedding status.

mod record;

pub use record::{
    ContextType, EmbeddingStatus, ImportanceTier, MemoryRecord, MemoryStats, MemoryUpdate,
    NewMemory, MAX_TRIGGER_LEN, MAX_TRIGGER_PHRASES,
};
