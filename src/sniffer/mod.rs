// Sniffer components
pub mod buy_cache;   // FIFO of recently bought tokens with TTL
pub mod dedup;       // Lock-free bloom filter over swap signatures
pub mod errors;      // SnifferError, ExponentialBackoff
pub mod feed;        // SwapFeed trait + WebSocket JSON feed
pub mod ingest;      // Dedup, pool tracking, per-class fan-out
pub mod pool_state;  // Latest pool payload and price per token
pub mod supervisor;  // Lifecycle management, pause/resume/stop
pub mod wire;        // Upstream JSON event format

// Re-export commonly used types
pub use buy_cache::BuyCache;
pub use dedup::SignatureDeduper;
pub use errors::{ExponentialBackoff, SnifferError};
pub use feed::{SwapFeed, WsJsonFeed};
pub use ingest::{Ingest, IngestOutcome, IngestRoutes, WatchFilter};
pub use pool_state::{PoolRegistry, PoolState};
pub use supervisor::{EngineState, Supervisor, SupervisorCommand, WorkerHandle};
