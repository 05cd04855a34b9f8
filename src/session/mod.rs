// Trading sessions
pub mod errors;    // SessionError
pub mod executor;  // TradeExecutor seam + live ChainExecutor
pub mod guard;     // Concurrent-buy ceiling, blacklist, cooldown
pub mod machine;   // Per-token session task
pub mod mirror;    // scm aggregator sells
pub mod policy;    // Sell retry policy
pub mod position;  // Position and tracked-wallet accounting
pub mod registry;  // token -> live session
pub mod rules;     // Trade observation rules
pub mod state;     // Session lifecycle states

pub use errors::SessionError;
pub use executor::{ChainExecutor, Fill, Route, TradeExecutor};
pub use guard::{BuyGuard, BuyPermit, BuySlot, GuardRejection};
pub use machine::{open, open_tracked, SessionDeps, TipSchedule};
pub use mirror::mirror_sell;
pub use policy::{pct_to_bps, NextStep, SellAttempt, SellPolicy};
pub use position::{price_of, Position, TrackedCounterparty};
pub use registry::{SessionHandle, SessionRegistry};
pub use rules::{Command, Reaction};
pub use state::{SessionState, StateCell};
