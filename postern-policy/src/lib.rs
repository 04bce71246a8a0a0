pub mod limiter;
pub mod store;
pub mod verdict;

pub use limiter::{RateDecision, RateKey, RateLimitError, RateLimiter, Selector};
pub use store::{CounterError, CounterStore, MemoryCounterStore};
pub use verdict::{
    AuthVerdicts, Protocol, RawSymbol, SpamAction, Symbol, SymbolMap, Verdict, VerdictError,
    VerdictStatus, classify, ingest_symbols, rejection_message, total_score,
};
