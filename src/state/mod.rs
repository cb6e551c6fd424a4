mod reducer;
mod store;


pub use reducer::{reduce, IgnoreReason, Reduction};
pub use store::{lock_store, RunState, RunStore, SharedRunStore};
