//! Batch dispatch: per-record state machine and the concurrent dispatcher.

mod dispatcher;
mod state;

pub use dispatcher::{BatchDispatcher, DispatchSettings, dispatch_file};
pub use state::{DispatchState, RetryPolicy, transition};
