pub mod retry;
pub mod session;

pub use retry::{request_completion, RetryPolicy};
pub use session::{ChatSession, TurnEvent, TurnOutcome, TurnState};
