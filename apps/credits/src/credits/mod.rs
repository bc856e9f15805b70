// Write path: CV credit deduction with bounded retry.
// Runs only after the paid action has succeeded; see handlers.

pub mod handlers;
pub mod ledger;
pub mod retry;
