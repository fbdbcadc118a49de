//! Low-level building blocks shared by the engines.

/// Generation clock and scoped nesting counter.
///
/// Lock-free coordination between sessions and reentrancy tracking inside one.
pub mod concurrency;
