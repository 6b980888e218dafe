//! Thin structured-logging facade over the `log` crate. Each component logs
//! at its own target (`fragstore::pmm`, `fragstore::disk_alloc`, …), scoping
//! call sites by subsystem the way a hosted storage node's logging sinks
//! expect to filter by target.

/// Logs a resource-exhaustion event at `warn` level with its target and
/// the failing request's shape, so exhaustion is observable without an
/// actual info table in this crate.
#[macro_export]
macro_rules! log_resource_exhausted {
    ($target:expr, $($arg:tt)*) => {
        log::warn!(target: $target, $($arg)*)
    };
}
