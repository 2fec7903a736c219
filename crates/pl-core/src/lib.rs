// Named `core` so callers import `pl_core::core::...`; inside this crate the
// built-in `core` is reachable as `::core`.
#[path = "core_domain/mod.rs"]
pub mod core;
