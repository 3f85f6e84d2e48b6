// A poisoned lock means a panic interrupted a pool operation halfway. The free list and segment
// table can no longer be trusted, so continuing could hand the same memory to two owners.
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - continued execution \
    is not safe because the pool can no longer guarantee that chunks have a single owner";
