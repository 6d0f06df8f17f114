pub(crate) mod bitfield;
pub(crate) use bitfield::AtomicBitfield;

pub(crate) mod scope_guard;
pub(crate) use scope_guard::ScopeGuard;
