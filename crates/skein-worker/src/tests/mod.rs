//! Worker test suite: a deterministic toy front-end plus scenario and
//! invariant coverage. Everything drives the real worker with its real
//! threads; `settle` keeps the tests deterministic.

mod invariants;
mod toy;
