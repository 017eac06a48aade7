//! The two background loops: the refresh scheduler and the request
//! dispatcher. Each runs on its own named thread and blocks on its own
//! condition; neither ever holds a store lock while blocking.

pub(crate) mod dispatch;
pub(crate) mod refresh;

pub(crate) use dispatch::RequestStore;
pub(crate) use refresh::Trigger;
