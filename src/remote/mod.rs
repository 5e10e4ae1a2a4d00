//! Remote server plumbing: the client adapter and its polling worker.

mod adapter;
mod poller;

pub use adapter::{
    AdapterError, FrameworkEvent, ITEMS_HANDLING_ALL, LifecycleSignal, RandomizerSocket,
    ServerAdapter, ServerHandle, SocketEvent, lock, shared,
};
pub use poller::PollingWorker;

#[cfg(test)]
pub(crate) use adapter::test_support;
