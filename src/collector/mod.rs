pub mod latency;
pub mod lifecycle;
pub mod orchestrator;
pub mod poller;

#[cfg(test)]
pub(crate) mod testing;

pub use lifecycle::LifecycleTracker;
pub use orchestrator::{CollectorStatus, Orchestrator};
pub use poller::PollingService;
