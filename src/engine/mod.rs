// Engine orchestration — connection session, disconnect timing and throttling.

pub mod dialer;
pub mod events;
pub mod profile;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod throttle;
