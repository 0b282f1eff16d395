// UI-facing surface — request/response operations and push event subscription.

pub mod dialup_api;
pub mod simple;
