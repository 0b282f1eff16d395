// Content view backends — the host browser runtime's debugger, behind a trait.

pub mod cdp;
pub mod traits;
