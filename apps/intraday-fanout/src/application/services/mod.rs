//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionService`: Registry bookkeeping plus upstream commands
//! - `FanoutDispatcher`: Delivers bars to subscribed sessions
//! - `FanoutSupervisor`: Public register/unregister façade

mod dispatcher;
mod subscription;
mod supervisor;

pub use dispatcher::{DEFAULT_DELIVERY_TIMEOUT, DispatchOutcome, FanoutDispatcher};
pub use subscription::SubscriptionService;
pub use supervisor::{FanoutStats, FanoutSupervisor};
