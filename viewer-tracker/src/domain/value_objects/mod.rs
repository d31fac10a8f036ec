//! Domain value objects.
//!
//! Value objects are immutable and defined by their attributes rather than identity.

mod broadcast_ref;
mod notify_target;
mod retry_policy;

pub use broadcast_ref::BroadcastRef;
pub use notify_target::NotifyTarget;
pub use retry_policy::RetryPolicy;
