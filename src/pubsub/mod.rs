//! Publish/subscribe over pooled buffers
//!
//! Publishers fan buffers out to subscriptions; a mailbox joins several
//! subscriptions into one wait.

mod mailbox;
mod publisher;
mod subscription;

pub use mailbox::{Mailbox, Slot};
pub use publisher::{Observer, Publisher};
pub use subscription::{Pulled, Subscription};
