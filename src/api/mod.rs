//! Management-plane API: authenticated client and subscription directory

pub mod client;
pub mod subscriptions;

pub use client::ArmClient;
pub use subscriptions::{
    mark, select, ArmSubscriptionSource, SubscriptionDirectory, SubscriptionSource,
};
