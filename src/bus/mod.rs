pub mod broker;
pub mod delivery;
pub mod errors;
pub mod groups;
pub mod liveness;
pub mod retained;
pub mod session;
pub mod topic;
pub mod types;

pub use broker::{Broker, BusHandle};
pub use errors::BusError;
pub use liveness::{LivenessRecord, LivenessStatus};
pub use topic::{SubscriptionFilter, TopicFilter};
pub use types::{ClientId, Delivery, DeliveryId, Message, QoS, WillSpec};
