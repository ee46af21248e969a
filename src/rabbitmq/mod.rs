pub mod config;
pub mod publisher;

pub use config::{RabbitMQConfig, RoutingKeyBuilder};
pub use publisher::{PublisherStats, RabbitMQError, RabbitMQPublisher};
