pub mod bus;
pub mod restart;
pub mod sampler;
pub mod store;

pub use bus::{topics, Bus, BusEnvelope, BusExt, BusSubscription, TopicPattern};
pub use restart::RestartController;
pub use sampler::ResourceSampler;
pub use store::{DatabaseKind, SqlRow, SqlValue, StateStore, Statement};
