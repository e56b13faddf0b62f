pub mod command;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod metrics;
pub mod ports;
pub mod ring;
pub mod status;

pub use command::{Command, Response, PROCESS_ID_PARAM, RESPONSE_CHANNEL_PARAM};
pub use descriptor::{DescriptorBuilder, ProcessDescriptor, ProcessMetadata, RestartPolicy};
pub use error::{Result, SupervisorError};
pub use event::{Event, EventType};
pub use metrics::{round_cpu_pct, MetricSample, ResourceSnapshot};
pub use ring::OutputRing;
pub use status::ProcessStatus;
