mod rtt;
mod throughput;

pub use self::{rtt::Rtt, throughput::Throughput};
