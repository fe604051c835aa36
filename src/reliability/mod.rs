pub mod ack;
pub mod loss;
pub mod rtt;
pub mod space;

pub use ack::AckManager;
pub use loss::{LossDetector, LossEvent};
pub use rtt::RttEstimator;
pub use space::PacketNumberSpace;
