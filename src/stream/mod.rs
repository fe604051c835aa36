pub mod flow;
pub mod id;
pub mod reassembly;
pub mod stream;

pub use flow::FlowControl;
pub use id::{next_local_stream_id, StreamIdAllocator, StreamType};
pub use reassembly::ReassemblyBuffer;
pub use stream::{RecvState, SendState, Stream};
