// p4rt-api: P4Runtime message shapes and the channel seam the client drives.

pub mod proto;
pub mod stub;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use stub::{P4RuntimeStub, RequestStream, ResponseStream, RpcFuture};
pub use tonic::{Code, Status};
