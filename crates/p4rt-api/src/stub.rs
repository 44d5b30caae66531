// ── Channel seam ──
//
// The transport (gRPC channel setup and TLS) is built elsewhere
// and handed to the client already connected. Everything the client needs
// from it is the five P4Runtime service calls below.

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use tonic::Status;

use crate::proto::{
    GetForwardingPipelineConfigRequest, GetForwardingPipelineConfigResponse, ReadRequest,
    ReadResponse, SetForwardingPipelineConfigRequest, StreamMessageRequest,
    StreamMessageResponse, WriteRequest, WriteResponse,
};

/// A single in-flight call. Resolves to the response or the call's status.
pub type RpcFuture<'a, T> = BoxFuture<'a, Result<T, Status>>;

/// Server-streamed responses. Ends with `None` on clean completion.
pub type ResponseStream<T> = BoxStream<'static, Result<T, Status>>;

/// Client-streamed requests for the bidirectional stream channel.
pub type RequestStream = BoxStream<'static, StreamMessageRequest>;

/// Stub over an already-connected P4Runtime channel.
///
/// Implementations must be cheap to share: the client issues concurrent
/// calls through one `Arc<dyn P4RuntimeStub>` per device. Deadlines and
/// cancellation are applied by the caller around the returned futures.
pub trait P4RuntimeStub: Send + Sync {
    /// Open the bidirectional `StreamChannel` RPC. Frames pulled from
    /// `outbound` are delivered to the server in order.
    fn stream_channel(
        &self,
        outbound: RequestStream,
    ) -> RpcFuture<'_, ResponseStream<StreamMessageResponse>>;

    fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> RpcFuture<'_, ()>;

    fn get_forwarding_pipeline_config(
        &self,
        request: GetForwardingPipelineConfigRequest,
    ) -> RpcFuture<'_, GetForwardingPipelineConfigResponse>;

    /// Start a read. The returned stream yields response chunks.
    fn read(&self, request: ReadRequest) -> RpcFuture<'_, ResponseStream<ReadResponse>>;

    /// Submit a batch of updates. Per-update failures are reported in the
    /// response; an `Err` means the call as a whole failed.
    fn write(&self, request: WriteRequest) -> RpcFuture<'_, WriteResponse>;
}
