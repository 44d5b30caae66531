// ── Stream session ──
//
// The long-lived StreamChannel RPC of one device. Outbound frames
// (arbitration claims, packet-outs) go through a bounded queue; inbound
// frames are consumed by a single task per session that feeds the arbiter
// and publishes packet-in and stream-error events. Losing the stream
// closes the session; reopening it is the owner's decision.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use futures_util::StreamExt;
use p4rt_api::proto::{PacketIn, StreamMessageRequest, StreamMessageResponse};
use p4rt_api::{P4RuntimeStub, ResponseStream, Status};
use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arbiter::MastershipArbiter;
use crate::classify::ErrorClassifier;
use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::executor::{RpcExecutor, RpcFailure, SessionScope};
use crate::model::{
    DeviceId, ElectionId, EventSink, OutboundPacket, P4RuntimeEvent, Pipeconf, PipeconfService,
    decode_packet_in, encode_packet_out,
};

const OPEN_STREAM: &str = "open stream channel";
const STREAM_CHANNEL: &str = "stream channel";

// ── StreamSender ─────────────────────────────────────────────────────

/// Outbound half of the stream. Empty while no session is open.
pub(crate) struct StreamSender {
    device_id: DeviceId,
    tx: ArcSwapOption<mpsc::Sender<StreamMessageRequest>>,
}

impl StreamSender {
    pub(crate) fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            tx: ArcSwapOption::empty(),
        }
    }

    pub(crate) fn install(&self, tx: mpsc::Sender<StreamMessageRequest>) {
        self.tx.store(Some(Arc::new(tx)));
    }

    /// Drop the queue; the server sees the client half of the stream end.
    pub(crate) fn clear(&self) {
        self.tx.store(None);
    }

    /// Enqueue a frame without waiting.
    pub(crate) fn send(&self, frame: StreamMessageRequest) -> Result<(), CoreError> {
        let Some(tx) = self.tx.load_full() else {
            return Err(CoreError::SessionNotOpen {
                device_id: self.device_id.clone(),
            });
        };
        tx.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => CoreError::OutboundQueueFull {
                device_id: self.device_id.clone(),
            },
            TrySendError::Closed(_) => CoreError::SessionNotOpen {
                device_id: self.device_id.clone(),
            },
        })
    }
}

// ── StreamSession ────────────────────────────────────────────────────

pub(crate) struct StreamSession {
    device_id: DeviceId,
    config: ClientConfig,
    scope: Arc<SessionScope>,
    arbiter: Arc<MastershipArbiter>,
    outbound: Arc<StreamSender>,
    executor: RpcExecutor,
    classifier: ErrorClassifier,
    events: EventSink,
    pipeconfs: Arc<dyn PipeconfService>,
    open_lock: Mutex<()>,
}

impl StreamSession {
    pub(crate) fn new(
        device_id: DeviceId,
        p4_device_id: u64,
        stub: Arc<dyn P4RuntimeStub>,
        events: EventSink,
        pipeconfs: Arc<dyn PipeconfService>,
        config: ClientConfig,
    ) -> Self {
        let scope = Arc::new(SessionScope::new());
        let arbiter = Arc::new(MastershipArbiter::new(device_id.clone(), p4_device_id));
        let outbound = Arc::new(StreamSender::new(device_id.clone()));
        let executor = RpcExecutor::new(stub, Arc::clone(&scope));
        let classifier = ErrorClassifier::new(
            device_id.clone(),
            events.clone(),
            Arc::clone(&scope),
            Arc::clone(&arbiter),
            Arc::clone(&outbound),
        );
        Self {
            device_id,
            config,
            scope,
            arbiter,
            outbound,
            executor,
            classifier,
            events,
            pipeconfs,
            open_lock: Mutex::new(()),
        }
    }

    pub(crate) fn scope(&self) -> &Arc<SessionScope> {
        &self.scope
    }

    pub(crate) fn arbiter(&self) -> &Arc<MastershipArbiter> {
        &self.arbiter
    }

    pub(crate) fn executor(&self) -> &RpcExecutor {
        &self.executor
    }

    pub(crate) fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Open the stream channel. No-op when a session is already open.
    pub(crate) async fn open(&self) -> Result<(), CoreError> {
        let _guard = self.open_lock.lock().await;
        let Some((token, after_failure)) = self.scope.begin() else {
            debug!(device_id = %self.device_id, "stream session already open");
            return Ok(());
        };
        self.arbiter.clear_election_id();

        let (tx, rx) = mpsc::channel(self.config.outbound_queue_capacity.max(1));
        let outbound = ReceiverStream::new(rx).boxed();
        let inbound = match self
            .executor
            .execute_in(&token, OPEN_STREAM, Some(self.config.short_timeout), move |stub| {
                stub.stream_channel(outbound)
            })
            .await
        {
            Ok(inbound) => inbound,
            Err(failure) => {
                let err = self.classifier.report(failure, OPEN_STREAM);
                self.classifier.end_session(&token);
                return Err(err);
            }
        };

        if !self.scope.activate(&token, || self.outbound.install(tx)) {
            // Closed while the stream was being set up.
            return Err(CoreError::Cancelled {
                device_id: self.device_id.clone(),
                operation: OPEN_STREAM,
            });
        }

        info!(device_id = %self.device_id, reconnected = after_failure, "stream session open");
        let device_id = self.device_id.clone();
        self.events.post(if after_failure {
            P4RuntimeEvent::ChannelReconnected { device_id }
        } else {
            P4RuntimeEvent::ChannelOpen { device_id }
        });

        let inbound_loop = InboundLoop {
            device_id: self.device_id.clone(),
            arbiter: Arc::clone(&self.arbiter),
            classifier: self.classifier.clone(),
            events: self.events.clone(),
            pipeconfs: Arc::clone(&self.pipeconfs),
        };
        tokio::spawn(inbound_loop.run(inbound, token));
        Ok(())
    }

    /// Close the session, cancelling every in-flight call. Idempotent.
    pub(crate) fn close(&self) {
        let was_open = self.scope.close(|| {
            self.outbound.clear();
            self.arbiter.reset();
        });
        if was_open {
            info!(device_id = %self.device_id, "stream session closed");
            self.events.post(P4RuntimeEvent::ChannelClosed {
                device_id: self.device_id.clone(),
            });
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.scope.is_open()
    }

    pub(crate) fn run_for_mastership(&self, election_id: ElectionId) -> Result<(), CoreError> {
        self.arbiter.run_for_mastership(&self.outbound, election_id)
    }

    /// Send a packet through the device's CPU port. Fire-and-forget: a
    /// rejected packet comes back as a stream error event.
    pub(crate) fn packet_out(
        &self,
        packet: &OutboundPacket,
        pipeconf: &Pipeconf,
    ) -> Result<(), CoreError> {
        let frame = encode_packet_out(packet, pipeconf)?;
        self.outbound.send(StreamMessageRequest::Packet(frame))
    }
}

// ── Inbound processing ───────────────────────────────────────────────

struct InboundLoop {
    device_id: DeviceId,
    arbiter: Arc<MastershipArbiter>,
    classifier: ErrorClassifier,
    events: EventSink,
    pipeconfs: Arc<dyn PipeconfService>,
}

impl InboundLoop {
    async fn run(
        self,
        mut inbound: ResponseStream<StreamMessageResponse>,
        token: Arc<CancellationToken>,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!(device_id = %self.device_id, "stream loop cancelled");
                    return;
                }
                frame = inbound.next() => frame,
            };

            let status = match frame {
                Some(Ok(message)) => {
                    self.dispatch(message);
                    continue;
                }
                Some(Err(status)) => status,
                None => Status::unavailable("stream closed by server"),
            };
            self.classifier.report(
                RpcFailure::Status {
                    status,
                    scope: Arc::clone(&token),
                },
                STREAM_CHANNEL,
            );
            // Whatever the status, a dead stream ends the session.
            self.classifier.end_session(&token);
            return;
        }
    }

    fn dispatch(&self, message: StreamMessageResponse) {
        match message {
            StreamMessageResponse::Arbitration(update) => self.arbiter.handle_update(&update),
            StreamMessageResponse::Packet(packet) => self.packet_in(packet),
            StreamMessageResponse::Error(error) => {
                warn!(
                    device_id = %self.device_id,
                    code = ?error.canonical_code,
                    message = %error.message,
                    "stream error reported by device"
                );
                self.events.post(P4RuntimeEvent::StreamError {
                    device_id: self.device_id.clone(),
                    code: error.canonical_code,
                    message: error.message,
                });
            }
        }
    }

    fn packet_in(&self, packet: PacketIn) {
        let Some(pipeconf) = self.pipeconfs.device_pipeconf(&self.device_id) else {
            warn!(device_id = %self.device_id, "dropping packet-in: no pipeconf bound to device");
            return;
        };
        match decode_packet_in(packet, &pipeconf) {
            Ok(packet) => self.events.post(P4RuntimeEvent::PacketIn {
                device_id: self.device_id.clone(),
                packet,
            }),
            Err(err) => warn!(device_id = %self.device_id, error = %err, "dropping packet-in"),
        }
    }
}
