// ── Forwarding state I/O ──
//
// Read and Write RPCs, exposed as builders resolved against a pipeconf.
// Reads stream entities back as they arrive; writes report one outcome per
// update instead of failing as a whole when some updates are rejected.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use p4rt_api::proto::{self, Atomicity, Entity, EntityKind, Update, UpdateType};
use tracing::debug;

use crate::arbiter::MastershipArbiter;
use crate::classify::ErrorClassifier;
use crate::config::ClientConfig;
use crate::error::{ApplicationError, CoreError};
use crate::executor::{RpcExecutor, RpcFailure};
use crate::model::{DeviceId, Pipeconf};

const READ: &str = "read";
const WRITE: &str = "write";

#[derive(Clone)]
pub(crate) struct TableIoClient {
    device_id: DeviceId,
    p4_device_id: u64,
    config: ClientConfig,
    executor: RpcExecutor,
    classifier: ErrorClassifier,
    arbiter: Arc<MastershipArbiter>,
}

impl TableIoClient {
    pub(crate) fn new(
        device_id: DeviceId,
        p4_device_id: u64,
        config: ClientConfig,
        executor: RpcExecutor,
        classifier: ErrorClassifier,
        arbiter: Arc<MastershipArbiter>,
    ) -> Self {
        Self {
            device_id,
            p4_device_id,
            config,
            executor,
            classifier,
            arbiter,
        }
    }

    pub(crate) fn read<'p>(&self, pipeconf: &'p Pipeconf) -> ReadRequest<'p> {
        ReadRequest {
            client: self.clone(),
            pipeconf,
            entities: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn write<'p>(&self, pipeconf: &'p Pipeconf) -> WriteRequest<'p> {
        WriteRequest {
            client: self.clone(),
            pipeconf,
            updates: Vec::new(),
            atomicity: Atomicity::default(),
            error: None,
        }
    }
}

fn unknown_table(pipeconf: &Pipeconf, table: &str) -> CoreError {
    CoreError::UnknownTable {
        pipeconf_id: pipeconf.id().clone(),
        table: table.to_owned(),
    }
}

// ── Read ─────────────────────────────────────────────────────────────

/// Builder for one Read RPC. Name resolution errors surface on `submit`.
#[must_use = "a read request does nothing until submitted"]
pub struct ReadRequest<'p> {
    client: TableIoClient,
    pipeconf: &'p Pipeconf,
    entities: Vec<Entity>,
    error: Option<CoreError>,
}

impl ReadRequest<'_> {
    /// Add a query entity as-is.
    pub fn entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn entities(mut self, entities: impl IntoIterator<Item = Entity>) -> Self {
        self.entities.extend(entities);
        self
    }

    /// Every entry of the named table.
    pub fn table_entries(mut self, table: &str) -> Self {
        match self.pipeconf.table_id(table) {
            Some(id) => self
                .entities
                .push(Entity::wildcard(EntityKind::TableEntry, id)),
            None => {
                self.error
                    .get_or_insert_with(|| unknown_table(self.pipeconf, table));
            }
        }
        self
    }

    /// Every entity of `kind`, across all objects.
    pub fn all(mut self, kind: EntityKind) -> Self {
        self.entities.push(Entity::wildcard(kind, 0));
        self
    }

    /// Start the read. The response streams entities until the server is
    /// done; it has no deadline but ends with `Cancelled` if the session
    /// closes first.
    pub async fn submit(self) -> Result<ReadResponse, CoreError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let client = self.client;
        let token = client
            .executor
            .cancellation()
            .map_err(|failure| client.classifier.report(failure, READ))?;
        if self.entities.is_empty() {
            return Ok(ReadResponse::empty());
        }

        let request = proto::ReadRequest {
            device_id: client.p4_device_id,
            entities: self.entities,
        };
        debug!(device_id = %client.device_id, queries = request.entities.len(), "reading entities");
        let mut chunks = client
            .executor
            .execute(READ, Some(client.config.short_timeout), move |stub| {
                stub.read(request)
            })
            .await
            .map_err(|failure| client.classifier.report(failure, READ))?;

        let classifier = client.classifier;
        let stream = async_stream::stream! {
            loop {
                // `None`: the session closed under us.
                let next = tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    chunk = chunks.next() => Some(chunk),
                };
                match next {
                    None => {
                        yield Err(classifier.report(RpcFailure::Cancelled, READ));
                        break;
                    }
                    Some(None) => break,
                    Some(Some(Ok(chunk))) => {
                        for entity in chunk.entities {
                            yield Ok(entity);
                        }
                    }
                    Some(Some(Err(status))) => {
                        let scope = Arc::clone(&token);
                        yield Err(classifier.report(RpcFailure::Status { status, scope }, READ));
                        break;
                    }
                }
            }
        };
        Ok(ReadResponse {
            inner: stream.boxed(),
        })
    }
}

/// Entities returned by a read, in server order. Ends after the first
/// error.
pub struct ReadResponse {
    inner: BoxStream<'static, Result<Entity, CoreError>>,
}

impl ReadResponse {
    fn empty() -> Self {
        Self {
            inner: futures_util::stream::empty().boxed(),
        }
    }

    /// Drain the stream.
    pub async fn collect_all(self) -> Result<Vec<Entity>, CoreError> {
        self.try_collect().await
    }
}

impl Stream for ReadResponse {
    type Item = Result<Entity, CoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

// ── Write ────────────────────────────────────────────────────────────

/// Builder for one Write RPC, sent with the last used election id.
#[must_use = "a write request does nothing until submitted"]
pub struct WriteRequest<'p> {
    client: TableIoClient,
    pipeconf: &'p Pipeconf,
    updates: Vec<Update>,
    atomicity: Atomicity,
    error: Option<CoreError>,
}

impl WriteRequest<'_> {
    pub fn insert(self, entity: Entity) -> Self {
        self.update(UpdateType::Insert, entity)
    }

    pub fn modify(self, entity: Entity) -> Self {
        self.update(UpdateType::Modify, entity)
    }

    pub fn delete(self, entity: Entity) -> Self {
        self.update(UpdateType::Delete, entity)
    }

    pub fn update(mut self, update_type: UpdateType, entity: Entity) -> Self {
        self.updates.push(Update {
            update_type,
            entity,
        });
        self
    }

    /// Apply the same update type to many entities.
    pub fn entities(
        mut self,
        update_type: UpdateType,
        entities: impl IntoIterator<Item = Entity>,
    ) -> Self {
        self.updates
            .extend(entities.into_iter().map(|entity| Update {
                update_type,
                entity,
            }));
        self
    }

    /// A table entry addressed by table name.
    pub fn table_entry(
        mut self,
        update_type: UpdateType,
        table: &str,
        key: impl Into<Bytes>,
        data: impl Into<Bytes>,
    ) -> Self {
        match self.pipeconf.table_id(table) {
            Some(id) => self.update(
                update_type,
                Entity::new(EntityKind::TableEntry, id, key, data),
            ),
            None => {
                self.error
                    .get_or_insert_with(|| unknown_table(self.pipeconf, table));
                self
            }
        }
    }

    pub fn atomicity(mut self, atomicity: Atomicity) -> Self {
        self.atomicity = atomicity;
        self
    }

    pub async fn submit(self) -> Result<WriteResponse, CoreError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let client = self.client;
        client
            .executor
            .cancellation()
            .map_err(|failure| client.classifier.report(failure, WRITE))?;
        if self.updates.is_empty() {
            return Ok(WriteResponse {
                results: Vec::new(),
            });
        }

        let request = proto::WriteRequest {
            device_id: client.p4_device_id,
            election_id: client.arbiter.last_used_election_id().map(Into::into),
            updates: self.updates.clone(),
            atomicity: self.atomicity,
        };
        debug!(
            device_id = %client.device_id,
            updates = request.updates.len(),
            atomicity = %request.atomicity,
            "writing entities"
        );
        let response = client
            .executor
            .execute(WRITE, Some(client.config.short_timeout), move |stub| {
                stub.write(request)
            })
            .await
            .map_err(|failure| client.classifier.report(failure, WRITE))?;

        if response.statuses.is_empty() {
            let results = self
                .updates
                .into_iter()
                .map(|update| UpdateResult {
                    update,
                    outcome: Ok(()),
                })
                .collect();
            return Ok(WriteResponse { results });
        }
        if response.statuses.len() != self.updates.len() {
            return Err(client.classifier.protocol_violation(format!(
                "write of {} updates answered with {} statuses",
                self.updates.len(),
                response.statuses.len()
            )));
        }

        let results: Vec<UpdateResult> = self
            .updates
            .into_iter()
            .zip(response.statuses)
            .map(|(update, status)| UpdateResult {
                update,
                outcome: if status.is_ok() {
                    Ok(())
                } else {
                    Err(ApplicationError {
                        code: status.code,
                        message: status.message,
                    })
                },
            })
            .collect();
        debug!(
            device_id = %client.device_id,
            failed = results.iter().filter(|r| !r.is_success()).count(),
            total = results.len(),
            "write completed"
        );
        Ok(WriteResponse { results })
    }
}

/// Outcome of one update of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub update: Update,
    pub outcome: Result<(), ApplicationError>,
}

impl UpdateResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Per-update results of a write, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse {
    results: Vec<UpdateResult>,
}

impl WriteResponse {
    /// Whether every update was applied.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(UpdateResult::is_success)
    }

    pub fn results(&self) -> &[UpdateResult] {
        &self.results
    }

    pub fn successes(&self) -> impl Iterator<Item = &UpdateResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &UpdateResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn into_results(self) -> Vec<UpdateResult> {
        self.results
    }
}
