// ── Forwarding pipeline configuration ──
//
// Pushes a pipeconf to the device and checks whether the device already
// runs it. The check compares cookies: a value derived from the pipeconf
// fingerprint and the device data, stored by the server alongside the
// config it was pushed with.

use std::sync::Arc;

use bytes::Bytes;
use p4rt_api::proto::{
    ForwardingPipelineConfig, GetForwardingPipelineConfigRequest, PipelineResponseType,
    SetForwardingPipelineConfigRequest, SetPipelineAction,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::arbiter::MastershipArbiter;
use crate::classify::ErrorClassifier;
use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::executor::RpcExecutor;
use crate::model::{DeviceId, Pipeconf};

const SET_PIPELINE_CONFIG: &str = "set forwarding pipeline config";
const GET_PIPELINE_CONFIG: &str = "get forwarding pipeline config";

/// Cookie identifying `pipeconf` pushed with `device_data`.
///
/// The first eight bytes (big-endian) of
/// `SHA-256(fingerprint_be || device_data)`, so the same pipeconf and data
/// give the same cookie in every process.
pub fn pipeline_cookie(pipeconf: &Pipeconf, device_data: &[u8]) -> u64 {
    let digest = Sha256::new()
        .chain_update(pipeconf.fingerprint().to_be_bytes())
        .chain_update(device_data)
        .finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

#[derive(Clone)]
pub(crate) struct PipelineConfigClient {
    device_id: DeviceId,
    p4_device_id: u64,
    config: ClientConfig,
    executor: RpcExecutor,
    classifier: ErrorClassifier,
    arbiter: Arc<MastershipArbiter>,
}

impl PipelineConfigClient {
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

    /// Verify and commit `pipeconf` with `device_data` on the device.
    pub(crate) async fn set_pipeline_config(
        &self,
        pipeconf: &Pipeconf,
        device_data: Bytes,
    ) -> Result<(), CoreError> {
        let Some(p4info) = pipeconf.p4info().cloned() else {
            return Err(CoreError::InvalidPipeconf {
                pipeconf_id: pipeconf.id().clone(),
                reason: "pipeconf carries no P4Info".into(),
            });
        };
        let cookie = pipeline_cookie(pipeconf, &device_data);
        let request = SetForwardingPipelineConfigRequest {
            device_id: self.p4_device_id,
            election_id: self.arbiter.last_used_election_id().map(Into::into),
            action: SetPipelineAction::VerifyAndCommit,
            config: ForwardingPipelineConfig {
                p4info,
                p4_device_config: device_data,
                cookie: Some(cookie),
            },
        };

        info!(
            device_id = %self.device_id,
            pipeconf = %pipeconf.id(),
            cookie,
            "setting forwarding pipeline config"
        );
        self.executor
            .execute(SET_PIPELINE_CONFIG, Some(self.config.long_timeout), move |stub| {
                stub.set_forwarding_pipeline_config(request)
            })
            .await
            .map_err(|failure| self.classifier.report(failure, SET_PIPELINE_CONFIG))
    }

    /// Whether the device already runs `pipeconf` with `device_data`.
    pub(crate) async fn is_pipeline_config_set(
        &self,
        pipeconf: &Pipeconf,
        device_data: &[u8],
    ) -> Result<bool, CoreError> {
        let expected = pipeline_cookie(pipeconf, device_data);
        let Some(current) = self.get(PipelineResponseType::CookieOnly).await? else {
            debug!(device_id = %self.device_id, "no pipeline config set on device");
            return Ok(false);
        };
        if let Some(cookie) = current.cookie {
            debug!(device_id = %self.device_id, cookie, expected, "comparing pipeline cookies");
            return Ok(cookie == expected);
        }

        // Some agents do not keep cookies: compare the full config.
        debug!(device_id = %self.device_id, "device reports no cookie, comparing full config");
        let Some(p4info) = pipeconf.p4info() else {
            return Ok(false);
        };
        let Some(current) = self.get(PipelineResponseType::All).await? else {
            return Ok(false);
        };
        Ok(current.p4info == *p4info && current.p4_device_config == device_data)
    }

    async fn get(
        &self,
        response_type: PipelineResponseType,
    ) -> Result<Option<ForwardingPipelineConfig>, CoreError> {
        let request = GetForwardingPipelineConfigRequest {
            device_id: self.p4_device_id,
            response_type,
        };
        let response = self
            .executor
            .execute(GET_PIPELINE_CONFIG, Some(self.config.short_timeout), move |stub| {
                stub.get_forwarding_pipeline_config(request)
            })
            .await
            .map_err(|failure| self.classifier.report(failure, GET_PIPELINE_CONFIG))?;
        Ok(response.config)
    }
}
