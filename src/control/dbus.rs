// SPDX-License-Identifier: GPL-3.0-only

//! `org.camfx.Control1` on the session bus
//!
//! The interface is a thin adapter over [`ControlService`]: it converts
//! `a{sv}` dictionaries to effect configurations, maps errors to D-Bus
//! errors and forwards [`ControlSignal`]s as D-Bus signals.

use super::{ControlService, ControlSignal};
use crate::constants::dbus;
use crate::effects::{EffectConfig, ParamValue};
use crate::errors::{AppResult, ControlError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::fdo;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::{OwnedValue, Value};

/// Effect configuration as sent over D-Bus
pub type ConfigDict = HashMap<String, OwnedValue>;

impl From<ControlError> for fdo::Error {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::InvalidConfig { .. }
            | ControlError::UnknownEffectType(_)
            | ControlError::IndexOutOfRange { .. }
            | ControlError::EffectNotFound(_) => fdo::Error::InvalidArgs(err.to_string()),
            ControlError::DeviceUnavailable(_) | ControlError::ShuttingDown => {
                fdo::Error::Failed(err.to_string())
            }
        }
    }
}

/// Convert one variant to a parameter value
pub fn param_from_value(name: &str, value: &Value<'_>) -> Result<ParamValue, ControlError> {
    let int = |v: i64| Ok(ParamValue::Int(v));
    match value {
        Value::Bool(b) => Ok(ParamValue::Bool(*b)),
        Value::U8(v) => int(*v as i64),
        Value::I16(v) => int(*v as i64),
        Value::U16(v) => int(*v as i64),
        Value::I32(v) => int(*v as i64),
        Value::U32(v) => int(*v as i64),
        Value::I64(v) => int(*v),
        Value::U64(v) => i64::try_from(*v)
            .map(ParamValue::Int)
            .map_err(|_| ControlError::invalid("config", format!("'{}' is too large", name))),
        Value::F64(v) => Ok(ParamValue::Float(*v)),
        Value::Str(s) => Ok(ParamValue::Str(s.as_str().to_string())),
        Value::Value(inner) => param_from_value(name, inner),
        other => Err(ControlError::invalid(
            "config",
            format!(
                "'{}' has unsupported type '{}'",
                name,
                other.value_signature()
            ),
        )),
    }
}

pub fn config_from_dict(dict: &ConfigDict) -> Result<EffectConfig, ControlError> {
    dict.iter()
        .map(|(name, value)| Ok((name.clone(), param_from_value(name, value)?)))
        .collect()
}

pub fn value_from_param(value: &ParamValue) -> zbus::zvariant::Result<OwnedValue> {
    let value = match value {
        ParamValue::Bool(b) => Value::from(*b),
        ParamValue::Int(i) => Value::from(*i),
        ParamValue::Float(f) => Value::from(*f),
        ParamValue::Str(s) => Value::from(s.clone()),
    };
    OwnedValue::try_from(value)
}

pub fn dict_from_config(config: &EffectConfig) -> zbus::zvariant::Result<ConfigDict> {
    config
        .iter()
        .map(|(name, value)| Ok((name.clone(), value_from_param(value)?)))
        .collect()
}

fn encode_failed(err: zbus::zvariant::Error) -> fdo::Error {
    fdo::Error::Failed(format!("Failed to encode configuration: {}", err))
}

/// Object served at `/org/camfx/Control1`
pub struct ControlInterface {
    service: Arc<ControlService>,
}

impl ControlInterface {
    pub fn new(service: Arc<ControlService>) -> Self {
        Self { service }
    }
}

#[zbus::interface(name = "org.camfx.Control1")]
impl ControlInterface {
    /// Replace the whole chain with one effect
    async fn set_effect(&self, effect_type: String, config: ConfigDict) -> fdo::Result<()> {
        let config = config_from_dict(&config)?;
        self.service.set_effect(&effect_type, config)?;
        Ok(())
    }

    /// Update the effect in place or append it; returns "add" or "update"
    async fn add_or_update_effect(
        &self,
        effect_type: String,
        config: ConfigDict,
    ) -> fdo::Result<String> {
        let config = config_from_dict(&config)?;
        let action = self.service.add_or_update_effect(&effect_type, config)?;
        Ok(action.as_str().to_string())
    }

    async fn remove_effect(&self, index: i32) -> fdo::Result<()> {
        self.service.remove_effect(index as i64)?;
        Ok(())
    }

    /// Returns whether an entry was removed
    async fn remove_effect_by_type(&self, effect_type: String) -> fdo::Result<bool> {
        Ok(self.service.remove_effect_by_type(&effect_type)?)
    }

    async fn clear_chain(&self) -> fdo::Result<()> {
        self.service.clear_chain()?;
        Ok(())
    }

    /// Ordered list of (type, config)
    async fn get_effects(&self) -> fdo::Result<Vec<(String, ConfigDict)>> {
        self.service
            .get_effects()
            .into_iter()
            .map(|(kind, config)| {
                let dict = dict_from_config(&config).map_err(encode_failed)?;
                Ok((kind.as_str().to_string(), dict))
            })
            .collect()
    }

    async fn update_effect_parameter(
        &self,
        effect_type: String,
        parameter: String,
        value: OwnedValue,
    ) -> fdo::Result<()> {
        let value = param_from_value(&parameter, &value)?;
        self.service
            .update_effect_parameter(&effect_type, &parameter, value)?;
        Ok(())
    }

    /// Opening the device can take seconds, so it runs off the executor
    async fn start_camera(&self) -> fdo::Result<()> {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || service.start_camera())
            .await
            .map_err(|e| fdo::Error::Failed(format!("Camera start task failed: {}", e)))??;
        Ok(())
    }

    async fn stop_camera(&self) -> fdo::Result<()> {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || service.stop_camera())
            .await
            .map_err(|e| fdo::Error::Failed(format!("Camera stop task failed: {}", e)))??;
        Ok(())
    }

    /// One of "closed", "open", "error", "degraded"
    async fn get_camera_status(&self) -> String {
        self.service.camera_status().as_str().to_string()
    }

    #[zbus(property)]
    async fn monitor_degraded(&self) -> bool {
        self.service.monitor_degraded()
    }

    #[zbus(property)]
    async fn consumer_count(&self) -> u32 {
        self.service.consumer_count() as u32
    }

    /// Reason for the "error" status, empty otherwise
    #[zbus(property)]
    async fn camera_error(&self) -> String {
        self.service.camera_error()
    }

    #[zbus(signal)]
    async fn effect_chain_changed(
        emitter: &SignalEmitter<'_>,
        action: &str,
        effect_type: &str,
        config: ConfigDict,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn camera_state_changed(emitter: &SignalEmitter<'_>, is_active: bool) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn pipeline_stopped(emitter: &SignalEmitter<'_>, reason: &str) -> zbus::Result<()>;
}

async fn emit_signal(emitter: &SignalEmitter<'_>, signal: &ControlSignal) -> zbus::Result<()> {
    match signal {
        ControlSignal::EffectChainChanged {
            action,
            effect,
            config,
        } => {
            let dict = dict_from_config(config)?;
            let effect_type = effect.map(|k| k.as_str()).unwrap_or("");
            ControlInterface::effect_chain_changed(emitter, action.as_str(), effect_type, dict)
                .await
        }
        ControlSignal::CameraStateChanged(active) => {
            ControlInterface::camera_state_changed(emitter, *active).await
        }
        ControlSignal::PipelineStopped(reason) => {
            ControlInterface::pipeline_stopped(emitter, reason).await
        }
    }
}

/// The bus connection plus the task forwarding signals onto it
pub struct DbusServer {
    /// Owns the bus name until dropped
    _connection: zbus::Connection,
    forwarder: JoinHandle<()>,
}

impl Drop for DbusServer {
    fn drop(&mut self) {
        debug!("Stopping D-Bus signal forwarder");
        self.forwarder.abort();
    }
}

/// Claim `org.camfx.Control1` and serve the control interface
pub async fn serve(service: Arc<ControlService>) -> AppResult<DbusServer> {
    let mut signals = service.signals().subscribe();
    let connection = zbus::connection::Builder::session()?
        .name(dbus::SERVICE_NAME)?
        .serve_at(dbus::OBJECT_PATH, ControlInterface::new(Arc::clone(&service)))?
        .build()
        .await?;

    info!(name = dbus::SERVICE_NAME, path = dbus::OBJECT_PATH, "D-Bus control service ready");

    let emitter = SignalEmitter::new(&connection, dbus::OBJECT_PATH)?.into_owned();
    let forwarder = tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(signal) => {
                    if let Err(e) = emit_signal(&emitter, &signal).await {
                        warn!(error = %e, ?signal, "Failed to emit D-Bus signal");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "D-Bus signal forwarder lagged, signals dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("D-Bus signal forwarder finished");
    });

    Ok(DbusServer {
        _connection: connection,
        forwarder,
    })
}

/// Client side of `org.camfx.Control1`, used by the CLI
#[zbus::proxy(
    interface = "org.camfx.Control1",
    default_service = "org.camfx.Control1",
    default_path = "/org/camfx/Control1",
    gen_blocking = false
)]
pub trait Control {
    fn set_effect(&self, effect_type: &str, config: ConfigDict) -> zbus::Result<()>;

    fn add_or_update_effect(&self, effect_type: &str, config: ConfigDict) -> zbus::Result<String>;

    fn remove_effect(&self, index: i32) -> zbus::Result<()>;

    fn remove_effect_by_type(&self, effect_type: &str) -> zbus::Result<bool>;

    fn clear_chain(&self) -> zbus::Result<()>;

    fn get_effects(&self) -> zbus::Result<Vec<(String, ConfigDict)>>;

    fn update_effect_parameter(
        &self,
        effect_type: &str,
        parameter: &str,
        value: OwnedValue,
    ) -> zbus::Result<()>;

    fn start_camera(&self) -> zbus::Result<()>;

    fn stop_camera(&self) -> zbus::Result<()>;

    fn get_camera_status(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn monitor_degraded(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn consumer_count(&self) -> zbus::Result<u32>;

    #[zbus(property)]
    fn camera_error(&self) -> zbus::Result<String>;
}
