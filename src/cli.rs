// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Listing capture devices
//! - Editing the effect chain of a running daemon
//! - Starting, stopping and querying the camera

use camfx::backends::camera::list_devices;
use camfx::control::dbus::{ConfigDict, ControlProxy, dict_from_config, value_from_param};
use camfx::effects::{EffectConfig, ParamValue};
use clap::Args;
use std::future::Future;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Effect parameters accepted by the effect commands
#[derive(Args, Debug, Default)]
pub struct EffectArgs {
    /// Blur strength (odd, 1-99) or gaze correction strength (0-1)
    #[arg(long)]
    pub strength: Option<String>,

    /// Brightness offset (-100 to 100)
    #[arg(long, allow_hyphen_values = true)]
    pub brightness: Option<i64>,

    /// Contrast factor (0.5 to 2.0)
    #[arg(long)]
    pub contrast: Option<f64>,

    /// Only adjust the foreground
    #[arg(long)]
    pub face_only: bool,

    /// Beautify smoothing radius (1-15)
    #[arg(long)]
    pub smoothness: Option<i64>,

    /// Autoframe padding around the subject (0-1)
    #[arg(long)]
    pub padding: Option<f64>,

    /// Autoframe minimum zoom (1-4)
    #[arg(long)]
    pub min_zoom: Option<f64>,

    /// Autoframe maximum zoom (1-4)
    #[arg(long)]
    pub max_zoom: Option<f64>,

    /// Background image for replace
    #[arg(long)]
    pub background: Option<String>,

    /// Background color for replace (#RRGGBB)
    #[arg(long)]
    pub color: Option<String>,
}

impl EffectArgs {
    /// Only flags that were given end up in the configuration
    pub fn to_config(&self) -> EffectConfig {
        let mut config = EffectConfig::new();
        let mut set = |name: &str, value: ParamValue| {
            config.insert(name.to_string(), value);
        };

        if let Some(strength) = &self.strength {
            let Ok(value) = strength.parse::<ParamValue>();
            set("strength", value);
        }
        if let Some(v) = self.brightness {
            set("brightness", v.into());
        }
        if let Some(v) = self.contrast {
            set("contrast", v.into());
        }
        if self.face_only {
            set("face_only", true.into());
        }
        if let Some(v) = self.smoothness {
            set("smoothness", v.into());
        }
        if let Some(v) = self.padding {
            set("padding", v.into());
        }
        if let Some(v) = self.min_zoom {
            set("min_zoom", v.into());
        }
        if let Some(v) = self.max_zoom {
            set("max_zoom", v.into());
        }
        if let Some(v) = &self.background {
            set("background", ParamValue::Str(v.clone()));
        }
        if let Some(v) = &self.color {
            set("color", ParamValue::Str(v.clone()));
        }
        config
    }

    fn to_dict(&self) -> Result<ConfigDict, Box<dyn std::error::Error>> {
        Ok(dict_from_config(&self.to_config())?)
    }
}

/// Run a client call against the daemon on the session bus
fn with_proxy<F, Fut>(call: F) -> CliResult
where
    F: FnOnce(ControlProxy<'static>) -> Fut,
    Fut: Future<Output = CliResult>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let connection = zbus::Connection::session().await?;
        let proxy = ControlProxy::new(&connection).await?;
        call(proxy).await
    })
}

/// List V4L2 capture devices
pub fn list_devices_cmd() -> CliResult {
    let devices = list_devices();

    if devices.is_empty() {
        println!("No video devices found.");
        return Ok(());
    }

    println!("Available video devices:");
    println!();
    for device in &devices {
        let capture = if device.can_capture { "" } else { " (no capture)" };
        println!("  [{}] {}{}", device.index, device.name, capture);
        println!("      Path: {}", device.path);
        if !device.driver.is_empty() {
            println!("      Driver: {}", device.driver);
        }
    }
    println!();
    println!("Use 'camfx start --input N' to select a device.");

    Ok(())
}

pub fn set_effect(effect: String, args: &EffectArgs) -> CliResult {
    let config = args.to_dict()?;
    with_proxy(|proxy| async move {
        proxy.set_effect(&effect, config).await?;
        println!("Effect chain set to '{}'", effect);
        Ok(())
    })
}

pub fn add_effect(effect: String, args: &EffectArgs) -> CliResult {
    let config = args.to_dict()?;
    with_proxy(|proxy| async move {
        let action = proxy.add_or_update_effect(&effect, config).await?;
        match action.as_str() {
            "update" => println!("Updated '{}'", effect),
            _ => println!("Added '{}'", effect),
        }
        Ok(())
    })
}

pub fn remove_effect(index: Option<i32>, effect: Option<String>) -> CliResult {
    with_proxy(|proxy| async move {
        match (index, effect) {
            (Some(index), _) => {
                proxy.remove_effect(index).await?;
                println!("Removed effect at index {}", index);
            }
            (None, Some(effect)) => {
                if proxy.remove_effect_by_type(&effect).await? {
                    println!("Removed '{}'", effect);
                } else {
                    println!("'{}' is not in the chain", effect);
                }
            }
            (None, None) => return Err("either --index or --effect is required".into()),
        }
        Ok(())
    })
}

pub fn update_parameter(effect: String, parameter: String, value: String) -> CliResult {
    let Ok(value) = value.parse::<ParamValue>();
    let value = value_from_param(&value)?;
    with_proxy(|proxy| async move {
        proxy
            .update_effect_parameter(&effect, &parameter, value)
            .await?;
        println!("Updated {}.{}", effect, parameter);
        Ok(())
    })
}

pub fn get_effects() -> CliResult {
    with_proxy(|proxy| async move {
        let effects = proxy.get_effects().await?;
        if effects.is_empty() {
            println!("Effect chain is empty.");
            return Ok(());
        }
        for (index, (effect, config)) in effects.iter().enumerate() {
            let mut params: Vec<String> = config
                .iter()
                .map(|(name, value)| format!("{}={}", name, format_value(value)))
                .collect();
            params.sort();
            println!("  [{}] {} {}", index, effect, params.join(" "));
        }
        Ok(())
    })
}

fn format_value(value: &zbus::zvariant::OwnedValue) -> String {
    match camfx::control::dbus::param_from_value("", value) {
        Ok(param) => param.to_string(),
        Err(_) => format!("{:?}", value),
    }
}

pub fn camera_start() -> CliResult {
    with_proxy(|proxy| async move {
        proxy.start_camera().await?;
        println!("Camera started");
        Ok(())
    })
}

pub fn camera_stop() -> CliResult {
    with_proxy(|proxy| async move {
        proxy.stop_camera().await?;
        println!("Camera stopped");
        Ok(())
    })
}

pub fn camera_status() -> CliResult {
    with_proxy(|proxy| async move {
        let status = proxy.get_camera_status().await?;
        println!("Camera: {}", status);
        let reason = proxy.camera_error().await?;
        if !reason.is_empty() {
            println!("Last error: {}", reason);
        }
        if proxy.monitor_degraded().await? {
            println!("Consumer monitoring unavailable; use 'camfx camera-start'.");
        } else {
            println!("Consumers: {}", proxy.consumer_count().await?);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_given_flags_are_sent() {
        let args = EffectArgs {
            strength: Some("31".into()),
            face_only: true,
            ..EffectArgs::default()
        };
        let config = args.to_config();
        assert_eq!(config.len(), 2);
        assert_eq!(config.get("strength"), Some(&ParamValue::Int(31)));
        assert_eq!(config.get("face_only"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn test_fractional_strength_is_float() {
        let args = EffectArgs {
            strength: Some("0.75".into()),
            ..EffectArgs::default()
        };
        assert_eq!(
            args.to_config().get("strength"),
            Some(&ParamValue::Float(0.75))
        );
    }
}
