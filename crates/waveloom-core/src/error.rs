// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error taxonomy, one enum per subsystem, matching spec §7 one-for-one.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginLoadError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("plugin not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to load library {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol missing: {0}")]
    SymbolMissing(String),

    #[error(
        "incompatible api version: plugin {plugin_major}.{plugin_minor}, host {host_major}.{host_minor}"
    )]
    IncompatibleApiVersion {
        plugin_major: u32,
        plugin_minor: u32,
        host_major: u32,
        host_minor: u32,
    },

    #[error("plugin start failed: {0}")]
    StartFailed(String),

    #[error("plugin stop failed: {0}")]
    StopFailed(String),

    #[error("plugin file or its directory is world-writable: {0}")]
    UnsafePermissions(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decoder init failed: {0}")]
    InitFailed(String),

    #[error("seek failed: {0}")]
    SeekFailed(String),

    #[error("decoder I/O error: {0}")]
    Io(String),
}

impl From<waveloom_plugin_api::DecodeError> for DecodeError {
    fn from(e: waveloom_plugin_api::DecodeError) -> Self {
        match e {
            waveloom_plugin_api::DecodeError::InitFailed(m) => DecodeError::InitFailed(m.into()),
            waveloom_plugin_api::DecodeError::SeekFailed(m) => DecodeError::SeekFailed(m.into()),
            waveloom_plugin_api::DecodeError::Io(m) => DecodeError::Io(m.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkDeviceError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("queue creation failed: {0}")]
    QueueCreationFailed(String),

    #[error("enqueue failed: {0}")]
    EnqueueFailed(String),
}

impl From<waveloom_plugin_api::SinkDeviceError> for SinkDeviceError {
    fn from(e: waveloom_plugin_api::SinkDeviceError) -> Self {
        match e {
            waveloom_plugin_api::SinkDeviceError::DeviceUnavailable(m) => {
                SinkDeviceError::DeviceUnavailable(m.into())
            }
            waveloom_plugin_api::SinkDeviceError::QueueCreationFailed(m) => {
                SinkDeviceError::QueueCreationFailed(m.into())
            }
            waveloom_plugin_api::SinkDeviceError::EnqueueFailed(m) => {
                SinkDeviceError::EnqueueFailed(m.into())
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("subscriber table full for this event kind")]
    SubscriberTableFull,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("message queue full, command dropped")]
    MessageQueueFull,
}
