// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plugin discovery, dynamic loading, and lifecycle (spec §4.1).
//!
//! Decoders and output sinks are kept in separate tables rather than one
//! tagged-union `Vec`: the streamer shares only the decoder table across
//! its decode thread (`Arc<RwLock<DecoderTable>>`, auto-`Sync` since
//! `DecoderPlugin`/`DecoderInstance` are `Send + Sync`/`Send`), while
//! output sinks — not required to be `Sync`, matching real device
//! handles like `cpal::Stream` — stay single-owner inside the sink
//! controller's own mutex. Folding both kinds into one `Vec` would force
//! the whole table to be `Sync`, which an `OutputSinkPlugin` can't promise.

use crate::error::PluginLoadError;
use libloading::{Library, Symbol};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use waveloom_plugin_api::{
    DecoderPluginBox, HostFunctions, LoadFn, OutputSinkPluginBox, PluginEntry, PluginKind,
    API_VERSION_MAJOR, API_VERSION_MINOR,
};

#[cfg(unix)]
const DYLIB_SUFFIX: &str = "so";
#[cfg(target_os = "macos")]
const DYLIB_SUFFIX: &str = "dylib";
#[cfg(windows)]
const DYLIB_SUFFIX: &str = "dll";

/// A loaded decoder module: {handle to dynamic module or null for
/// built-ins, typed descriptor, active flag}.
pub struct DecoderRecord {
    pub id: String,
    pub path: Option<PathBuf>,
    /// A plugin with start-failure is marked inactive and never receives events.
    pub active: bool,
    plugin: DecoderPluginBox,
    // Kept alive only for dynamically loaded plugins; dropping it unloads the module.
    _library: Option<Library>,
}

impl DecoderRecord {
    pub fn plugin(&self) -> &DecoderPluginBox {
        &self.plugin
    }
}

/// A loaded output-sink module, mirroring `DecoderRecord`.
pub struct OutputRecord {
    pub id: String,
    pub path: Option<PathBuf>,
    pub active: bool,
    plugin: OutputSinkPluginBox,
    _library: Option<Library>,
}

impl OutputRecord {
    pub fn plugin(&self) -> &OutputSinkPluginBox {
        &self.plugin
    }

    /// Takes ownership of the plugin, e.g. to hand it to `SinkController`.
    pub fn into_plugin(self) -> OutputSinkPluginBox {
        self.plugin
    }
}

/// Decoder records shared with the streamer's decode thread.
#[derive(Default)]
pub struct DecoderTable {
    records: Vec<DecoderRecord>,
}

impl DecoderTable {
    pub fn active(&self) -> impl Iterator<Item = &DecoderRecord> {
        self.records.iter().filter(|r| r.active)
    }

    pub fn by_id(&self, id: &str) -> Option<&DecoderRecord> {
        self.active().find(|r| r.id == id)
    }

    pub fn for_extension(&self, ext: &str) -> Option<&DecoderRecord> {
        let ext_lower = ext.to_ascii_lowercase();
        self.active().find(|r| {
            r.plugin()
                .extensions()
                .iter()
                .any(|e| e.as_str().eq_ignore_ascii_case(&ext_lower))
        })
    }

    pub fn all(&self) -> &[DecoderRecord] {
        &self.records
    }
}

/// Rejects plugin files (or parent directories) that are world-writable.
/// Not named in spec.md, recovered as ambient hardening from the teacher's
/// `check_plugin_permissions` (see DESIGN.md).
#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<(), PluginLoadError> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path)?;
    if meta.permissions().mode() & 0o002 != 0 {
        return Err(PluginLoadError::UnsafePermissions(path.to_path_buf()));
    }
    if let Some(parent) = path.parent() {
        if let Ok(parent_meta) = std::fs::metadata(parent) {
            if parent_meta.permissions().mode() & 0o002 != 0 {
                return Err(PluginLoadError::UnsafePermissions(parent.to_path_buf()));
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<(), PluginLoadError> {
    Ok(())
}

/// A built-in module, initialised identically to a dynamically loaded one
/// but with a null module handle — supplied by the embedder at registry
/// construction time rather than discovered from disk.
pub enum BuiltinPlugin {
    Decoder(DecoderPluginBox),
    Output(OutputSinkPluginBox),
}

enum Loaded {
    Decoder(DecoderPluginBox),
    Output(OutputSinkPluginBox),
}

pub struct PluginRegistry {
    decoders: Arc<RwLock<DecoderTable>>,
    outputs: Vec<OutputRecord>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            decoders: Arc::new(RwLock::new(DecoderTable::default())),
            outputs: Vec::new(),
        }
    }

    /// A cloneable handle to the decoder table, shared with the streamer's
    /// decode thread.
    pub fn decoder_table(&self) -> Arc<RwLock<DecoderTable>> {
        self.decoders.clone()
    }

    /// Enumerates `directory` in lexicographic order, skipping hidden
    /// files and non-module suffixes, loading and starting each plugin it
    /// finds. `host` is the function table passed to each module's
    /// `<stem>_load` symbol (spec §4.1). Individual failures are logged
    /// and skipped; discovery as a whole always succeeds.
    pub fn discover(&mut self, directory: &Path, host: &HostFunctions) -> Result<(), PluginLoadError> {
        if !directory.is_dir() {
            return Err(PluginLoadError::NotADirectory(directory.to_path_buf()));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(directory)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                let is_hidden = p
                    .file_name()
                    .and_then(OsStr::to_str)
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
                let matches_suffix = p.extension().and_then(OsStr::to_str) == Some(DYLIB_SUFFIX);
                !is_hidden && matches_suffix
            })
            .collect();
        paths.sort();

        for path in paths {
            match self.load_one(&path, host) {
                Ok(()) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping plugin"),
            }
        }
        Ok(())
    }

    /// Registers a built-in module with a null handle, applying the same
    /// start-failure-marks-inactive rule as dynamic loading.
    pub fn register_builtin(&mut self, id: impl Into<String>, plugin: BuiltinPlugin) {
        let id = id.into();
        match plugin {
            BuiltinPlugin::Decoder(mut plugin) => {
                let active = start_decoder(&mut plugin).is_ok();
                self.decoders.write().records.push(DecoderRecord {
                    id,
                    path: None,
                    active,
                    plugin,
                    _library: None,
                });
            }
            BuiltinPlugin::Output(mut plugin) => {
                let active = start_output(&mut plugin).is_ok();
                self.outputs.push(OutputRecord {
                    id,
                    path: None,
                    active,
                    plugin,
                    _library: None,
                });
            }
        }
    }

    fn load_one(&mut self, path: &Path, host: &HostFunctions) -> Result<(), PluginLoadError> {
        check_permissions(path)?;

        let stem = path
            .file_stem()
            .and_then(OsStr::to_str)
            .ok_or_else(|| PluginLoadError::NotFound(path.to_path_buf()))?;
        let symbol_name = format!("{stem}_load\0");

        // SAFETY: we only call the one documented entry point immediately
        // below, and keep the library alive for as long as the record exists.
        let library = unsafe { Library::new(path) }.map_err(|source| PluginLoadError::LibraryLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let entry: PluginEntry = unsafe {
            let load: Symbol<LoadFn> = library
                .get(symbol_name.as_bytes())
                .map_err(|_| PluginLoadError::SymbolMissing(symbol_name.clone()))?;
            load(host)
        };

        if entry.api_version_major != API_VERSION_MAJOR {
            return Err(PluginLoadError::IncompatibleApiVersion {
                plugin_major: entry.api_version_major,
                plugin_minor: entry.api_version_minor,
                host_major: API_VERSION_MAJOR,
                host_minor: API_VERSION_MINOR,
            });
        }
        if entry.api_version_minor > API_VERSION_MINOR {
            tracing::warn!(
                plugin = stem,
                plugin_minor = entry.api_version_minor,
                host_minor = API_VERSION_MINOR,
                "plugin requests newer minor API than host supports"
            );
        }

        let loaded = match entry.kind {
            PluginKind::Decoder => {
                let create = entry
                    .create_decoder
                    .ok_or_else(|| PluginLoadError::SymbolMissing(symbol_name.clone()))?;
                Loaded::Decoder(create())
            }
            PluginKind::Output => {
                let create = entry
                    .create_output
                    .ok_or_else(|| PluginLoadError::SymbolMissing(symbol_name.clone()))?;
                Loaded::Output(create())
            }
        };

        match loaded {
            Loaded::Decoder(mut plugin) => {
                let id = plugin.id().to_string();
                let active = start_decoder(&mut plugin).is_ok();
                tracing::info!(id = %id, active, path = %path.display(), "loaded decoder plugin");
                self.decoders.write().records.push(DecoderRecord {
                    id,
                    path: Some(path.to_path_buf()),
                    active,
                    plugin,
                    _library: Some(library),
                });
            }
            Loaded::Output(mut plugin) => {
                let id = plugin.id().to_string();
                let active = start_output(&mut plugin).is_ok();
                tracing::info!(id = %id, active, path = %path.display(), "loaded output plugin");
                self.outputs.push(OutputRecord {
                    id,
                    path: Some(path.to_path_buf()),
                    active,
                    plugin,
                    _library: Some(library),
                });
            }
        }
        Ok(())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &OutputRecord> {
        self.outputs.iter().filter(|r| r.active)
    }

    /// Removes and returns the first active output record with `id`, so
    /// its plugin can be handed to a `SinkController`.
    pub fn take_output(&mut self, id: &str) -> Option<OutputRecord> {
        let pos = self.outputs.iter().position(|r| r.active && r.id == id)?;
        Some(self.outputs.remove(pos))
    }

    /// Calls `plugin_stop` on every record in reverse insertion order (spec
    /// §4.1/§6), then drops the module handles (releasing them). Output
    /// records additionally get `free()` to tear down their device queue,
    /// a plugin-instance concern distinct from `plugin_stop`'s lifecycle
    /// hook.
    pub fn unload_all(&mut self) {
        for record in self.outputs.iter_mut().rev() {
            if let Err(e) = stop_output(&mut record.plugin) {
                tracing::warn!(id = %record.id, error = %e, "output plugin stop failed");
            }
            record.plugin.free();
        }
        self.outputs.clear();

        let mut decoders = self.decoders.write();
        for record in decoders.records.iter_mut().rev() {
            if let Err(e) = stop_decoder(&mut record.plugin) {
                tracing::warn!(id = %record.id, error = %e, "decoder plugin stop failed");
            }
        }
        decoders.records.clear();
    }

    pub fn decoder_for_extension(&self, ext: &str) -> bool {
        self.decoders.read().for_extension(ext).is_some()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        self.unload_all();
    }
}

fn start_decoder(plugin: &mut DecoderPluginBox) -> Result<(), PluginLoadError> {
    plugin
        .plugin_start()
        .into_result()
        .map_err(|msg| PluginLoadError::StartFailed(msg.to_string()))
}

fn start_output(plugin: &mut OutputSinkPluginBox) -> Result<(), PluginLoadError> {
    plugin
        .plugin_start()
        .into_result()
        .map_err(|msg| PluginLoadError::StartFailed(msg.to_string()))
}

fn stop_decoder(plugin: &mut DecoderPluginBox) -> Result<(), PluginLoadError> {
    plugin
        .plugin_stop()
        .into_result()
        .map_err(|msg| PluginLoadError::StopFailed(msg.to_string()))
}

fn stop_output(plugin: &mut OutputSinkPluginBox) -> Result<(), PluginLoadError> {
    plugin
        .plugin_stop()
        .into_result()
        .map_err(|msg| PluginLoadError::StopFailed(msg.to_string()))
}

/// Duplicate ids across discovery are allowed by the spec (not forbidden);
/// this helper is for callers that want to assert uniqueness in tests.
pub fn assert_unique_decoder_ids(table: &DecoderTable) -> bool {
    let mut seen = HashSet::new();
    table.all().iter().all(|r| seen.insert(r.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_rejects_non_directory() {
        let mut registry = PluginRegistry::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = registry.discover(file.path(), &HostFunctions::inert());
        assert!(matches!(err, Err(PluginLoadError::NotADirectory(_))));
    }

    #[test]
    fn discover_empty_directory_succeeds_with_no_records() {
        let mut registry = PluginRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        registry.discover(dir.path(), &HostFunctions::inert()).unwrap();
        assert_eq!(registry.decoder_table().read().all().len(), 0);
        assert_eq!(registry.outputs().count(), 0);
    }

    #[test]
    fn discover_skips_hidden_and_wrong_suffix_without_erroring() {
        let mut registry = PluginRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".hidden.so"), b"").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"").unwrap();
        registry.discover(dir.path(), &HostFunctions::inert()).unwrap();
        assert_eq!(registry.decoder_table().read().all().len(), 0);
    }
}
