// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! waveloom: plugin host and audio pipeline core for a music player.
//!
//! Wires together plugin discovery, the event bus, the streamer, the
//! output sink controller, and the transport command loop behind a line
//! console standing in for a real GUI/message-pump collaborator.

mod config;

use abi_stable::sabi_trait::TD_Opaque;
use config::HostConfig;
use directories::ProjectDirs;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use waveloom_core::{
    BuiltinPlugin, CommandLoop, Event, EventBus, EventKind, HostFacade, InMemoryPlaylist,
    NullOutputSink, PlayItem, PluginRegistry, SinkController, Streamer, TransportCommand,
};
use waveloom_plugin_api::{DecoderPlugin_TO, OutputSinkPlugin_TO};

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("waveloom=info".parse().unwrap()))
        .init();

    info!("starting waveloom");

    let dirs = ProjectDirs::from("org", "waveloom", "waveloom");
    let config_path = dirs
        .as_ref()
        .map(|d| d.config_dir().join("waveloom.toml"))
        .unwrap_or_else(|| "waveloom.toml".into());
    let config = match HostConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration, using defaults");
            HostConfig::default()
        }
    };

    // The host façade has to exist before plugin discovery: discovery calls
    // each module's `<stem>_load` with the façade's function table (spec
    // §4.1). The transport channel is created ahead of `CommandLoop` itself
    // so the façade can hold a sender before anything is listening on it —
    // `SyncSender::try_send` queues fine with no receiver yet.
    let bus = Arc::new(EventBus::new());
    let (transport_tx, transport_rx) = waveloom_core::transport_channel();
    let host = Arc::new(HostFacade::new(bus.clone(), transport_tx.clone()));

    let mut registry = PluginRegistry::new();
    registry.register_builtin(
        "wav",
        BuiltinPlugin::Decoder(DecoderPlugin_TO::from_value(
            waveloom_wav_decoder::WavDecoderPlugin::new(),
            TD_Opaque,
        )),
    );
    registry.register_builtin(
        "null",
        BuiltinPlugin::Output(OutputSinkPlugin_TO::from_value(
            NullOutputSink::new(),
            TD_Opaque,
        )),
    );

    if let Some(dirs) = &dirs {
        let plugin_dir = dirs.data_dir().join("plugins");
        if plugin_dir.is_dir() {
            if let Err(e) = registry.discover(&plugin_dir, &host.host_functions()) {
                tracing::warn!(error = %e, dir = %plugin_dir.display(), "plugin discovery failed");
            }
        }
    }
    for dir in &config.extra_plugin_dirs {
        if let Err(e) = registry.discover(dir, &host.host_functions()) {
            tracing::warn!(error = %e, dir = %dir.display(), "plugin discovery failed");
        }
    }

    let output = match registry.take_output(&config.output_id) {
        Some(record) => record.into_plugin(),
        None => {
            tracing::warn!(
                id = %config.output_id,
                "configured output sink not found, falling back to the null sink"
            );
            registry
                .take_output("null")
                .expect("null output sink is always registered")
                .into_plugin()
        }
    };

    let playlist = Arc::new(InMemoryPlaylist::new(Vec::new()));
    let playlist_handle: Arc<dyn waveloom_core::PlaylistHandle> = playlist.clone();
    let streamer = Arc::new(Streamer::new(
        bus.clone(),
        registry.decoder_table(),
        playlist_handle.clone(),
    ));
    let sink = Arc::new(SinkController::new(output, streamer.clone()));
    // Kept alive for the rest of `main`: dropping it would join and tear
    // down the transport thread immediately.
    let _command_loop = CommandLoop::spawn(
        bus.clone(),
        streamer.clone(),
        sink.clone(),
        playlist_handle,
        transport_tx,
        transport_rx,
    );

    let _sub = host.subscribe("console", EventKind::SongStarted, |event| {
        if let Event::SongStarted { item, .. } = event {
            info!(locator = %item.locator, "now playing");
        }
    });

    run_console(&host, &playlist);
}

/// A line-oriented transport console, standing in for the external
/// GUI/message-pump collaborator that would otherwise drive the host façade.
fn run_console(host: &HostFacade, playlist: &Arc<InMemoryPlaylist>) {
    println!("waveloom ready. commands: add <path> | play | pause | unpause | next | prev | stop | seek <secs> | quit");
    let stdin = std::io::stdin();
    print!("> ");
    let _ = std::io::stdout().flush();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut parts = line.trim().splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let arg = parts.next().unwrap_or("").trim();

        let result: Result<(), String> = match cmd {
            "add" => {
                playlist.push(make_item(arg));
                Ok(())
            }
            "play" => host.post_transport(TransportCommand::PlaySong).map_err(|e| e.to_string()),
            "pause" => host.post_transport(TransportCommand::PauseSong).map_err(|e| e.to_string()),
            "unpause" => host
                .post_transport(TransportCommand::UnpauseSong)
                .map_err(|e| e.to_string()),
            "next" => host.post_transport(TransportCommand::NextSong).map_err(|e| e.to_string()),
            "prev" => host.post_transport(TransportCommand::PrevSong).map_err(|e| e.to_string()),
            "stop" => host.post_transport(TransportCommand::StopSong).map_err(|e| e.to_string()),
            "seek" => match arg.parse::<f64>() {
                Ok(t) => host.post_transport(TransportCommand::Seek(t)).map_err(|e| e.to_string()),
                Err(_) => Err("usage: seek <seconds>".to_string()),
            },
            "quit" | "exit" => {
                let _ = host.post_transport(TransportCommand::Terminate);
                break;
            }
            "" => Ok(()),
            other => Err(format!("unknown command: {other}")),
        };
        if let Err(e) = result {
            eprintln!("error: {e}");
        }
        print!("> ");
        let _ = std::io::stdout().flush();
    }
}

fn make_item(locator: &str) -> PlayItem {
    PlayItem {
        locator: locator.to_string(),
        decoder_id: "wav".to_string(),
        filetype: "WAV".to_string(),
        total_samples: 0,
        sample_rate: 0,
        channels: 0,
        bits_per_sample: 0,
        is_float: false,
        is_big_endian: false,
        channel_mask: 0,
        start_sample: 0,
        end_sample: 0,
        metadata: Default::default(),
    }
}
