mod audio;
mod cmap;
mod error;
mod fseq;
mod lor;
mod netstats;
mod player;
mod queue;
mod rafile;
mod serial;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use audio::AudioPlayer;
use cmap::ChannelMap;
use queue::{PlayQueue, PlayRequest};
use serial::SerialSink;

// ─────────────────────────────────────────────────────────────────────────────
//  CLI
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "lumen",
    version,
    disable_version_flag = true,
    about = "Plays FSEQ v2 lighting sequences to a Light-O-Rama serial network"
)]
struct Cli {
    /// FSEQ v2 sequence file path
    #[arg(short = 'f', value_name = "FILE")]
    sequence: Option<PathBuf>,

    /// Network channel map file path
    #[arg(short = 'c', value_name = "FILE")]
    channel_map: Option<PathBuf>,

    /// Serial device name, or "stdout"/"null"
    #[arg(short = 'd', value_name = "DEVICE", default_value = "null")]
    device: String,

    /// Serial port baud rate
    #[arg(short = 'b', value_name = "BAUD", default_value_t = 19200)]
    baud: u32,

    /// Override audio with the specified file path
    #[arg(short = 'a', value_name = "FILE")]
    audio: Option<PathBuf>,

    /// Playback start delay (seconds) to allow connection setup
    #[arg(short = 'w', value_name = "SECONDS", default_value_t = 0)]
    wait: u32,

    /// Test-load a channel map file and exit
    #[arg(short = 't', value_name = "FILE")]
    test_map: Option<PathBuf>,

    /// Print the available serial port list and exit
    #[arg(short = 'l')]
    list_ports: bool,

    /// Print version information and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

// ─────────────────────────────────────────────────────────────────────────────
//  Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if cli.list_ports {
        return match SerialSink::list_ports() {
            Ok(ports) => {
                for p in ports {
                    println!("{p}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("failed to enumerate serial ports: {e}");
                ExitCode::FAILURE
            }
        };
    }

    if let Some(path) = &cli.test_map {
        return match ChannelMap::from_file(path) {
            Ok(map) => {
                println!("loaded {} channel map entries", map.len());
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("failed to load channel map `{}`: {e}", path.display());
                ExitCode::FAILURE
            }
        };
    }

    let (Some(sequence), Some(channel_map)) = (cli.sequence, cli.channel_map) else {
        eprintln!("a sequence file (-f) and channel map (-c) are required; see --help");
        return ExitCode::FAILURE;
    };

    let mut serial = match SerialSink::open(&cli.device, cli.baud) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to open serial device `{}`: {e}", cli.device);
            return ExitCode::FAILURE;
        }
    };

    let mut queue = PlayQueue::new();
    queue.append(PlayRequest {
        seq_path: sequence,
        audio_path: cli.audio,
        cmap_path: channel_map,
        wait_secs: cli.wait,
    });

    let mut audio = AudioPlayer::new();
    log::info!("queued {} playback job(s)", queue.len());

    while let Some(req) = queue.next() {
        log::info!("playing sequence `{}`", req.seq_path.display());
        if let Err(e) = player::exec(&req, &mut serial, &mut audio) {
            log::error!("playback failed: {e}");
            audio.stop();
            return ExitCode::FAILURE;
        }
    }

    audio.stop();
    ExitCode::SUCCESS
}
