//! Demo binary: runs one scripted call end to end over the in-process
//! transport and saves the recording.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use voxline_app::codec;
use voxline_app::pipeline::Topology;
use voxline_app::scripted::{scripted_services, silent_services};
use voxline_app::session::{Session, SessionEvent};
use voxline_app::transport::{duplex_pair, RemoteHandle};
use voxline_app::wav_sink::WavSink;
use voxline_foundation::SessionConfig;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TopologyArg {
    /// Distinct STT, reply generation, and TTS stages.
    Cascaded,
    /// One speech-to-speech stage.
    Native,
}

impl From<TopologyArg> for Topology {
    fn from(arg: TopologyArg) -> Self {
        match arg {
            TopologyArg::Cascaded => Topology::Cascaded,
            TopologyArg::Native => Topology::Native,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "voxline", about = "Scripted voice-agent call demo")]
struct Cli {
    #[arg(long, value_enum, default_value_t = TopologyArg::Cascaded)]
    topology: TopologyArg,

    /// Optional TOML session configuration; defaults apply otherwise.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory call recordings are written to.
    #[arg(long, default_value = "recordings")]
    out_dir: PathBuf,

    /// Total simulated call length.
    #[arg(long, default_value_t = 6_000)]
    call_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SessionConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    };

    let services = match cli.topology {
        TopologyArg::Cascaded => scripted_services(),
        TopologyArg::Native => silent_services(),
    };

    let sample_rate = config.audio_in_sample_rate;
    let (transport, remote) = duplex_pair(sample_rate, 256);
    let mut handle = Session::spawn(config, cli.topology.into(), services, transport)?;

    let caller = tokio::spawn(drive_caller(remote, sample_rate, cli.call_ms));

    let sink = WavSink::new(&cli.out_dir, "voxline");
    while let Some(event) = handle.next_event().await {
        match event {
            SessionEvent::Connected { stream_sid } => {
                tracing::info!(%stream_sid, "call connected");
            }
            SessionEvent::RecordingFinalized(Some(recording)) => {
                let path = sink.write(&recording)?;
                tracing::info!(
                    path = %path.display(),
                    duration_ms = recording.duration_ms(),
                    "call recording written"
                );
            }
            SessionEvent::RecordingFinalized(None) => {
                tracing::info!("call produced no audio, nothing to save");
            }
            SessionEvent::Closed { reason } => {
                tracing::info!(?reason, "call closed");
                break;
            }
        }
    }

    handle.join().await;
    let _ = caller.await;
    Ok(())
}

/// Simulated caller: connects, alternates one-second speech bursts with
/// pauses long enough for the agent to answer, then hangs up.
async fn drive_caller(mut remote: RemoteHandle, sample_rate: u32, call_ms: u64) {
    if remote.connect("demo-stream").await.is_err() {
        return;
    }

    let frame_ms = 20u64;
    let samples_per_frame = (sample_rate as u64 * frame_ms / 1_000) as usize;
    let mut interval = tokio::time::interval(Duration::from_millis(frame_ms));
    let mut elapsed_ms = 0u64;

    while elapsed_ms < call_ms {
        tokio::select! {
            _ = interval.tick() => {
                // 1s of speech out of every 2.5s.
                let speaking = elapsed_ms % 2_500 < 1_000;
                let pcm: Vec<i16> = (0..samples_per_frame)
                    .map(|i| {
                        if speaking {
                            let phase = 2.0 * std::f32::consts::PI * i as f32 * 300.0
                                / sample_rate as f32;
                            (phase.sin() * 12_000.0) as i16
                        } else {
                            0
                        }
                    })
                    .collect();
                if remote.send_media(codec::encode(&pcm)).await.is_err() {
                    return;
                }
                elapsed_ms += frame_ms;
            }
            agent_audio = remote.recv_media() => {
                match agent_audio {
                    Some(bytes) => tracing::debug!(len = bytes.len(), "agent audio packet"),
                    None => return,
                }
            }
        }
    }
    remote.disconnect().await;
}
