//! Interactive console client for a Gemini Live session.
//!
//! Loads configuration, registers the catalog's tools, connects, then forwards
//! each stdin line as a user turn until EOF, Ctrl+C, or the remote side closes.
//! Model audio goes to a WAV file or, with `device-audio`, to the speaker.

use anyhow::Context;
use clap::Parser;
use foxlive_service::{config::Config, console, tools, wav};
use gemini_realtime::{EventKind, LiveClient, ResponseModality};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Prebuilt voice name, e.g. "Puck".
    #[arg(long)]
    voice: Option<String>,

    /// BCP-47 language code for speech output.
    #[arg(long)]
    language: Option<String>,

    /// `audio` or `text`.
    #[arg(long)]
    modality: Option<ResponseModality>,

    /// WAV file streamed as microphone input after setup.
    #[arg(long)]
    input_wav: Option<PathBuf>,

    /// WAV file that receives the model's audio.
    #[arg(long)]
    output_wav: Option<PathBuf>,

    /// Use the default microphone and speaker.
    #[cfg(feature = "device-audio")]
    #[arg(long)]
    live: bool,
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(voice) = &cli.voice {
        config.voice = Some(voice.clone());
    }
    if let Some(language) = &cli.language {
        config.language = Some(language.clone());
    }
    if let Some(modality) = cli.modality {
        config.response_modality = modality;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli);

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!("Configuration loaded.");

    let catalog = tools::load_catalog(config.tools_config_path.as_deref())?;
    let manager = Arc::new(tools::build_manager(&catalog)?);
    let client = Arc::new(LiveClient::new(manager));
    console::attach(&client);

    let closed = Arc::new(Notify::new());
    {
        let closed = closed.clone();
        client.on(EventKind::Close, move |_| closed.notify_one());
    }

    let recorder = match &cli.output_wav {
        Some(path) => {
            let recorder = Arc::new(wav::WavRecorder::create(path)?);
            client.attach_playback(recorder.clone());
            Some(recorder)
        }
        None => None,
    };

    #[cfg_attr(not(feature = "device-audio"), allow(unused_mut))]
    let mut playing = recorder.is_some();

    #[cfg(feature = "device-audio")]
    let _devices = if cli.live {
        use foxlive_service::device;
        use gemini_realtime::PlaybackQueue;

        let queue = Arc::new(PlaybackQueue::default());
        let speaker = device::open_speaker(queue.clone())?;
        if !playing {
            client.attach_playback(queue);
            playing = true;
        }
        let mic = device::open_microphone()?;
        let capture = tokio::spawn(device::capture_loop(
            client.clone(),
            mic.buffers,
            mic.sample_rate,
            mic.channels,
        ));
        Some((speaker, mic.stream, capture))
    } else {
        None
    };

    if config.response_modality == ResponseModality::Audio && !playing {
        warn!("Audio responses are not played; pass --output-wav to keep them.");
    }

    client
        .connect(config.session_config(), &config.gemini_api_key)
        .await
        .context("Failed to start live session")?;

    if let Some(path) = &cli.input_wav {
        let pcm = wav::load_input_pcm16(path)?;
        let client = client.clone();
        tokio::spawn(async move { wav::stream_input(&client, &pcm).await });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(text) if text.trim().is_empty() => continue,
                Some(text) => client.send_text(text),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal.");
                break;
            }
            _ = closed.notified() => {
                warn!("Session closed by the remote side.");
                break;
            }
        }
    }

    client.disconnect();
    if let Some(recorder) = recorder {
        recorder.finish()?;
    }
    Ok(())
}
