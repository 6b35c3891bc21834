use anyhow::{Context, Result};
use base64::Engine;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use avatar_sync::audio::{AudioClock, DeviceClock, VirtualClock};
use avatar_sync::protocol::WireWeights;
use avatar_sync::{AvatarSession, Blendshape, ConfigManager, ProtocolEvent, Role, SyncEvent, Weights};

// Constants
const TICK_MS: u64 = 16;
const SAMPLE_RATE: u32 = 24000;
const FRAME_MS: u64 = 40;
const FRAME_SAMPLES: usize = (SAMPLE_RATE as u64 * FRAME_MS / 1000) as usize;

fn main() -> Result<()> {
    // 1. Init Logger
    env_logger::init();
    info!("Starting avatar-sync...");

    // 2. Load Config
    let config = ConfigManager::new("sync_config.json").load();

    // 3. Acquire the shared output device, or keep time without one
    let clock: Arc<dyn AudioClock> = match DeviceClock::shared() {
        Ok(device) => {
            info!("Audio output ready at {}Hz", device.sample_rate());
            device
        }
        Err(e) => {
            error!("Audio output unavailable ({:#}); continuing without sound", e);
            Arc::new(VirtualClock::wall())
        }
    };

    // 4. Setup Channels
    // Transport -> Main
    let (tx_protocol, rx_protocol) = crossbeam_channel::unbounded::<ProtocolEvent>();
    // Session -> Main (render side)
    let (tx_events, rx_events) = crossbeam_channel::unbounded::<SyncEvent>();

    // 5. Start Transport Thread
    let source = std::env::args().nth(1);
    thread::spawn(move || {
        let result = match &source {
            Some(path) => replay_file(path, &tx_protocol),
            None => synthetic_turn(&tx_protocol),
        };
        if let Err(e) = result {
            error!("Transport failed: {:#}", e);
        }
    });

    // 6. Main Loop
    let mut session = AvatarSession::new(clock, config, tx_events);
    let mut transport_open = true;
    info!("Running... (Press Ctrl+C to stop)");

    loop {
        thread::sleep(Duration::from_millis(TICK_MS));

        // Pull everything the transport has delivered
        loop {
            match rx_protocol.try_recv() {
                Ok(event) => session.handle(event),
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    if transport_open {
                        info!("Transport closed");
                    }
                    transport_open = false;
                    break;
                }
            }
        }

        session.tick();
        dispatch(&rx_events);

        if !transport_open && !session.engine().state().is_playing && !session.has_pending_stop() {
            break;
        }
    }

    dispatch(&rx_events);
    info!("Done.");
    Ok(())
}

fn dispatch(rx: &Receiver<SyncEvent>) {
    for event in rx.try_iter() {
        match event {
            SyncEvent::Weights(w) => debug!("jawOpen {:.2}", w.get(Blendshape::JawOpen)),
            SyncEvent::Subtitle { role, text } => info!("[{:?}] {}", role, text),
            SyncEvent::MessageFinal { role, text } => info!("✅ {:?}: {}", role, text),
            SyncEvent::PlaybackEnded => info!("Playback ended"),
            SyncEvent::Status(status) => info!("Status: {:?}", status),
        }
    }
}

/// Replays a JSON-lines capture of protocol events.
fn replay_file(path: &str, tx: &Sender<ProtocolEvent>) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match ProtocolEvent::parse(&line) {
            Ok(event) => {
                let paced = matches!(event, ProtocolEvent::SyncFrame { .. });
                if tx.send(event).is_err() {
                    break;
                }
                if paced {
                    thread::sleep(Duration::from_millis(FRAME_MS / 2));
                }
            }
            Err(e) => warn!("Skipping line {}: {}", n + 1, e),
        }
    }
    Ok(())
}

/// One short assistant turn: a tone with a jaw that follows its envelope.
fn synthetic_turn(tx: &Sender<ProtocolEvent>) -> Result<()> {
    let send = |event: ProtocolEvent| tx.send(event).context("Session loop is gone");
    let words = ["Hello", " there,", " this", " is", " a", " synthetic", " turn."];

    // Deltas may land before the turn starts
    send(ProtocolEvent::TranscriptDelta {
        role: Role::Assistant,
        text: words[0].to_string(),
        start_offset: Some(0.0),
        item_id: Some("item-0".into()),
        previous_item_id: None,
    })?;
    send(ProtocolEvent::AudioStart {
        turn_id: "turn-1".into(),
        session_id: "session-1".into(),
        sample_rate: Some(SAMPLE_RATE),
        format: Some("pcm16".into()),
    })?;
    for (i, word) in words.iter().enumerate().skip(1) {
        send(ProtocolEvent::TranscriptDelta {
            role: Role::Assistant,
            text: word.to_string(),
            start_offset: Some(i as f64 * 250.0),
            item_id: Some(format!("item-{}", i)),
            previous_item_id: Some(format!("item-{}", i - 1)),
        })?;
    }

    let frames = (words.len() as u64 * 250) / FRAME_MS;
    for index in 0..frames {
        let envelope = ((index as f32 * 0.35).sin() * 0.5 + 0.5) * 0.8;
        let mut weights = Weights::NEUTRAL;
        weights.set(Blendshape::JawOpen, envelope);
        weights.set(Blendshape::MouthFunnel, envelope * 0.3);

        send(ProtocolEvent::SyncFrame {
            audio: tone(index, envelope),
            weights: WireWeights::from(&weights),
            frame_index: index,
            session_id: Some("session-1".into()),
            timestamp: Some((index * FRAME_MS) as f64 / 1000.0),
        })?;
        // Deliver a little faster than real time
        thread::sleep(Duration::from_millis(FRAME_MS / 2));
    }

    send(ProtocolEvent::AudioEnd { session_id: Some("session-1".into()) })?;
    send(ProtocolEvent::TranscriptDone {
        role: Role::Assistant,
        text: words.concat(),
        interrupted: false,
    })?;
    Ok(())
}

/// Base64 PCM16 LE for one frame of a 220Hz tone.
fn tone(index: u64, gain: f32) -> String {
    let mut bytes = Vec::with_capacity(FRAME_SAMPLES * 2);
    for n in 0..FRAME_SAMPLES {
        let t = (index as usize * FRAME_SAMPLES + n) as f32 / SAMPLE_RATE as f32;
        let sample = (t * 220.0 * std::f32::consts::TAU).sin() * gain * 0.3;
        bytes.extend_from_slice(&((sample * i16::MAX as f32) as i16).to_le_bytes());
    }
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
