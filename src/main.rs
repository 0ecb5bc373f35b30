//! Konsolen-Oberfläche für PeerCall
//!
//! Kommandos: `video`, `call`, `end`, `record`, `stop`, `state`, `quit`

use anyhow::{Context, Result};
use peercall::config::AppConfig;
use peercall::media::{AudioPlayback, TrackKind};
use peercall::recording::RecordingEvent;
use peercall::session::{SessionHandle, SessionState, SessionUpdate};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

const HELP: &str = "commands: video | call | end | record | stop | state | quit";

#[tokio::main]
async fn main() -> Result<()> {
    peercall::init_logging();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let (session, task) = peercall::connect(&config)
        .await
        .with_context(|| format!("could not connect to {}", config.signaling_url))?;

    tokio::spawn(print_updates(session.clone()));

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            command => {
                if let Err(e) = run_command(&session, command).await {
                    println!("error: {:#}", e);
                }
            }
        }
    }

    session.shutdown().await?;
    task.await.context("session task panicked")?;
    Ok(())
}

async fn run_command(session: &SessionHandle, command: &str) -> Result<()> {
    let state = session.state().await?;

    match command {
        "video" => {
            let stream = session.start_video().await?;
            println!("local stream {} ({} track(s))", stream.id(), stream.tracks().len());
        }
        "call" => {
            if state.in_call() {
                println!("already in a call");
            } else {
                session.start_call().await?;
            }
        }
        "end" => {
            if !session.end_call().await? {
                println!("no active call");
            }
        }
        "record" => {
            if !session.start_recording().await? {
                println!("nothing to record (start video first)");
            }
        }
        "stop" => {
            let saved = session.stop_recording().await?;
            if saved.is_empty() {
                println!("no recording in progress");
            }
            for recording in saved {
                println!("saved {} ({} bytes)", recording.location.display(), recording.size);
            }
        }
        "state" => println!("{}", state),
        _ => println!("{}", HELP),
    }
    Ok(())
}

async fn print_updates(session: SessionHandle) {
    let mut updates = session.subscribe();
    let mut playback: Option<AudioPlayback> = None;

    loop {
        match updates.recv().await {
            Ok(SessionUpdate::RemoteTrack(track)) => {
                if track.kind() == TrackKind::Audio && playback.is_none() {
                    match AudioPlayback::start(&track) {
                        Ok(started) => playback = Some(started),
                        Err(e) => println!("* remote audio not played: {}", e),
                    }
                }
            }
            Ok(SessionUpdate::RemoteStream(None)) => playback = None,
            Ok(SessionUpdate::StateChanged(SessionState::Connected { role })) => {
                println!("* connected ({:?})", role);
            }
            Ok(SessionUpdate::StateChanged(state)) => println!("* {}", state),
            Ok(SessionUpdate::RemoteStream(Some(stream))) => {
                println!("* remote stream {} ({} track(s))", stream.id(), stream.tracks().len());
            }
            Ok(SessionUpdate::CallAbandoned { reason }) => println!("* call abandoned: {}", reason),
            Ok(SessionUpdate::MediaError(e)) => println!("* media error: {}", e),
            Ok(SessionUpdate::Recording(RecordingEvent::Saved(saved))) => {
                println!("* recording saved to {}", saved.location.display());
            }
            Ok(SessionUpdate::Recording(RecordingEvent::Failed(e))) => {
                println!("* recording failed: {}", e);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}
