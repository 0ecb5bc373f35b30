//! Session-Task und Handle
//!
//! Die `Session` läuft in genau einem Task. Benutzeraktionen, Peer-Events und
//! Signaling-Events werden dort nacheinander abgearbeitet; das Handle schickt
//! nur Kommandos und wartet auf die Antwort.

use super::negotiator::{Session, SessionError, SessionState, SessionUpdate};
use crate::media::MediaStream;
use crate::recording::SavedRecording;
use crate::signaling::SignalingEvents;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

pub(crate) enum Command {
    StartVideo(oneshot::Sender<Result<MediaStream, SessionError>>),
    StartCall(oneshot::Sender<Result<(), SessionError>>),
    EndCall(oneshot::Sender<bool>),
    StartRecording(oneshot::Sender<bool>),
    StopRecording(oneshot::Sender<Result<Vec<SavedRecording>, SessionError>>),
    State(oneshot::Sender<SessionState>),
    Shutdown(oneshot::Sender<()>),
}

/// Steuerung einer laufenden Session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| SessionError::Stopped)?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    pub async fn start_video(&self) -> Result<MediaStream, SessionError> {
        self.request(Command::StartVideo).await?
    }

    pub async fn start_call(&self) -> Result<(), SessionError> {
        self.request(Command::StartCall).await?
    }

    /// `Ok(false)`, wenn kein Anruf lief
    pub async fn end_call(&self) -> Result<bool, SessionError> {
        self.request(Command::EndCall).await
    }

    /// `Ok(false)` ohne lokalen Stream oder bei laufender Aufnahme
    pub async fn start_recording(&self) -> Result<bool, SessionError> {
        self.request(Command::StartRecording).await
    }

    pub async fn stop_recording(&self) -> Result<Vec<SavedRecording>, SessionError> {
        self.request(Command::StopRecording).await?
    }

    pub async fn state(&self) -> Result<SessionState, SessionError> {
        self.request(Command::State).await
    }

    /// Beendet den Anruf und den Session-Task
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(Command::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl Session {
    /// Startet den Session-Task
    ///
    /// Der Task endet bei `shutdown()` oder wenn alle Handles gedroppt sind.
    pub fn spawn(self, signaling_events: SignalingEvents) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            commands: commands_tx,
            updates: self.update_tx.clone(),
        };
        let task = tokio::spawn(self.run(commands_rx, signaling_events));
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signaling_events: SignalingEvents,
    ) {
        let mut recording_events = self.recorder.subscribe();
        let mut signaling_open = true;
        let mut shutdown_reply = None;

        tracing::info!("Session task started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(input) = self.peer_rx.recv() => {
                    self.handle_peer_input(input).await;
                }
                event = signaling_events.recv(), if signaling_open => match event {
                    Some(event) => self.handle_signaling_event(event).await,
                    None => signaling_open = false,
                },
                event = recording_events.recv() => match event {
                    Ok(event) => {
                        let _ = self.update_tx.send(SessionUpdate::Recording(event));
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Missed {} recording event(s)", n);
                    }
                    Err(RecvError::Closed) => {}
                },
            }
        }

        if let Err(e) = self.stop_recording().await {
            tracing::warn!("Recording could not be finalized on shutdown: {}", e);
        }
        self.end_call().await;
        tracing::info!("Session task stopped");

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartVideo(reply) => {
                let _ = reply.send(self.start_video());
            }
            Command::StartCall(reply) => {
                let _ = reply.send(self.start_call().await);
            }
            Command::EndCall(reply) => {
                let _ = reply.send(self.end_call().await);
            }
            Command::StartRecording(reply) => {
                let _ = reply.send(self.start_recording());
            }
            Command::StopRecording(reply) => {
                let _ = reply.send(self.stop_recording().await);
            }
            Command::State(reply) => {
                let _ = reply.send(self.state());
            }
            Command::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }
}
