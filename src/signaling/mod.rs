//! Signaling Module - Relay Client
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Relay:
//! - Verbindung aufbauen und halten (WebSocket oder Loopback)
//! - `offer`, `answer` und `ice-candidate` senden
//! - Eingehende Nachrichten in Ankunftsreihenfolge weiterleiten
//!

mod client;
mod messages;

pub use client::{websocket_url, SignalingClient, SignalingError, SignalingEvent, SignalingEvents};
pub use messages::*;
