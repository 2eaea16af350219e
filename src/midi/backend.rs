//! Platform MIDI input behind a small trait so the dispatcher can be tested
//! without hardware.

use std::sync::Arc;

use midir::{Ignore, MidiInput, MidiInputConnection};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A discovered input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiDevice {
    /// Stable platform id.
    pub id: String,
    /// Display name, when the platform reports one.
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MidiError {
    /// Access was denied or the platform has no MIDI service.
    #[error("MIDI is not available: {0}")]
    Unavailable(String),

    #[error("could not open MIDI input {device}: {message}")]
    Connect { device: String, message: String },
}

/// Receives `(device_id, raw_message)` on the backend's input thread.
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Enumerates and listens on MIDI inputs.
pub trait MidiBackend: Send {
    fn list_inputs(&mut self) -> Result<Vec<MidiDevice>, MidiError>;

    /// Start listening on `device`, forwarding every message to `on_message`.
    fn connect(&mut self, device: &MidiDevice, on_message: MessageCallback)
        -> Result<(), MidiError>;

    /// Close every open input.
    fn disconnect_all(&mut self);
}

// ---------------------------------------------------------------------------
// MidirBackend
// ---------------------------------------------------------------------------

/// `midir`-backed inputs.  Each connection consumes its own `MidiInput`
/// client, so a fresh one is created per port.
pub struct MidirBackend {
    client_name: String,
    connections: Vec<MidiInputConnection<()>>,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            connections: Vec::new(),
        }
    }

    fn client(&self) -> Result<MidiInput, MidiError> {
        let mut input =
            MidiInput::new(&self.client_name).map_err(|e| MidiError::Unavailable(e.to_string()))?;
        // control changes only; drop sysex, clock and active sensing
        input.ignore(Ignore::All);
        Ok(input)
    }
}

impl MidiBackend for MidirBackend {
    fn list_inputs(&mut self) -> Result<Vec<MidiDevice>, MidiError> {
        let input = self.client()?;
        Ok(input
            .ports()
            .iter()
            .map(|port| MidiDevice {
                id: port.id(),
                name: input.port_name(port).ok().filter(|n| !n.is_empty()),
            })
            .collect())
    }

    fn connect(
        &mut self,
        device: &MidiDevice,
        on_message: MessageCallback,
    ) -> Result<(), MidiError> {
        let input = self.client()?;
        let connect_err = |message: String| MidiError::Connect {
            device: device.id.clone(),
            message,
        };

        let port = input
            .ports()
            .into_iter()
            .find(|p| p.id() == device.id)
            .ok_or_else(|| connect_err("port disappeared".into()))?;

        let id = device.id.clone();
        let connection = input
            .connect(
                &port,
                &format!("{}-in", self.client_name),
                move |_stamp, message, _| on_message(&id, message),
                (),
            )
            .map_err(|e| connect_err(e.to_string()))?;

        log::info!("midi: listening on {}", device.name.as_deref().unwrap_or(&device.id));
        self.connections.push(connection);
        Ok(())
    }

    fn disconnect_all(&mut self) {
        for connection in self.connections.drain(..) {
            connection.close();
        }
    }
}

impl Drop for MidirBackend {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}
