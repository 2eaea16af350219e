//! Routes control-change messages from the active MIDI input to listeners
//! registered per controller number.
//!
//! Listeners run synchronously on the backend's input thread, in arrival
//! order.  Nothing is batched or debounced here; rate limiting belongs
//! downstream where prompt updates reach the session.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::backend::{MessageCallback, MidiBackend, MidiDevice, MidiError};

/// Token returned by [`MidiDispatcher::on_control_change`].
pub type ListenerId = u64;

type CcListener = Arc<dyn Fn(u8) + Send + Sync>;

const CONTROL_CHANGE: u8 = 0xB0;

#[derive(Default)]
struct Router {
    active: Option<String>,
    listeners: HashMap<u8, Vec<(ListenerId, CcListener)>>,
    next_id: ListenerId,
}

impl Router {
    /// Listeners to call for `message` from `device`, cloned out so none run
    /// under the lock.
    fn targets(&self, device: &str, message: &[u8]) -> Option<(Vec<CcListener>, u8)> {
        let &[status, cc, value, ..] = message else {
            return None;
        };
        if status & 0xF0 != CONTROL_CHANGE || self.active.as_deref() != Some(device) {
            return None;
        }
        let listeners = self.listeners.get(&(cc & 0x7F))?;
        Some((listeners.iter().map(|(_, l)| Arc::clone(l)).collect(), value & 0x7F))
    }
}

/// MIDI device registry plus control-change fan-out.
pub struct MidiDispatcher {
    backend: Box<dyn MidiBackend>,
    devices: Vec<MidiDevice>,
    router: Arc<Mutex<Router>>,
}

impl MidiDispatcher {
    pub fn new(backend: Box<dyn MidiBackend>) -> Self {
        Self {
            backend,
            devices: Vec::new(),
            router: Arc::new(Mutex::new(Router::default())),
        }
    }

    /// Enumerate inputs and listen on all of them.  Returns the device ids.
    ///
    /// When no device has been selected yet (or the selected one is gone),
    /// the first discovered device becomes active.  On failure the registry
    /// is cleared; callers should treat the error as non-fatal.
    pub fn request_access(&mut self) -> Result<Vec<String>, MidiError> {
        self.backend.disconnect_all();

        let devices = match self.backend.list_inputs() {
            Ok(devices) => devices,
            Err(e) => {
                log::warn!("midi: access failed: {e}");
                self.revoke();
                return Err(e);
            }
        };

        let router = Arc::clone(&self.router);
        let callback: MessageCallback = Arc::new(move |device: &str, message: &[u8]| {
            let Some((listeners, value)) = router.lock().targets(device, message) else {
                return;
            };
            for listener in listeners {
                listener(value);
            }
        });

        for device in &devices {
            if let Err(e) = self.backend.connect(device, Arc::clone(&callback)) {
                log::warn!("midi: {e}");
            }
        }

        {
            let mut router = self.router.lock();
            let still_present = router
                .active
                .as_ref()
                .is_some_and(|id| devices.iter().any(|d| &d.id == id));
            if !still_present {
                router.active = devices.first().map(|d| d.id.clone());
            }
        }

        log::info!("midi: {} input device(s) found", devices.len());
        let ids = devices.iter().map(|d| d.id.clone()).collect();
        self.devices = devices;
        Ok(ids)
    }

    /// Stop listening and forget every device.  Listeners stay registered.
    pub fn revoke(&mut self) {
        self.backend.disconnect_all();
        self.devices.clear();
        self.router.lock().active = None;
    }

    pub fn devices(&self) -> &[MidiDevice] {
        &self.devices
    }

    /// Display name for `id`, with a generic fallback.
    pub fn device_name(&self, id: &str) -> String {
        self.devices
            .iter()
            .find(|d| d.id == id)
            .and_then(|d| d.name.clone())
            .unwrap_or_else(|| format!("Device {id}"))
    }

    pub fn active_device(&self) -> Option<String> {
        self.router.lock().active.clone()
    }

    /// Select the device whose messages are dispatched; `None` mutes all.
    pub fn set_active_device(&self, id: Option<String>) {
        if let Some(id) = &id {
            if !self.devices.iter().any(|d| &d.id == id) {
                log::warn!("midi: selecting unknown device {id:?}");
            }
        }
        self.router.lock().active = id;
    }

    /// Call `listener` with the 0–127 value of every control change `cc`
    /// from the active device.
    pub fn on_control_change<F>(&self, cc: u8, listener: F) -> ListenerId
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        let mut router = self.router.lock();
        let id = router.next_id;
        router.next_id += 1;
        router
            .listeners
            .entry(cc & 0x7F)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` when `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut router = self.router.lock();
        let mut removed = false;
        for listeners in router.listeners.values_mut() {
            let before = listeners.len();
            listeners.retain(|(lid, _)| *lid != id);
            removed |= listeners.len() != before;
        }
        removed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
