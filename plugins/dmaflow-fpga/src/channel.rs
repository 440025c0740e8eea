/*!
Synchronous FT60x transfer channel with safe mode.

Some host controllers intermittently fail concurrent bulk transfers. The
channel starts out lock-free; the first failing synchronous read flips
the channel into safe mode permanently, in which every transfer is
serialized through the channel lock. The failing read itself is retried
exactly once under the lock.
*/

use crate::ft60x::Ft60xBackend;
use crate::pipe::AsyncReader;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::warn;

use dmaflow_core::error::{Error, Result};

pub struct Channel {
    backend: Arc<dyn Ft60xBackend>,
    safe_mode: AtomicBool,
    lock: Mutex<()>,
    async_active: AtomicBool,
}

impl Channel {
    pub fn new(backend: Arc<dyn Ft60xBackend>) -> Self {
        Self {
            backend,
            safe_mode: AtomicBool::new(false),
            lock: Mutex::new(()),
            async_active: AtomicBool::new(false),
        }
    }

    /// Whether transfers are serialized through the channel lock.
    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::SeqCst)
    }

    fn guard(&self) -> Result<MutexGuard<()>> {
        self.lock
            .lock()
            .map_err(|_| Error::Other("channel lock poisoned"))
    }

    /// Reads up to `buf.len()` bytes, returning the bytes available.
    ///
    /// A failing read escalates the channel into safe mode and is
    /// retried once under the lock.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.is_safe_mode() {
            let _guard = self.guard()?;
            return self.backend.read(buf);
        }
        match self.backend.read(buf) {
            Ok(bytes) => Ok(bytes),
            Err(_) => {
                warn!("ft60x read failed, entering safe mode");
                thread::sleep(Duration::from_micros(100));
                self.safe_mode.store(true, Ordering::SeqCst);
                let _guard = self.guard()?;
                self.backend.read(buf)
            }
        }
    }

    /// Writes the whole buffer or fails.
    ///
    /// Write failures do not escalate into safe mode.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if self.is_safe_mode() {
            let _guard = self.guard()?;
            return self.backend.write(data);
        }
        self.backend.write(data)
    }

    /// Creates the async read pipeline for this channel.
    ///
    /// Only one pipeline may exist per channel; a second call while one
    /// is alive fails with `Error::Misuse` and has no effect.
    pub fn async_reader(self: &Arc<Self>) -> Result<AsyncReader> {
        if self
            .async_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Misuse(
                "only one async pipeline supported, close the previous one first",
            ));
        }
        Ok(AsyncReader::new(self.clone()))
    }

    pub(crate) fn release_async(&self) {
        self.async_active.store(false, Ordering::SeqCst);
    }
}
