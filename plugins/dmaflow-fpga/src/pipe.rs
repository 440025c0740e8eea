/*!
Asynchronous read pipeline.

A single worker thread performs the bulk reads so the caller can overlap
completion parsing with the next usb transfer. The pipeline holds at
most one outstanding read; buffers move into the pipeline on submit and
come back out on collect together with the number of bytes read.
*/

use crate::channel::Channel;

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use log::warn;

use dmaflow_core::error::{Error, Result};

enum State {
    /// No read outstanding.
    Idle,
    /// A buffer has been submitted, the worker has not picked it up yet.
    Pending(Vec<u8>),
    /// The worker is reading into the buffer.
    Reading,
    /// The read finished with the given byte count.
    Ready(Vec<u8>, usize),
}

struct Inner {
    state: State,
    shutdown: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    /// signalled on submit and shutdown, awaited by the worker
    submit: Condvar,
    /// signalled when a read finishes, awaited by collect
    result: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Other("async pipeline lock poisoned"))
    }
}

/// The async read pipeline of a [`Channel`].
///
/// Created through [`Channel::async_reader`]; dropping it shuts the
/// worker down and releases the channel for a new pipeline.
pub struct AsyncReader {
    channel: Arc<Channel>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncReader {
    pub(crate) fn new(channel: Arc<Channel>) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: State::Idle,
                shutdown: false,
            }),
            submit: Condvar::new(),
            result: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker_channel = channel.clone();
        let worker = thread::spawn(move || worker_loop(&worker_shared, &worker_channel));

        Self {
            channel,
            shared,
            worker: Some(worker),
        }
    }

    /// Submits `buf` for an asynchronous read.
    ///
    /// Fails with `Error::Misuse` if a read is already outstanding; the
    /// outstanding read is left untouched.
    pub fn submit(&mut self, buf: Vec<u8>) -> Result<()> {
        let mut inner = self.shared.lock()?;
        if inner.shutdown {
            return Err(Error::Misuse("async pipeline is closed"));
        }
        match inner.state {
            State::Idle => {
                inner.state = State::Pending(buf);
                self.shared.submit.notify_one();
                Ok(())
            }
            _ => Err(Error::Misuse(
                "previous async read is not yet collected, collect results before initiating a new read",
            )),
        }
    }

    /// Collects the outstanding read.
    ///
    /// Blocks until the read finishes and returns the submitted buffer
    /// together with the number of bytes read. Returns an empty buffer
    /// and 0 bytes immediately if no read is outstanding.
    pub fn collect(&mut self) -> Result<(Vec<u8>, usize)> {
        let mut inner = self.shared.lock()?;
        loop {
            match std::mem::replace(&mut inner.state, State::Idle) {
                State::Idle => return Ok((Vec::new(), 0)),
                State::Ready(buf, bytes) => return Ok((buf, bytes)),
                other => {
                    inner.state = other;
                    if inner.shutdown {
                        return Err(Error::Misuse("async pipeline is closed"));
                    }
                    inner = self
                        .shared
                        .result
                        .wait(inner)
                        .map_err(|_| Error::Other("async pipeline lock poisoned"))?;
                }
            }
        }
    }

    /// Shuts the pipeline down and joins the worker thread.
    ///
    /// Called implicitly on drop; calling it twice is a no-op.
    pub fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Ok(mut inner) = self.shared.lock() {
                inner.shutdown = true;
                self.shared.submit.notify_one();
            }
            if worker.join().is_err() {
                warn!("async read worker panicked during shutdown");
            }
            self.channel.release_async();
        }
    }
}

impl Drop for AsyncReader {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(shared: &Shared, channel: &Channel) {
    let mut inner = match shared.lock() {
        Ok(inner) => inner,
        Err(_) => return,
    };
    loop {
        while !inner.shutdown && !matches!(inner.state, State::Pending(_)) {
            inner = match shared.submit.wait(inner) {
                Ok(inner) => inner,
                Err(_) => return,
            };
        }
        if inner.shutdown {
            return;
        }
        let mut buf = match std::mem::replace(&mut inner.state, State::Reading) {
            State::Pending(buf) => buf,
            // cannot happen, the loop above only exits on Pending
            other => {
                inner.state = other;
                continue;
            }
        };
        drop(inner);

        // a failed transfer is recorded as 0 bytes, the pipeline stays usable
        let bytes = channel.read(&mut buf).unwrap_or(0);

        inner = match shared.lock() {
            Ok(inner) => inner,
            Err(_) => return,
        };
        inner.state = State::Ready(buf, bytes);
        shared.result.notify_one();
    }
}
