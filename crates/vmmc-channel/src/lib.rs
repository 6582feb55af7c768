#![forbid(unsafe_code)]

//! Single-slot request/response channel between hook callers and a read worker.
//!
//! Emulated reads arrive on host threads that must not do file I/O themselves. Each read is
//! parked in the one shared [`Transfer`] slot, a dedicated worker thread performs it, and the
//! caller is woken with the result.
//!
//! The slot moves through `Vacant -> Requested -> InFlight -> Completed -> Vacant`. Only the
//! caller that filled the slot may collect the completion; other callers wait for the slot to
//! become vacant again, so at most one transfer is ever live.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use thiserror::Error;
use vmmc_host::HostAddr;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("read channel is closed")]
    Closed,

    #[error("failed to start read worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// One read request and, once completed, its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub ctx_part: HostAddr,
    pub sector: u32,
    pub sectors: u32,
    pub buffer: Vec<u8>,
}

/// Performs transfers on the worker thread.
pub trait TransferHandler: Send + 'static {
    /// Fills `transfer.buffer` and returns the host status word.
    fn handle(&mut self, transfer: &mut Transfer) -> i32;
}

impl<F> TransferHandler for F
where
    F: FnMut(&mut Transfer) -> i32 + Send + 'static,
{
    fn handle(&mut self, transfer: &mut Transfer) -> i32 {
        self(transfer)
    }
}

#[derive(Debug)]
enum Slot {
    Vacant,
    Requested(Transfer),
    InFlight,
    Completed(Transfer, i32),
}

#[derive(Debug)]
struct State {
    slot: Slot,
    closed: bool,
    completed: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    request: Condvar,
    response: Condvar,
    vacancy: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("read channel lock poisoned; continuing");
                poisoned.into_inner()
            }
        }
    }

    fn wait<'a>(&self, cond: &Condvar, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        match cond.wait(guard) {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("read channel wait failed on poisoned lock; continuing");
                poisoned.into_inner()
            }
        }
    }
}

/// Handle to the channel and its worker. Dropping it closes the channel and joins the worker.
#[derive(Debug)]
pub struct ReadChannel {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReadChannel {
    /// Starts a worker thread called `name` that serves transfers with `handler`.
    pub fn spawn(name: &str, handler: impl TransferHandler) -> Result<Self, ChannelError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                slot: Slot::Vacant,
                closed: false,
                completed: 0,
            }),
            request: Condvar::new(),
            response: Condvar::new(),
            vacancy: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || worker_loop(&worker_shared, handler))?;
        tracing::debug!(worker = name, "read worker started");
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Hands `transfer` to the worker and blocks until its result is delivered.
    ///
    /// There is no timeout: a worker that never finishes blocks the caller.
    pub fn submit(&self, transfer: Transfer) -> Result<(Transfer, i32), ChannelError> {
        let shared = &*self.shared;
        let mut state = shared.lock();
        while !state.closed && !matches!(state.slot, Slot::Vacant) {
            state = shared.wait(&shared.vacancy, state);
        }
        if state.closed {
            return Err(ChannelError::Closed);
        }
        state.slot = Slot::Requested(transfer);
        shared.request.notify_one();

        // Once the worker has taken the transfer its result is always delivered here, even if
        // the channel closes meanwhile.
        loop {
            match std::mem::replace(&mut state.slot, Slot::Vacant) {
                Slot::Completed(transfer, result) => {
                    state.completed += 1;
                    shared.vacancy.notify_one();
                    return Ok((transfer, result));
                }
                Slot::Requested(_) if state.closed => {
                    shared.vacancy.notify_all();
                    return Err(ChannelError::Closed);
                }
                other => state.slot = other,
            }
            state = shared.wait(&shared.response, state);
        }
    }

    /// Reads `sectors` sectors at `sector` of `ctx_part` into `buf` on the worker thread.
    pub fn read(
        &self,
        ctx_part: HostAddr,
        sector: u32,
        buf: &mut [u8],
        sectors: u32,
    ) -> Result<i32, ChannelError> {
        let transfer = Transfer {
            ctx_part,
            sector,
            sectors,
            buffer: vec![0u8; buf.len()],
        };
        let (transfer, result) = self.submit(transfer)?;
        let n = transfer.buffer.len().min(buf.len());
        buf[..n].copy_from_slice(&transfer.buffer[..n]);
        Ok(result)
    }

    /// Number of transfers delivered back to their callers.
    pub fn completed(&self) -> u64 {
        self.shared.lock().completed
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Closes the channel and joins the worker.
    ///
    /// A transfer the worker has already taken finishes and its caller gets the result. Callers
    /// whose transfer was never taken, and all future callers, get [`ChannelError::Closed`].
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.request.notify_all();
        self.shared.response.notify_all();
        self.shared.vacancy.notify_all();

        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("read worker panicked");
            }
        }
    }
}

impl Drop for ReadChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(shared: &Shared, mut handler: impl TransferHandler) {
    let mut state = shared.lock();
    loop {
        if state.closed {
            break;
        }
        let mut transfer = match std::mem::replace(&mut state.slot, Slot::InFlight) {
            Slot::Requested(transfer) => transfer,
            other => {
                state.slot = other;
                state = shared.wait(&shared.request, state);
                continue;
            }
        };
        drop(state);

        tracing::trace!(
            sector = transfer.sector,
            sectors = transfer.sectors,
            "read worker serving transfer"
        );
        let result = handler.handle(&mut transfer);

        state = shared.lock();
        state.slot = Slot::Completed(transfer, result);
        shared.response.notify_one();
    }
    tracing::debug!("read worker stopped");
}
