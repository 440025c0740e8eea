use crate::types::Address;

use arrayvec::ArrayVec;

/// Depth of the per-request auxiliary offset stack.
pub const SCATTER_STACK_DEPTH: usize = 8;

/// A single element of a scatter-gather memory operation.
///
/// A batch of requests is handed to
/// [`DeviceMemory::read_scatter`](../phys/trait.DeviceMemory.html#tymethod.read_scatter)
/// or `write_scatter`. Each request is processed independently: its
/// completion flag starts out unset and is set exactly once on success.
/// A request that fails validation or transfer keeps the flag unset;
/// it is never rolled back and never aborts the rest of the batch.
///
/// The auxiliary stack is a small fixed-depth value stack used by chunked
/// transports to pass intra-transfer byte offsets between layers.
pub struct ScatterRequest<'a> {
    /// Physical address of the request.
    pub addr: Address,
    /// Caller-owned destination (read) or source (write) buffer.
    pub buf: &'a mut [u8],
    completed: bool,
    stack: ArrayVec<[u64; SCATTER_STACK_DEPTH]>,
}

impl<'a> ScatterRequest<'a> {
    pub fn new(addr: Address, buf: &'a mut [u8]) -> Self {
        Self {
            addr,
            buf,
            completed: false,
            stack: ArrayVec::new(),
        }
    }

    /// Length of the request in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the completion flag of this request.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Marks the request as completed.
    ///
    /// The flag is set-once; calling this again is a no-op.
    pub fn set_completed(&mut self) {
        self.completed = true;
    }

    /// Pushes a value onto the auxiliary stack.
    ///
    /// Pushing beyond the fixed depth is a caller bug and panics.
    pub fn stack_push(&mut self, value: u64) {
        self.stack.push(value);
    }

    /// Pops the top value off the auxiliary stack, 0 if empty.
    pub fn stack_pop(&mut self) -> u64 {
        self.stack.pop().unwrap_or(0)
    }

    /// Returns the top value of the auxiliary stack, 0 if empty.
    pub fn stack_peek(&self) -> u64 {
        self.stack.last().copied().unwrap_or(0)
    }

    /// Adds `delta` to the top value of the auxiliary stack.
    pub fn stack_add(&mut self, delta: u64) {
        if let Some(top) = self.stack.last_mut() {
            *top += delta;
        }
    }
}
