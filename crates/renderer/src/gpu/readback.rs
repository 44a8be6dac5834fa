use crossbeam_channel::{Receiver, Sender, TryRecvError};
use metering::{ReadbackError, ReductionResult};

/// Staging buffers in flight at once. A dispatch that finds every slot busy is
/// skipped rather than waited for.
pub(crate) const READBACK_SLOTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// Copy recorded, waiting for submission.
    Reserved { sequence: u64, size: u64 },
    /// `map_async` issued, waiting for its callback.
    Mapping { sequence: u64, size: u64 },
}

struct ReadbackSlot {
    buffer: Option<wgpu::Buffer>,
    capacity: u64,
    state: SlotState,
}

struct Completion {
    slot: usize,
    sequence: u64,
    result: Result<(), wgpu::BufferAsyncError>,
}

/// A reserved slot: where the reducer copies its output.
pub(crate) struct ReadbackTicket<'a> {
    pub slot: usize,
    pub sequence: u64,
    pub buffer: &'a wgpu::Buffer,
}

/// Ring of mappable staging buffers carrying reduction outputs back to the CPU.
///
/// Map callbacks only post a [`Completion`] on a channel; the frame loop
/// drains the channel after a non-blocking poll, so nothing here ever waits on
/// the GPU.
pub(crate) struct ReadbackRing {
    slots: Vec<ReadbackSlot>,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    next_sequence: u64,
    latest_delivered: Option<u64>,
}

impl ReadbackRing {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let slots = (0..READBACK_SLOTS)
            .map(|_| ReadbackSlot {
                buffer: None,
                capacity: 0,
                state: SlotState::Free,
            })
            .collect();
        Self {
            slots,
            sender,
            receiver,
            next_sequence: 0,
            latest_delivered: None,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state != SlotState::Free)
            .count()
    }

    /// Reserves a free slot large enough for `size` bytes, growing its buffer
    /// if needed. Returns `None` when every slot is in flight.
    pub fn reserve(&mut self, device: &wgpu::Device, size: u64) -> Option<ReadbackTicket<'_>> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.state == SlotState::Free)?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let slot = &mut self.slots[index];
        if slot.buffer.is_none() || slot.capacity < size {
            if let Some(previous) = slot.buffer.take() {
                previous.destroy();
            }
            tracing::debug!(slot = index, size, "allocating readback staging buffer");
            slot.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("luminance readback"),
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }));
            slot.capacity = size;
        }
        slot.state = SlotState::Reserved { sequence, size };
        let buffer = slot.buffer.as_ref()?;
        Some(ReadbackTicket {
            slot: index,
            sequence,
            buffer,
        })
    }

    /// Issues the asynchronous map for a slot whose copy has been submitted.
    pub fn begin_map(&mut self, slot_index: usize) {
        let Some(slot) = self.slots.get_mut(slot_index) else {
            return;
        };
        let SlotState::Reserved { sequence, size } = slot.state else {
            return;
        };
        let Some(buffer) = slot.buffer.as_ref() else {
            slot.state = SlotState::Free;
            return;
        };
        slot.state = SlotState::Mapping { sequence, size };

        let sender = self.sender.clone();
        buffer
            .slice(..size)
            .map_async(wgpu::MapMode::Read, move |result| {
                // The ring may already be gone; nothing is listening then.
                let _ = sender.send(Completion {
                    slot: slot_index,
                    sequence,
                    result,
                });
            });
    }

    /// Returns a reserved slot whose copy never got submitted.
    pub fn release(&mut self, slot_index: usize) {
        if let Some(slot) = self.slots.get_mut(slot_index) {
            if matches!(slot.state, SlotState::Reserved { .. }) {
                slot.state = SlotState::Free;
            }
        }
    }

    /// Collects every readback whose map callback has fired since the last
    /// call. A readback older than one already delivered comes back as
    /// [`ReadbackError::Superseded`].
    pub fn drain(&mut self) -> Vec<Result<ReductionResult, ReadbackError>> {
        let mut delivered = Vec::new();
        loop {
            let completion = match self.receiver.try_recv() {
                Ok(completion) => completion,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            if let Some(outcome) = self.finish(completion) {
                delivered.push(outcome);
            }
        }
        delivered
    }

    fn finish(&mut self, completion: Completion) -> Option<Result<ReductionResult, ReadbackError>> {
        let slot = self.slots.get_mut(completion.slot)?;
        let SlotState::Mapping { sequence, size } = slot.state else {
            return None;
        };
        if sequence != completion.sequence {
            return None;
        }
        slot.state = SlotState::Free;
        let buffer = slot.buffer.as_ref()?;

        if let Err(err) = completion.result {
            return Some(Err(ReadbackError::Map(err.to_string())));
        }

        let scalars: Vec<f32> = {
            let view = buffer.slice(..size).get_mapped_range();
            view.chunks_exact(4)
                .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                .collect()
        };
        buffer.unmap();

        if let Err(err) = check_order(self.latest_delivered, sequence) {
            return Some(Err(err));
        }
        self.latest_delivered = Some(sequence);
        Some(Ok(ReductionResult::from_scalars(&scalars)))
    }

    /// Drops every staging buffer. Pending maps resolve with an error that no
    /// one reads.
    pub fn destroy(&mut self) {
        for slot in &mut self.slots {
            if let Some(buffer) = slot.buffer.take() {
                buffer.destroy();
            }
            slot.capacity = 0;
            slot.state = SlotState::Free;
        }
        while self.receiver.try_recv().is_ok() {}
    }
}

/// Last-write-wins by dispatch sequence: anything older than the newest
/// delivered readback is stale.
fn check_order(latest: Option<u64>, sequence: u64) -> Result<(), ReadbackError> {
    match latest {
        Some(latest) if sequence < latest => Err(ReadbackError::Superseded { sequence, latest }),
        _ => Ok(()),
    }
}
