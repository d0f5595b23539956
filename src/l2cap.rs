//! L2CAP channel handle: a stream-oriented channel identified by a PSM, distinct from GATT
//! attributes. The emulator models only identity and lifecycle (publish / unpublish / open);
//! no byte-stream I/O is simulated, matching the attribute layer's treatment of values as
//! opaque byte buffers.

use crate::identifier::PeripheralId;

/// A logical handle to an opened L2CAP channel: the PSM it was opened against, the
/// publishing peripheral, and a per-peripheral channel identifier distinguishing concurrent
/// opens of the same PSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capChannel {
    pub psm: u16,
    pub peripheral: PeripheralId,
    pub channel_id: u32,
}
