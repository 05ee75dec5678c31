//! Endpoint events dispatched out-of-band from the byte stream.
//!
//! spec.md §6 describes a single `SER_MODEMSTATE` event delivered to "the
//! stream consumer." This crate generalizes that to a
//! [`tokio::sync::broadcast`] channel so more than one consumer can observe
//! endpoint events (see DESIGN.md for this Open Question resolution),
//! mirroring how `gawd-ai-sctl` fans status out to multiple shell sessions.

/// An out-of-band event raised by a [`crate::endpoint::SerialEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialEvent {
    /// A masked modem-state sample (spec.md §4.5/§6). The value is the
    /// single significant byte of the 4-byte little-endian wire payload
    /// described in spec.md §6 — the upper 24 bits are always zero, so
    /// this crate exposes it unpacked rather than re-wrapping it in a
    /// 32-bit field.
    ModemState(u8),
}
