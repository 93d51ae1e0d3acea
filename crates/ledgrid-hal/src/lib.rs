#![no_std]

/// One physical LED chain bound to a transmit channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentChannel {
    /// Output GPIO number driving the chain.
    pub gpio: u8,
    /// Number of LEDs on the chain.
    pub led_count: u16,
}

/// Abstracts the per-segment LED transmit hardware (RMT, SPI, I2S, ...).
///
/// Implementations own one transmit channel per configured segment plus a
/// sync point so that all channels start a frame together. The output
/// pipeline guarantees single-producer use: it never re-submits a buffer
/// while a transmission that references it is still in flight.
pub trait StripDriver {
    type Error: core::fmt::Debug;

    /// Claim one transmit channel per segment. Called once before any
    /// transmit; a second call replaces the previous channel set.
    fn configure(&mut self, segments: &[SegmentChannel]) -> Result<(), Self::Error>;

    /// Start transmitting one wire-order buffer per segment with a
    /// synchronized start across all channels. `buffers.len()` matches the
    /// configured segment count; each buffer holds `led_count * 3` bytes
    /// already in hardware color order.
    fn begin_transmit(&mut self, buffers: &[&[u8]]) -> Result<(), Self::Error>;

    /// Block until every channel from the last `begin_transmit` is idle.
    /// A no-op when nothing is in flight.
    fn wait_complete(&mut self) -> Result<(), Self::Error>;

    /// Release all channels. Safe to call more than once.
    fn shutdown(&mut self);
}

/// Blob-oriented key/value persistence (NVS on the reference hardware).
///
/// A store is bound to one namespace at construction time; writes become
/// durable on `commit`.
pub trait KvStore {
    type Error: core::fmt::Debug;

    /// Size of the stored blob, or `None` when the key does not exist.
    fn get_blob_size(&mut self, key: &str) -> Result<Option<usize>, Self::Error>;

    /// Copy the blob into `buf`, returning the byte count. `buf` must hold
    /// at least `get_blob_size` bytes.
    fn get_blob(&mut self, key: &str, buf: &mut [u8]) -> Result<usize, Self::Error>;

    fn set_blob(&mut self, key: &str, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Remove the key. `Ok(false)` when it was not present.
    fn erase(&mut self, key: &str) -> Result<bool, Self::Error>;

    fn commit(&mut self) -> Result<(), Self::Error>;
}

/// Firmware image sink plus the reboot switch.
///
/// Mirrors an A/B partition updater: `begin`/`write`/`finish` stream one
/// image into the inactive slot and mark it bootable; `abort` discards a
/// partial write.
pub trait OtaUpdater {
    type Error: core::fmt::Debug;

    /// Capacity of the inactive image slot, or `None` when self-update is
    /// not possible on this platform.
    fn next_image_capacity(&mut self) -> Option<usize>;

    /// Open the inactive slot for an image of exactly `image_len` bytes.
    fn begin(&mut self, image_len: usize) -> Result<(), Self::Error>;

    /// Append the next chunk of image bytes.
    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error>;

    /// Validate the written image and select it for the next boot.
    fn finish(&mut self) -> Result<(), Self::Error>;

    /// Discard a partially written image. No-op when `begin` never ran.
    fn abort(&mut self);

    /// Confirm the currently running image after a successful boot so the
    /// bootloader cancels any pending rollback.
    fn mark_running_valid(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Restart the system. On hardware this does not return; hosted
    /// implementations may log and terminate the process instead.
    fn reboot(&mut self);
}
