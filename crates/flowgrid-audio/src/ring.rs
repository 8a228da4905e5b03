//! Lock-free rings coupling device callbacks to the render graph.
//!
//! Input devices capture into the producer half from their own callback
//! thread; the render graph's capture unit drains the consumer half.
//! Secondary output devices work the other way around, reading frames the
//! render graph tapped off for them.

use ringbuf::HeapRb;
use ringbuf::traits::Split;
use ringbuf::{HeapCons, HeapProd};

/// Minimum buffered duration, in milliseconds, at the faster of the two
/// rates being bridged.
const MIN_BUFFER_MS: usize = 100;

/// Allocates a duplex ring sized for bridging `native_rate` and
/// `client_rate` with `channels` interleaved channels.
///
/// The capacity covers at least [`MIN_BUFFER_MS`] at the faster rate, so a
/// rate mismatch between the device clock and the graph clock cannot
/// starve or overrun the ring within one scheduling quantum.
pub fn duplex_ring(
    native_rate: u32,
    client_rate: u32,
    channels: usize,
) -> (HeapProd<f32>, HeapCons<f32>) {
    let faster = native_rate.max(client_rate).max(8_000) as usize;
    let frames = faster * MIN_BUFFER_MS / 1000;
    let capacity = (frames * channels.max(1)).next_power_of_two();
    HeapRb::<f32>::new(capacity).split()
}
