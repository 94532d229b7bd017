//! Adler-32 checksum engine
//!
//! Every section descriptor and every uncompressed chunk trailer carries an
//! Adler-32 value. The sum must byte-match the trailer a zlib stream ends
//! with, so that a compressed chunk's own trailer can serve as its CRC.

const MOD_ADLER: u32 = 65521;

/// Largest number of bytes that can be summed before the 32-bit
/// accumulators must be reduced modulo 65521.
const NMAX: usize = 5552;

/// Streaming Adler-32 state
#[derive(Debug, Clone)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Adler32 {
    /// Create a fresh checksum state
    pub fn new() -> Self {
        Self { a: 1, b: 0 }
    }

    /// Feed a byte range into the checksum
    pub fn update(&mut self, data: &[u8]) {
        for block in data.chunks(NMAX) {
            for &byte in block {
                self.a += u32::from(byte);
                self.b += self.a;
            }
            self.a %= MOD_ADLER;
            self.b %= MOD_ADLER;
        }
    }

    /// Finish and return the checksum value
    pub fn finish(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// One-shot Adler-32 over a byte range
pub fn adler32(data: &[u8]) -> u32 {
    let mut state = Adler32::new();
    state.update(data);
    state.finish()
}
