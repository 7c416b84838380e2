//! # Fuzz input
//!
//! A cursor over the engine's buffer. Every read is total: numeric reads
//! past the end yield zero, `take` returns whatever is left. An empty or
//! truncated buffer is therefore always a well-formed (if short) action
//! sequence rather than an error.
//!
//! All integers are big-endian, matching the wire format.

#[derive(Clone, Debug)]
pub struct FuzzInput<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FuzzInput<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        FuzzInput { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Up to `n` bytes; fewer only once the input runs out.
    pub fn take(&mut self, n: usize) -> &'a [u8] {
        let end = self.pos.saturating_add(n).min(self.data.len());
        let out = &self.data[self.pos..end];
        self.pos = end;
        out
    }

    /// Exactly `N` bytes or nothing. The cursor still advances past whatever
    /// was there, so a truncated key ends the run.
    pub fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N).try_into().ok()
    }

    pub fn take_rest(&mut self) -> &'a [u8] {
        self.take(self.remaining())
    }

    fn take_be<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        let got = self.take(N);
        out[..got.len()].copy_from_slice(got);
        out
    }

    pub fn take_u8(&mut self) -> u8 {
        self.take_be::<1>()[0]
    }

    pub fn take_bool(&mut self) -> bool {
        self.take_u8() & 1 == 1
    }

    pub fn take_u16(&mut self) -> u16 {
        u16::from_be_bytes(self.take_be())
    }

    pub fn take_u24(&mut self) -> u32 {
        let b = self.take_be::<3>();
        u32::from_be_bytes([0, b[0], b[1], b[2]])
    }

    pub fn take_u32(&mut self) -> u32 {
        u32::from_be_bytes(self.take_be())
    }

    pub fn take_u64(&mut self) -> u64 {
        u64::from_be_bytes(self.take_be())
    }

    /// A `u8` length followed by at most `min(len, cap)` bytes.
    pub fn take_len_prefixed(&mut self, cap: usize) -> &'a [u8] {
        let len = self.take_u8() as usize;
        self.take(len.min(cap))
    }

    /// A `u16` length followed by at most `min(len, cap)` bytes.
    pub fn take_u16_len_prefixed(&mut self, cap: usize) -> &'a [u8] {
        let len = self.take_u16() as usize;
        self.take(len.min(cap))
    }

    /// An index into a collection of `len` items, or `None` if it is empty.
    pub fn take_index(&mut self, len: usize) -> Option<usize> {
        let b = self.take_u8() as usize;
        (len > 0).then(|| b % len)
    }
}
