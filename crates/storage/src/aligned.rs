//! Block-aligned, reusable byte buffer for journal sections.
//!
//! The buffer is built from `ALIGNMENT`-sized blocks whose memory alignment
//! equals their size, so the start of the buffer is always suitable for
//! unbuffered writes. `reset()` only rewinds the length; the blocks stay
//! allocated across commit cycles.

use byteorder::{ByteOrder, LittleEndian};

/// Alignment unit of journal sections, in bytes.
pub const ALIGNMENT: usize = 8192;

#[repr(C, align(8192))]
#[derive(Clone, Copy)]
struct Block([u8; ALIGNMENT]);

const ZERO_BLOCK: Block = Block([0; ALIGNMENT]);

/// Round `n` up to the next multiple of [`ALIGNMENT`].
pub fn aligned_len(n: usize) -> usize {
    (n + ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT
}

/// Growable buffer whose backing storage is aligned to [`ALIGNMENT`].
pub struct AlignedBuilder {
    blocks: Vec<Block>,
    len: usize,
}

impl AlignedBuilder {
    /// Create a builder with at least `capacity` bytes preallocated.
    pub fn with_capacity(capacity: usize) -> Self {
        let n = aligned_len(capacity.max(1)) / ALIGNMENT;
        AlignedBuilder {
            blocks: vec![ZERO_BLOCK; n],
            len: 0,
        }
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been written since the last reset.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes available without reallocating.
    pub fn capacity(&self) -> usize {
        self.blocks.len() * ALIGNMENT
    }

    /// Logically empty the buffer, keeping its storage.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Drop everything past `len`.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    /// The written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage()[..self.len]
    }

    /// Mutable view of already written bytes in `range`.
    pub fn slice_mut(&mut self, start: usize, end: usize) -> &mut [u8] {
        assert!(end <= self.len, "slice past builder length");
        &mut self.storage_mut()[start..end]
    }

    /// Append raw bytes.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        let start = self.grow(bytes.len());
        self.storage_mut()[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Append one byte.
    pub fn append_u8(&mut self, v: u8) {
        let start = self.grow(1);
        self.storage_mut()[start] = v;
    }

    /// Append a little-endian u16.
    pub fn append_u16(&mut self, v: u16) {
        let start = self.grow(2);
        LittleEndian::write_u16(&mut self.storage_mut()[start..start + 2], v);
    }

    /// Append a little-endian u32.
    pub fn append_u32(&mut self, v: u32) {
        let start = self.grow(4);
        LittleEndian::write_u32(&mut self.storage_mut()[start..start + 4], v);
    }

    /// Append a little-endian u64.
    pub fn append_u64(&mut self, v: u64) {
        let start = self.grow(8);
        LittleEndian::write_u64(&mut self.storage_mut()[start..start + 8], v);
    }

    /// Reserve `n` zeroed bytes and return their offset, for later patching.
    pub fn skip(&mut self, n: usize) -> usize {
        let start = self.grow(n);
        self.storage_mut()[start..start + n].fill(0);
        start
    }

    /// Reserve `n` bytes and return them for the caller to fill.
    pub fn reserve_mut(&mut self, n: usize) -> &mut [u8] {
        let start = self.grow(n);
        &mut self.storage_mut()[start..start + n]
    }

    /// Zero-fill up to the next multiple of [`ALIGNMENT`].
    pub fn pad_to_alignment(&mut self) {
        let target = aligned_len(self.len);
        if target > self.len {
            self.skip(target - self.len);
        }
    }

    // Extend len by n, adding blocks when needed; returns the old len.
    fn grow(&mut self, n: usize) -> usize {
        let start = self.len;
        let needed = start + n;
        if needed > self.capacity() {
            let want = aligned_len(needed.max(self.capacity() * 2)) / ALIGNMENT;
            self.blocks.resize(want, ZERO_BLOCK);
        }
        self.len = needed;
        start
    }

    fn storage(&self) -> &[u8] {
        // SAFETY: Block is repr(C) around a byte array with size equal to its
        // alignment, so the block vector is a contiguous run of initialized
        // bytes of exactly blocks.len() * ALIGNMENT.
        unsafe {
            std::slice::from_raw_parts(
                self.blocks.as_ptr() as *const u8,
                self.blocks.len() * ALIGNMENT,
            )
        }
    }

    fn storage_mut(&mut self) -> &mut [u8] {
        // SAFETY: see storage(); the unique borrow of self covers the blocks.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.blocks.as_mut_ptr() as *mut u8,
                self.blocks.len() * ALIGNMENT,
            )
        }
    }
}

impl std::fmt::Debug for AlignedBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuilder")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}
