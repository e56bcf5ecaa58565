//! Memory cell store.
//!
//! A flat block of signed 64-bit cells holding the program, its data and the
//! stack at once. The block is owned by the caller; the VM only borrows it
//! and never grows or shrinks it.

use thiserror::Error;

/// Borrowed memory block.
pub struct Memory<'m> {
    cells: &'m mut [i64],
}

impl<'m> Memory<'m> {
    /// Wrap a caller-owned block. Its length is the VM's `max_mem`.
    pub fn new(cells: &'m mut [i64]) -> Self {
        Self { cells }
    }

    /// Number of cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the block has no cells at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Read cell `addr`.
    #[inline]
    pub fn read(&self, addr: i64) -> Result<i64, MemoryError> {
        let index = self.index(addr)?;
        Ok(self.cells[index])
    }

    /// Write cell `addr`.
    #[inline]
    pub fn write(&mut self, addr: i64, value: i64) -> Result<(), MemoryError> {
        let index = self.index(addr)?;
        self.cells[index] = value;
        Ok(())
    }

    /// Read cell `addr`, or `None` past either end.
    #[inline]
    pub fn get(&self, addr: i64) -> Option<i64> {
        self.index(addr).ok().map(|index| self.cells[index])
    }

    /// Up to `len` cells starting at `addr`, cut short at the end of memory.
    pub fn window(&self, addr: i64, len: usize) -> Result<&[i64], MemoryError> {
        let start = self.index(addr)?;
        let end = start.saturating_add(len).min(self.cells.len());
        Ok(&self.cells[start..end])
    }

    fn index(&self, addr: i64) -> Result<usize, MemoryError> {
        usize::try_from(addr)
            .ok()
            .filter(|&i| i < self.cells.len())
            .ok_or(MemoryError::AddressOutOfRange { addr, size: self.cells.len() })
    }

    /// All cells.
    pub fn cells(&self) -> &[i64] {
        &self.cells[..]
    }

    /// Zero every cell.
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    /// Copy an image into memory starting at `start`.
    pub fn load_image(&mut self, start: usize, image: &[i64]) -> Result<(), MemoryError> {
        let available = self.cells.len().saturating_sub(start);
        if image.len() > available {
            return Err(MemoryError::ImageTooLarge {
                size: image.len(),
                available,
            });
        }

        self.cells[start..start + image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Dump `(address, value)` pairs (for debugging).
    pub fn dump(&self, start: usize, count: usize) -> Vec<(usize, i64)> {
        let end = start.saturating_add(count).min(self.cells.len());
        (start.min(end)..end)
            .map(|i| (i, self.cells[i]))
            .collect()
    }
}

impl std::fmt::Debug for Memory<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.cells.iter().filter(|&&cell| cell != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &self.cells.len())
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Address is outside the block.
    #[error("memory address {addr} out of range (0-{})", .size.saturating_sub(1))]
    AddressOutOfRange { addr: i64, size: usize },

    /// Image does not fit in the block.
    #[error("image size {size} exceeds available space {available}")]
    ImageTooLarge { size: usize, available: usize },
}
