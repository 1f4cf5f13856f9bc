// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

use ethereum_types::U256;

use super::VmError;

/// Growth ceiling. Offsets past this fail the execution instead of
/// letting hostile bytecode balloon the allocation.
const MEMORY_LIMIT: usize = 1 << 24;

/// Byte-addressed, zero-initialised, auto-growing memory.
#[derive(Debug, Default)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory { data: Vec::new() }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Read the 32-byte word at `offset`, growing as needed.
    pub fn load(&mut self, offset: U256) -> Result<U256, VmError> {
        let offset = self.checked_offset(offset)?;
        self.grow(offset + 32);
        Ok(U256::from_big_endian(&self.data[offset..offset + 32]))
    }

    /// Write `value` as a 32-byte word at `offset`.
    pub fn store(&mut self, offset: U256, value: U256) -> Result<(), VmError> {
        let offset = self.checked_offset(offset)?;
        self.grow(offset + 32);
        value.to_big_endian(&mut self.data[offset..offset + 32]);
        Ok(())
    }

    fn checked_offset(&self, offset: U256) -> Result<usize, VmError> {
        if offset > U256::from(MEMORY_LIMIT - 32) {
            return Err(VmError::MemoryOutOfBounds);
        }
        Ok(offset.low_u64() as usize)
    }

    fn grow(&mut self, to: usize) {
        if self.data.len() < to {
            self.data.resize(to, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_memory_reads_zero() {
        let mut memory = Memory::new();
        assert_eq!(memory.load(U256::from(64)).unwrap(), U256::zero());
    }

    #[test]
    fn store_load_round_trip() {
        let mut memory = Memory::new();
        memory.store(U256::from(32), U256::from(0xdead)).unwrap();
        assert_eq!(memory.load(U256::from(32)).unwrap(), U256::from(0xdead));
        assert_eq!(memory.size(), 64);
    }

    #[test]
    fn rejects_huge_offsets() {
        let mut memory = Memory::new();
        assert!(matches!(
            memory.store(U256::MAX, U256::one()),
            Err(VmError::MemoryOutOfBounds)
        ));
    }
}
