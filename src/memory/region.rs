// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Attached memory regions: the stub I/O-region interface for everything
//! outside the four owned buffers.

use core::ops::Range;

/// Capability set for a region the address space delegates to. Deliberately
/// minimal -- this is a stand-in, not a peripheral model.
pub trait IoRegion: core::fmt::Debug {
    fn read(&self, offset: u32) -> u8;
    fn write(&mut self, offset: u32, value: u8);
    fn range(&self) -> Range<u32>;
}

/// Always reads as a fixed byte; writes are accepted and dropped. Useful for
/// making a firmware's idle-loop peripheral polling return a constant
/// "ready" bit without modeling the peripheral.
#[derive(Debug, Clone)]
pub struct FixedValueRegion {
    range: Range<u32>,
    value: u8,
}

impl FixedValueRegion {
    pub fn new(range: Range<u32>, value: u8) -> Self {
        FixedValueRegion { range, value }
    }
}

impl IoRegion for FixedValueRegion {
    fn read(&self, _offset: u32) -> u8 {
        self.value
    }

    fn write(&mut self, _offset: u32, _value: u8) {}

    fn range(&self) -> Range<u32> {
        self.range.clone()
    }
}

/// A plain read/write byte buffer standing in for a peripheral block.
#[derive(Debug, Clone)]
pub struct RamBackedRegion {
    range: Range<u32>,
    bytes: Vec<u8>,
}

impl RamBackedRegion {
    pub fn new(range: Range<u32>) -> Self {
        let len = (range.end - range.start) as usize;
        RamBackedRegion {
            range,
            bytes: vec![0; len],
        }
    }
}

impl IoRegion for RamBackedRegion {
    fn read(&self, offset: u32) -> u8 {
        self.bytes.get(offset as usize).copied().unwrap_or(0)
    }

    fn write(&mut self, offset: u32, value: u8) {
        if let Some(slot) = self.bytes.get_mut(offset as usize) {
            *slot = value;
        }
    }

    fn range(&self) -> Range<u32> {
        self.range.clone()
    }
}

/// An ordered, non-overlapping list of attached regions. Lookup is by
/// ordered-range bisection: regions are owned here and referenced by index,
/// with no back-pointer to the address space.
#[derive(Debug, Default)]
pub struct RegionTable {
    regions: Vec<Box<dyn IoRegion>>,
}

impl RegionTable {
    pub fn new() -> Self {
        RegionTable {
            regions: Vec::new(),
        }
    }

    /// Inserts a region, keeping the table sorted by start address.
    pub fn attach(&mut self, region: Box<dyn IoRegion>) {
        let start = region.range().start;
        let pos = self
            .regions
            .partition_point(|r| r.range().start < start);
        self.regions.insert(pos, region);
    }

    /// Binary-searches for the region containing `addr`, if any.
    pub fn find(&self, addr: u32) -> Option<&dyn IoRegion> {
        let idx = self
            .regions
            .partition_point(|r| r.range().end <= addr);
        self.regions
            .get(idx)
            .filter(|r| r.range().contains(&addr))
            .map(|b| b.as_ref())
    }

    pub fn find_mut(&mut self, addr: u32) -> Option<&mut (dyn IoRegion + 'static)> {
        let idx = self
            .regions
            .partition_point(|r| r.range().end <= addr);
        self.regions
            .get_mut(idx)
            .filter(|r| r.range().contains(&addr))
            .map(|b| b.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_value_region_ignores_writes() {
        let mut region = FixedValueRegion::new(0x4000_0000..0x4000_1000, 0xAA);
        region.write(4, 0xFF);
        assert_eq!(region.read(4), 0xAA);
    }

    #[test]
    fn ram_backed_region_round_trips() {
        let mut region = RamBackedRegion::new(0x6000_0000..0x6000_0010);
        region.write(3, 0x42);
        assert_eq!(region.read(3), 0x42);
        assert_eq!(region.read(4), 0);
    }

    #[test]
    fn region_table_finds_by_ordered_range() {
        let mut table = RegionTable::new();
        table.attach(Box::new(FixedValueRegion::new(0x6000_0000..0x6000_1000, 1)));
        table.attach(Box::new(FixedValueRegion::new(0x5000_0000..0x5000_1000, 2)));
        assert_eq!(table.find(0x5000_0010).unwrap().read(0), 2);
        assert_eq!(table.find(0x6000_0010).unwrap().read(0), 1);
        assert!(table.find(0x5000_2000).is_none());
    }
}
