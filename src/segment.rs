use crate::ident::PageId;
use anyhow::{bail, Result};
use std::sync::atomic::{AtomicI64, Ordering};

/// A table of pages, each holding one integer.
///
/// The segment does no locking of its own. Readers and writers are expected to
/// hold the matching page lock; a read-modify-write without an exclusive lock
/// can lose updates.
#[derive(Debug)]
pub struct Segment {
    segment_id: u32,
    capacity: u32,
    pages: Vec<AtomicI64>,
}

impl Segment {
    pub fn new(segment_id: u32, capacity: u32) -> Self {
        Self {
            segment_id,
            capacity,
            pages: (0..capacity).map(|_| AtomicI64::new(0)).collect(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn page_id(&self, page_no: u32) -> PageId {
        PageId::new(self.segment_id, page_no)
    }

    pub fn page_ids(&self) -> Vec<PageId> {
        (0..self.capacity).map(|no| self.page_id(no)).collect()
    }

    fn slot(&self, pid: &PageId) -> Result<&AtomicI64> {
        if pid.table_id != self.segment_id {
            bail!("Page {} does not belong to segment {}", pid, self.segment_id);
        }
        match self.pages.get(pid.page_no as usize) {
            Some(slot) => Ok(slot),
            None => bail!("Page {} out of range. capacity {}", pid, self.capacity),
        }
    }

    pub fn read(&self, pid: &PageId) -> Result<i64> {
        Ok(self.slot(pid)?.load(Ordering::Acquire))
    }

    pub fn write(&self, pid: &PageId, new_value: i64) -> Result<()> {
        self.slot(pid)?.store(new_value, Ordering::Release);
        Ok(())
    }

    pub fn total(&self) -> i64 {
        self.pages.iter().map(|v| v.load(Ordering::Acquire)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_read_write() {
        let segment = Segment::new(3, 3);
        let pid = segment.page_id(1);
        assert_eq!(0, segment.read(&pid).unwrap());
        segment.write(&pid, 10).unwrap();
        segment.write(&segment.page_id(2), 4).unwrap();
        assert_eq!(14, segment.total());
        assert_eq!(3, segment.capacity());
        assert_eq!(3, segment.page_ids().len());
    }

    #[test]
    pub fn test_foreign_page_rejected() {
        let segment = Segment::new(3, 2);
        assert!(segment.read(&PageId::new(4, 0)).is_err());
        assert!(segment.write(&PageId::new(3, 2), 1).is_err());
        assert!(segment.read(&PageId::new(3, u32::MAX)).is_err());
    }
}
