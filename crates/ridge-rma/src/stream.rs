//! Streaming decomposition for accumulate-family operations.
//!
//! A large accumulate is cut into units of at most `budget` bytes, measured
//! in whole elements of the predefined type underneath the layout. Units
//! partition `[0, total_bytes)` in order. Each unit travels as its own
//! packet carrying its byte offset in an extended header.

use ridge_core::layout::Datatype;
use ridge_core::wire::PktFlags;

use crate::error::IssueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamUnit {
    pub index: usize,
    /// Byte offset into the packed payload.
    pub offset: usize,
    pub size: usize,
}

impl StreamUnit {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPlan {
    total_bytes: usize,
    basic_size: usize,
    basic_count: usize,
    elements_per_unit: usize,
    unit_count: usize,
}

impl StreamPlan {
    /// Plan `count` instances of `datatype` against a byte budget per unit.
    pub fn new(count: usize, datatype: &Datatype, budget: usize) -> Result<Self, IssueError> {
        let total_bytes = count * datatype.size();
        let basic = datatype.basic_type();
        let basic_size = basic.size();
        // predefined types have extent equal to size
        let basic_extent = basic_size;

        if total_bytes == 0 {
            return Err(IssueError::InvalidLayout("empty payload cannot be streamed"));
        }
        let basic_count = total_bytes / basic_size;
        let elements_per_unit = budget / basic_extent;
        if elements_per_unit == 0 {
            return Err(IssueError::InvalidLayout(
                "stream budget is smaller than one element",
            ));
        }
        let unit_count = (basic_count - 1) / elements_per_unit + 1;

        Ok(Self {
            total_bytes,
            basic_size,
            basic_count,
            elements_per_unit,
            unit_count,
        })
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn basic_count(&self) -> usize {
        self.basic_count
    }

    pub fn elements_per_unit(&self) -> usize {
        self.elements_per_unit
    }

    pub fn unit_count(&self) -> usize {
        self.unit_count
    }

    /// More than one unit: packets carry STREAM and an offset header.
    pub fn is_streamed(&self) -> bool {
        self.unit_count > 1
    }

    pub fn unit(&self, index: usize) -> StreamUnit {
        let stride = self.elements_per_unit * self.basic_size;
        let offset = index * stride;
        StreamUnit {
            index,
            offset,
            size: stride.min(self.total_bytes.saturating_sub(offset)),
        }
    }

    /// Units from `start` to the end, in order.
    pub fn units_from(&self, start: usize) -> impl Iterator<Item = StreamUnit> + '_ {
        (start..self.unit_count).map(move |j| self.unit(j))
    }
}

/// Flags for unit `index` of `unit_count`: lock bits only on the first
/// unit, end bits only on the last.
pub fn unit_flags(base: PktFlags, index: usize, unit_count: usize) -> PktFlags {
    let mut flags = base;
    if index != 0 {
        flags.remove(PktFlags::LOCK_MASK);
    }
    if index + 1 != unit_count {
        flags.remove(PktFlags::END_MASK);
    }
    flags
}
