//! Packing state for non-contiguous origin buffers.
//!
//! A segment views `count` instances of a layout laid out in an origin
//! buffer as one packed byte stream, and selects the window
//! `[first, last)` of that stream. Streaming units of a derived origin
//! each get their own window.

use bytes::Bytes;

use ridge_core::layout::Datatype;

use crate::error::IssueError;

#[derive(Debug, Clone)]
pub struct Segment {
    data: Bytes,
    datatype: Datatype,
    count: usize,
    first: usize,
    last: usize,
}

impl Segment {
    pub fn new(
        data: Bytes,
        datatype: Datatype,
        count: usize,
        first: usize,
        last: usize,
    ) -> Result<Self, IssueError> {
        let total = count * datatype.size();
        if first > last || last > total {
            return Err(IssueError::OutOfBounds {
                offset: first as i64,
                end: last as i64,
                have: total,
            });
        }
        Ok(Self {
            data,
            datatype,
            count,
            first,
            last,
        })
    }

    pub fn first(&self) -> usize {
        self.first
    }

    pub fn last(&self) -> usize {
        self.last
    }

    /// Packed length of the window.
    pub fn len(&self) -> usize {
        self.last - self.first
    }

    pub fn is_empty(&self) -> bool {
        self.first == self.last
    }

    pub fn datatype(&self) -> &Datatype {
        &self.datatype
    }

    pub fn pack(&self) -> Result<Vec<u8>, IssueError> {
        let mut out = Vec::new();
        out.try_reserve_exact(self.len())
            .map_err(|_| IssueError::NoMem("pack buffer"))?;
        self.pack_into(&mut out)?;
        Ok(out)
    }

    /// Append the packed window to `out`.
    pub fn pack_into(&self, out: &mut Vec<u8>) -> Result<(), IssueError> {
        if self.is_empty() {
            return Ok(());
        }
        let layout = match &self.datatype {
            Datatype::Basic(_) => {
                let bytes = self.origin_range(self.first as i64, self.len())?;
                out.extend_from_slice(bytes);
                return Ok(());
            }
            Datatype::Derived(layout) => layout,
        };

        let size = layout.size();
        let extent = layout.extent();
        let esize = layout.basic_type().size();

        // Skip whole instances that end before the window.
        let mut element = self.first / size;
        let mut pos = element * size;

        while pos < self.last && element < self.count {
            let base = element as i64 * extent;
            for block in layout.blocks() {
                let blen = block.len * esize;
                let start = pos.max(self.first);
                let end = (pos + blen).min(self.last);
                if start < end {
                    let src = base + block.disp + (start - pos) as i64;
                    out.extend_from_slice(self.origin_range(src, end - start)?);
                }
                pos += blen;
                if pos >= self.last {
                    break;
                }
            }
            element += 1;
        }
        Ok(())
    }

    fn origin_range(&self, offset: i64, len: usize) -> Result<&[u8], IssueError> {
        let end = offset + len as i64;
        if offset < 0 || end as usize > self.data.len() {
            return Err(IssueError::OutOfBounds {
                offset,
                end,
                have: self.data.len(),
            });
        }
        Ok(&self.data[offset as usize..end as usize])
    }
}
