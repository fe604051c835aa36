/// Reorders out-of-order STREAM frame data into a contiguous byte sequence.
/// Overlapping or adjacent ranges are merged as they arrive.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    // kept sorted and non-overlapping by construction
    chunks: Vec<(u64, Vec<u8>)>,
    read_offset: u64,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk of stream data at `offset`, merging it with any
    /// overlapping or adjacent chunks already buffered.
    pub fn insert(&mut self, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let end = offset + data.len() as u64;
        if end <= self.read_offset {
            return; // entirely already delivered
        }

        let (offset, data) = if offset < self.read_offset {
            let skip = (self.read_offset - offset) as usize;
            (self.read_offset, &data[skip..])
        } else {
            (offset, data)
        };

        let mut merged_start = offset;
        let mut merged_end = offset + data.len() as u64;
        let mut merged_bytes = data.to_vec();

        let mut i = 0;
        while i < self.chunks.len() {
            let (chunk_start, chunk_data) = &self.chunks[i];
            let chunk_end = chunk_start + chunk_data.len() as u64;
            let overlaps = *chunk_start <= merged_end && chunk_end >= merged_start;
            if !overlaps {
                i += 1;
                continue;
            }

            let new_start = merged_start.min(*chunk_start);
            let mut combined = vec![0u8; (merged_end.max(chunk_end) - new_start) as usize];
            combined[(chunk_start - new_start) as usize..(chunk_start - new_start) as usize + chunk_data.len()]
                .copy_from_slice(chunk_data);
            combined[(merged_start - new_start) as usize..(merged_start - new_start) as usize + merged_bytes.len()]
                .copy_from_slice(&merged_bytes);

            merged_start = new_start;
            merged_end = merged_end.max(chunk_end);
            merged_bytes = combined;
            self.chunks.remove(i);
        }

        let insert_at = self
            .chunks
            .iter()
            .position(|(start, _)| *start > merged_start)
            .unwrap_or(self.chunks.len());
        self.chunks.insert(insert_at, (merged_start, merged_bytes));
    }

    /// Drain any bytes now contiguous from the current read offset.
    pub fn take_contiguous(&mut self) -> Vec<u8> {
        if self.chunks.is_empty() || self.chunks[0].0 != self.read_offset {
            return Vec::new();
        }
        let (_, data) = self.chunks.remove(0);
        self.read_offset += data.len() as u64;
        data
    }

    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delivers_in_order_data_immediately() {
        let mut buf = ReassemblyBuffer::new();
        buf.insert(0, b"hello");
        assert_eq!(buf.take_contiguous(), b"hello");
        assert_eq!(buf.read_offset(), 5);
    }

    #[test]
    fn holds_out_of_order_data_until_the_gap_fills() {
        let mut buf = ReassemblyBuffer::new();
        buf.insert(5, b"world");
        assert!(buf.take_contiguous().is_empty());
        buf.insert(0, b"hello");
        assert_eq!(buf.take_contiguous(), b"hello");
        assert_eq!(buf.take_contiguous(), b"world");
    }

    #[test]
    fn merges_overlapping_chunks() {
        let mut buf = ReassemblyBuffer::new();
        buf.insert(0, b"hel");
        buf.insert(2, b"llo");
        assert_eq!(buf.take_contiguous(), b"hello");
    }

    #[test]
    fn ignores_data_already_delivered() {
        let mut buf = ReassemblyBuffer::new();
        buf.insert(0, b"hello");
        buf.take_contiguous();
        buf.insert(0, b"hello"); // fully stale
        assert!(buf.take_contiguous().is_empty());
    }
}
