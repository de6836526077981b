//! Reassembly of raw output chunks at read boundaries
//!
//! Reads from a pipe or pseudo-terminal can cut a multi-byte UTF-8 character or
//! an escape sequence in half. The assembler holds back such an incomplete tail
//! and prepends it to the next chunk, so the filter always sees whole sequences.

/// Longest escape-sequence tail that is held back
pub const MAX_PENDING_ESCAPE: usize = 256;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

#[derive(Debug, Default)]
pub struct ChunkAssembler {
    pending: Vec<u8>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the text that is complete so far
    pub fn push(&mut self, bytes: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);

        let complete_utf8 = utf8_complete_len(&data);
        let split = match incomplete_escape_start(&data[..complete_utf8]) {
            Some(start) if complete_utf8 - start <= MAX_PENDING_ESCAPE => start,
            _ => complete_utf8,
        };

        self.pending = data.split_off(split);
        String::from_utf8_lossy(&data).into_owned()
    }

    /// Emit whatever is still held back (end of stream)
    pub fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Length of the prefix of `data` that does not end inside a UTF-8 code point
fn utf8_complete_len(data: &[u8]) -> usize {
    let len = data.len();
    for back in 1..=len.min(3) {
        let byte = data[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            // continuation byte, keep looking for the lead byte
            continue;
        }
        let needed = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => 1,
        };
        return if needed > back { len - back } else { len };
    }
    len
}

/// Offset of the first escape sequence in `data` that is not terminated yet
fn incomplete_escape_start(data: &[u8]) -> Option<usize> {
    let window_start = data.len().saturating_sub(MAX_PENDING_ESCAPE);
    let mut pos = window_start;
    while pos < data.len() {
        if data[pos] != ESC {
            pos += 1;
            continue;
        }
        match sequence_end(data, pos) {
            Some(end) => pos = end,
            None => return Some(pos),
        }
    }
    None
}

/// End offset (exclusive) of the escape sequence starting at `start`, or `None`
/// when the data runs out before the sequence is terminated.
fn sequence_end(data: &[u8], start: usize) -> Option<usize> {
    let kind = *data.get(start + 1)?;
    match kind {
        b'[' => {
            let mut i = start + 2;
            while i < data.len() {
                if (0x40..=0x7e).contains(&data[i]) {
                    return Some(i + 1);
                }
                if !(0x20..=0x3f).contains(&data[i]) {
                    // malformed, let the filter deal with it
                    return Some(i);
                }
                i += 1;
            }
            None
        }
        b']' | b'P' | b'^' | b'_' => {
            let mut i = start + 2;
            while i < data.len() {
                match data[i] {
                    BEL => return Some(i + 1),
                    ESC => return data.get(i + 1).map(|_| i + 2),
                    _ => i += 1,
                }
            }
            None
        }
        b'(' | b')' | b'*' | b'+' => data.get(start + 2).map(|_| start + 3),
        _ => Some(start + 2),
    }
}
