// segment.rs - segmented packet views and the byte-range walker

use bytes::Bytes;
use thiserror::Error;

/// Upper bound on sub-packet chain nesting accepted by [`PacketView::new`].
pub const MAX_CHAIN_DEPTH: usize = 4;

/// Error returned while assembling or walking a packet view.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    /// A segment with zero length was supplied.
    #[error("empty segment at index {0}")]
    EmptySegment(usize),

    /// Declared total length disagrees with the segment sum.
    #[error("declared length {declared} != segment sum {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Sub-packet chain nesting exceeded the permitted depth.
    #[error("chain depth {0} exceeds maximum {MAX_CHAIN_DEPTH}")]
    ChainTooDeep(usize),
}

/// One logical packet laid out as a primary owned segment, zero or more
/// shared page fragments, and zero or more chained sub-packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketView {
    head: Vec<u8>,
    frags: Vec<Bytes>,
    chain: Vec<PacketView>,
    total_len: usize,
}

impl PacketView {
    /// Builds a view over a single contiguous buffer.
    pub fn contiguous(head: Vec<u8>) -> Result<Self, SegmentError> {
        let declared = head.len();
        Self::new(head, Vec::new(), Vec::new(), declared)
    }

    /// Builds a view and validates its invariants: no empty segment and a
    /// declared length that matches the byte sum across all segments.
    pub fn new(
        head: Vec<u8>,
        frags: Vec<Bytes>,
        chain: Vec<PacketView>,
        declared_len: usize,
    ) -> Result<Self, SegmentError> {
        if head.is_empty() {
            return Err(SegmentError::EmptySegment(0));
        }
        for (idx, frag) in frags.iter().enumerate() {
            if frag.is_empty() {
                return Err(SegmentError::EmptySegment(idx + 1));
            }
        }

        let depth = chain
            .iter()
            .map(PacketView::chain_depth)
            .max()
            .unwrap_or(0)
            + usize::from(!chain.is_empty());
        if depth > MAX_CHAIN_DEPTH {
            return Err(SegmentError::ChainTooDeep(depth));
        }

        let actual = head.len()
            + frags.iter().map(Bytes::len).sum::<usize>()
            + chain.iter().map(PacketView::len).sum::<usize>();
        if actual != declared_len {
            return Err(SegmentError::LengthMismatch {
                declared: declared_len,
                actual,
            });
        }

        Ok(Self {
            head,
            frags,
            chain,
            total_len: declared_len,
        })
    }

    /// Total byte length across all segments.
    pub fn len(&self) -> usize {
        self.total_len
    }

    /// True when the view carries no bytes. Construction forbids this; the
    /// accessor exists for iterator-style callers.
    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    /// The primary owned segment.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Mutable access to the primary segment.
    pub fn head_mut(&mut self) -> &mut [u8] {
        &mut self.head
    }

    /// True when bytes beyond the primary segment exist.
    pub fn has_tail(&self) -> bool {
        !self.frags.is_empty() || !self.chain.is_empty()
    }

    fn chain_depth(&self) -> usize {
        self.chain
            .iter()
            .map(PacketView::chain_depth)
            .max()
            .unwrap_or(0)
            + usize::from(!self.chain.is_empty())
    }

    /// Returns a fresh, lazy walker over the logical byte stream: head,
    /// then each fragment in order, then each chained sub-packet
    /// recursively. Restartable by calling again.
    pub fn byte_ranges(&self) -> RangeWalker<'_> {
        RangeWalker {
            stack: vec![Frame {
                view: self,
                cursor: Cursor::Head,
            }],
        }
    }

    /// Invokes `visit` for every byte range starting at logical offset
    /// `skip`. Ranges that straddle `skip` are trimmed, not copied.
    pub fn for_each_range_from<F>(&self, skip: usize, mut visit: F)
    where
        F: FnMut(&[u8]),
    {
        let mut remaining = skip;
        for range in self.byte_ranges() {
            if remaining >= range.len() {
                remaining -= range.len();
                continue;
            }
            visit(&range[remaining..]);
            remaining = 0;
        }
    }

    /// Flattens the logical byte stream into one owned buffer.
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len);
        for range in self.byte_ranges() {
            out.extend_from_slice(range);
        }
        out
    }

    /// Grows the primary segment by inserting `extra` zero bytes at
    /// `offset`. Only valid while `offset` lies inside the head segment.
    pub(crate) fn insert_into_head(&mut self, offset: usize, extra: usize) -> bool {
        if offset > self.head.len() {
            return false;
        }
        self.head
            .splice(offset..offset, std::iter::repeat_n(0u8, extra));
        self.total_len += extra;
        true
    }

    /// Removes `count` bytes from the primary segment at `offset`.
    pub(crate) fn remove_from_head(&mut self, offset: usize, count: usize) -> bool {
        if offset + count > self.head.len() {
            return false;
        }
        self.head.drain(offset..offset + count);
        self.total_len -= count;
        true
    }

    /// Prepends `bytes` to the primary segment.
    pub(crate) fn prepend_to_head(&mut self, bytes: &[u8]) {
        self.head.splice(0..0, bytes.iter().copied());
        self.total_len += bytes.len();
    }
}

enum Cursor {
    Head,
    Frag(usize),
    Chain(usize),
    Done,
}

struct Frame<'a> {
    view: &'a PacketView,
    cursor: Cursor,
}

/// Lazy walker over the byte ranges of a [`PacketView`]. Depth is bounded
/// at construction, so the stack never exceeds `MAX_CHAIN_DEPTH + 1`.
pub struct RangeWalker<'a> {
    stack: Vec<Frame<'a>>,
}

impl<'a> Iterator for RangeWalker<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            match frame.cursor {
                Cursor::Head => {
                    frame.cursor = if frame.view.frags.is_empty() {
                        Cursor::Chain(0)
                    } else {
                        Cursor::Frag(0)
                    };
                    return Some(frame.view.head.as_slice());
                }
                Cursor::Frag(idx) => {
                    frame.cursor = if idx + 1 < frame.view.frags.len() {
                        Cursor::Frag(idx + 1)
                    } else {
                        Cursor::Chain(0)
                    };
                    return Some(frame.view.frags[idx].as_ref());
                }
                Cursor::Chain(idx) => {
                    let view = frame.view;
                    if idx < view.chain.len() {
                        frame.cursor = Cursor::Chain(idx + 1);
                        self.stack.push(Frame {
                            view: &view.chain[idx],
                            cursor: Cursor::Head,
                        });
                    } else {
                        frame.cursor = Cursor::Done;
                        self.stack.pop();
                    }
                }
                Cursor::Done => {
                    self.stack.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_from_parts(parts: &[&[u8]]) -> PacketView {
        let head = parts[0].to_vec();
        let frags: Vec<Bytes> = parts[1..]
            .iter()
            .map(|p| Bytes::copy_from_slice(p))
            .collect();
        let total = parts.iter().map(|p| p.len()).sum();
        PacketView::new(head, frags, Vec::new(), total).unwrap()
    }

    #[test]
    fn walks_head_then_frags_then_chain() {
        let inner = view_from_parts(&[b"cc", b"dd"]);
        let view = PacketView::new(
            b"aa".to_vec(),
            vec![Bytes::from_static(b"bb")],
            vec![inner],
            8,
        )
        .unwrap();

        let collected: Vec<Vec<u8>> = view.byte_ranges().map(|r| r.to_vec()).collect();
        assert_eq!(collected, vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec(), b"dd".to_vec()]);
        assert_eq!(view.to_contiguous(), b"aabbccdd");
    }

    #[test]
    fn segmentation_does_not_change_the_stream() {
        let whole = view_from_parts(&[b"the quick brown fox"]);
        let split = view_from_parts(&[b"the ", b"quick ", b"brown ", b"fox"]);
        assert_eq!(whole.to_contiguous(), split.to_contiguous());
    }

    #[test]
    fn walker_is_restartable() {
        let view = view_from_parts(&[b"xy", b"z"]);
        let first: Vec<u8> = view.byte_ranges().flatten().copied().collect();
        let second: Vec<u8> = view.byte_ranges().flatten().copied().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn skip_trims_straddling_range() {
        let view = view_from_parts(&[b"abcd", b"efgh"]);
        let mut out = Vec::new();
        view.for_each_range_from(2, |r| out.extend_from_slice(r));
        assert_eq!(out, b"cdefgh");

        let mut tail = Vec::new();
        view.for_each_range_from(6, |r| tail.extend_from_slice(r));
        assert_eq!(tail, b"gh");
    }

    #[test]
    fn rejects_empty_segment() {
        let err = PacketView::new(Vec::new(), Vec::new(), Vec::new(), 0).unwrap_err();
        assert_eq!(err, SegmentError::EmptySegment(0));

        let err = PacketView::new(b"a".to_vec(), vec![Bytes::new()], Vec::new(), 1).unwrap_err();
        assert_eq!(err, SegmentError::EmptySegment(1));
    }

    #[test]
    fn rejects_length_mismatch() {
        let err = PacketView::new(b"abc".to_vec(), Vec::new(), Vec::new(), 5).unwrap_err();
        assert_eq!(
            err,
            SegmentError::LengthMismatch {
                declared: 5,
                actual: 3
            }
        );
    }

    #[test]
    fn rejects_deep_chains() {
        let mut view = PacketView::contiguous(b"x".to_vec()).unwrap();
        for depth in 1usize.. {
            let len = view.len() + 1;
            match PacketView::new(b"y".to_vec(), Vec::new(), vec![view.clone()], len) {
                Ok(next) => view = next,
                Err(err) => {
                    assert_eq!(err, SegmentError::ChainTooDeep(depth));
                    break;
                }
            }
        }
    }

    #[test]
    fn head_edits_keep_length_consistent() {
        let mut view = view_from_parts(&[b"abcdef", b"gh"]);
        assert!(view.insert_into_head(2, 3));
        assert_eq!(view.len(), 11);
        assert_eq!(&view.head()[..5], b"ab\0\0\0");
        assert!(view.remove_from_head(2, 3));
        assert_eq!(view.to_contiguous(), b"abcdefgh");
    }
}
