//! A zero-copy view over a sequence of shared byte slabs.
//!
//! A [`View`] presents an ordered list of byte slabs as one contiguous logical
//! byte string without copying slab contents. Appending, sub-slicing, and
//! cloning only manipulate the slab-pointer list; the backing bytes are
//! reference-counted and freed when the last view referencing them drops.
//! This keeps reassembled TCP payloads, protocol recognizer residue, and
//! pooled message bodies alias-free while segments flow through the pipeline.
//!
//! [`ViewReader`] is a cursor over a view supporting byte-wise and big-endian
//! integer reads, seeking, and bounded truncation into sub-readers. The
//! truncation helpers are the workhorses of the TLS extension walkers.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use thiserror::Error;

/// Reference-counted backing storage for one contiguous byte slab.
pub type Slab = Arc<Vec<u8>>;

/// One slab reference plus the half-open range of it that the view covers.
#[derive(Clone)]
struct Segment {
    slab: Slab,
    start: usize,
    end: usize,
}

impl Segment {
    #[inline]
    fn as_bytes(&self) -> &[u8] {
        &self.slab[self.start..self.end]
    }

    #[inline]
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// An ordered sequence of byte slabs presented as one logical byte string.
///
/// The empty value is a ready-to-use empty view. Cloning duplicates the
/// slab-pointer list but never slab contents; two clones share storage, and
/// appending to one never mutates the other's slab list.
#[derive(Clone, Default)]
pub struct View {
    segments: Vec<Segment>,
    length: usize,
}

impl View {
    /// Creates an empty view.
    pub fn new() -> View {
        View::default()
    }

    /// Creates a view over an entire slab without copying its contents.
    pub fn from_slab(slab: Slab) -> View {
        let length = slab.len();
        View {
            segments: vec![Segment {
                slab,
                start: 0,
                end: length,
            }],
            length,
        }
    }

    /// Appends a sub-range of a slab. The range must be within the slab.
    pub(crate) fn push_segment(&mut self, slab: Slab, start: usize, end: usize) {
        debug_assert!(start <= end && end <= slab.len());
        self.length += end - start;
        self.segments.push(Segment { slab, start, end });
    }

    /// Appends all of `src`'s slab references to this view.
    pub fn append(&mut self, src: &View) {
        self.segments.extend(src.segments.iter().cloned());
        self.length += src.length;
    }

    /// Returns a view that shares slabs with this one but has an independent
    /// slab-pointer list.
    pub fn deep_copy(&self) -> View {
        self.clone()
    }

    /// Drops all slab references without touching slab contents.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.length = 0;
    }

    /// Total number of logical bytes. O(1).
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the byte at logical offset `index`, or 0 when out of range.
    pub fn get_byte(&self, index: usize) -> u8 {
        let mut n = index;
        for seg in &self.segments {
            if n < seg.len() {
                return seg.as_bytes()[n];
            }
            n -= seg.len();
        }
        0
    }

    /// Returns a freshly allocated copy of `[start, end)`, or `None` when
    /// `start > end` or `end` exceeds the view length. This is the only
    /// byte-access primitive that copies.
    pub fn get_bytes(&self, start: usize, end: usize) -> Option<Vec<u8>> {
        if start > end || end > self.length {
            return None;
        }
        let mut result = Vec::with_capacity(end - start);
        let (mut start, mut end) = (start, end);
        for seg in &self.segments {
            if start >= end {
                break;
            }
            let len = seg.len();
            if start >= len {
                start -= len;
                end -= len;
                continue;
            }
            let copy_end = end.min(len);
            result.extend_from_slice(&seg.as_bytes()[start..copy_end]);
            start = 0;
            end -= len.min(end);
        }
        Some(result)
    }

    /// Big-endian u16 at `offset`, or 0 when any byte is out of range.
    pub fn get_u16(&self, offset: usize) -> u16 {
        match self.get_bytes(offset, offset + 2) {
            Some(b) => u16::from_be_bytes([b[0], b[1]]),
            None => 0,
        }
    }

    /// Big-endian 24-bit integer at `offset`, zero-extended to 32 bits, or 0
    /// when any byte is out of range.
    pub fn get_u24(&self, offset: usize) -> u32 {
        match self.get_bytes(offset, offset + 3) {
            Some(b) => u32::from_be_bytes([0, b[0], b[1], b[2]]),
            None => 0,
        }
    }

    /// Big-endian u32 at `offset`, or 0 when any byte is out of range.
    pub fn get_u32(&self, offset: usize) -> u32 {
        match self.get_bytes(offset, offset + 4) {
            Some(b) => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            None => 0,
        }
    }

    /// Returns a view over `[start, end)` sharing slab storage with this one.
    /// The boundary slabs are re-sliced to cover exactly the range. Returns an
    /// empty view when `start >= end` or the range is out of bounds.
    pub fn sub_view(&self, start: usize, end: usize) -> View {
        if start >= end {
            return View::new();
        }

        let mut start_seg = None;
        let mut end_seg = None;
        let (mut start_off, mut end_off) = (0, 0);
        let mut n = 0usize;
        for (i, seg) in self.segments.iter().enumerate() {
            let len = seg.len();
            if start_seg.is_none() && n + len > start {
                start_seg = Some(i);
                start_off = start - n;
            }
            // >= because `end` is exclusive.
            if n + len >= end {
                end_seg = Some(i);
                end_off = end - n;
                break;
            }
            n += len;
        }

        let (s, e) = match (start_seg, end_seg) {
            (Some(s), Some(e)) => (s, e),
            _ => return View::new(),
        };

        let mut segments: Vec<Segment> = self.segments[s..=e].to_vec();
        if segments.len() == 1 {
            let seg = &mut segments[0];
            seg.end = seg.start + end_off;
            seg.start += start_off;
        } else {
            let last = segments.len() - 1;
            segments[0].start += start_off;
            segments[last].end = segments[last].start + end_off;
        }
        View {
            segments,
            length: end - start,
        }
    }

    /// Returns the lowest logical offset `>= start` at which `pattern`
    /// occurs, or `None`. The empty pattern matches at `start` when
    /// `start <= len`.
    ///
    /// The scan detects matches that straddle slab boundaries, but does not
    /// back up after an incomplete partial match, so it can miss occurrences
    /// of patterns with a repeated prefix. All internal callers search for
    /// prefix-unique sentinels (HTTP method keywords, `HTTP/1.x`, the HTTP/2
    /// preface, TLS record bytes), which are unaffected.
    pub fn index(&self, start: usize, pattern: &[u8]) -> Option<usize> {
        if pattern.is_empty() {
            return (start <= self.length).then_some(start);
        }
        if start >= self.length {
            return None;
        }

        // Locate the segment containing `start`.
        let mut seg_idx = 0;
        let mut seg_base = 0; // global offset of segments[seg_idx][0]
        while start >= seg_base + self.segments[seg_idx].len() {
            seg_base += self.segments[seg_idx].len();
            seg_idx += 1;
        }
        let mut start_off = start - seg_base;

        // Walk segments, carrying a partial match across boundaries.
        let mut matched = 0usize;
        for seg in &self.segments[seg_idx..] {
            let haystack = seg.as_bytes();
            let mut i = start_off;

            // Continue a match begun in a previous segment.
            while i < haystack.len() && matched > 0 {
                if haystack[i] == pattern[matched] {
                    matched += 1;
                    if matched == pattern.len() {
                        return Some(seg_base + i + 1 - pattern.len());
                    }
                } else {
                    matched = usize::from(haystack[i] == pattern[0]);
                }
                i += 1;
            }

            if i < haystack.len() {
                // Whole-pattern search within the remainder of this segment.
                if let Some(found) = find_sub(&haystack[i..], pattern) {
                    return Some(seg_base + i + found);
                }
                // Check the tail for the start of a straddling match. Shorter
                // prefixes were already covered by the search above.
                let tail = haystack.len().saturating_sub(pattern.len() - 1);
                if i < tail {
                    i = tail;
                }
                while i < haystack.len() {
                    if haystack[i] == pattern[matched] {
                        matched += 1;
                    } else {
                        matched = usize::from(haystack[i] == pattern[0]);
                    }
                    i += 1;
                }
            }

            seg_base += haystack.len();
            start_off = 0;
        }
        None
    }

    /// Creates a cursor positioned at the start of the view. The cursor holds
    /// its own slab-pointer list, so appends made to this view after the call
    /// are not visible through it.
    pub fn reader(&self) -> ViewReader {
        ViewReader {
            view: self.clone(),
            seg_idx: 0,
            seg_off: 0,
            pos: 0,
        }
    }

    /// Copies the view's bytes into a contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.get_bytes(0, self.length).unwrap_or_default()
    }

    /// Writes every slab to `dst` in order. On a sink error the reported
    /// count covers the bytes written before the failure.
    pub fn write_to<W: Write>(&self, dst: &mut W) -> Result<u64, SinkError> {
        let mut written = 0u64;
        for seg in &self.segments {
            match dst.write(seg.as_bytes()) {
                Ok(n) => written += n as u64,
                Err(source) => return Err(SinkError { written, source }),
            }
        }
        Ok(written)
    }
}

impl From<Vec<u8>> for View {
    /// Wraps an owned buffer in a new slab without copying.
    fn from(data: Vec<u8>) -> View {
        View::from_slab(Arc::new(data))
    }
}

impl From<&[u8]> for View {
    /// Copies `data` into a fresh slab. Views built from borrowed bytes must
    /// own their storage; use [`View::from_slab`] to share an existing slab.
    fn from(data: &[u8]) -> View {
        View::from(data.to_vec())
    }
}

/// Byte-wise equality of the logical byte sequences, irrespective of how
/// either view is segmented.
impl PartialEq for View {
    fn eq(&self, other: &View) -> bool {
        if self.length != other.length {
            return false;
        }
        let mut lhs = self.segments.iter().flat_map(|s| s.as_bytes());
        let mut rhs = other.segments.iter().flat_map(|s| s.as_bytes());
        loop {
            match (lhs.next(), rhs.next()) {
                (Some(a), Some(b)) if a == b => continue,
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl Eq for View {}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("len", &self.length)
            .field("segments", &self.segments.len())
            .finish()
    }
}

/// Error from [`View::write_to`], carrying the number of bytes that reached
/// the sink before the failure.
#[derive(Debug, Error)]
#[error("sink failed after {written} bytes: {source}")]
pub struct SinkError {
    pub written: u64,
    #[source]
    pub source: io::Error,
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A cursor over a [`View`].
///
/// The cursor tracks the segment index, the offset within that segment, and
/// the global offset; the global offset always equals the sum of the lengths
/// of the segments preceding the current one plus the in-segment offset.
pub struct ViewReader {
    view: View,
    /// Index of the segment to read from next.
    seg_idx: usize,
    /// Offset into that segment for the next read.
    seg_off: usize,
    /// Global offset for the next read.
    pos: usize,
}

impl ViewReader {
    /// Global offset of the next read.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes between the cursor and the end of the view.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.view.len() - self.pos
    }

    /// Reads a single byte, or fails with `UnexpectedEof` at end of view.
    pub fn read_byte(&mut self) -> io::Result<u8> {
        while self.seg_idx < self.view.segments.len() {
            let seg = &self.view.segments[self.seg_idx];
            if self.seg_off < seg.len() {
                let b = seg.as_bytes()[self.seg_off];
                self.seg_off += 1;
                self.pos += 1;
                return Ok(b);
            }
            self.seg_idx += 1;
            self.seg_off = 0;
        }
        Err(io::ErrorKind::UnexpectedEof.into())
    }

    /// Big-endian u16 at the cursor.
    pub fn read_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Big-endian 24-bit integer at the cursor, zero-extended to 32 bits.
    pub fn read_u24(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 3];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes([0, buf[0], buf[1], buf[2]]))
    }

    /// Big-endian u32 at the cursor.
    pub fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Decodes the next `length` bytes as a string (invalid UTF-8 is replaced
    /// lossily).
    pub fn read_string(&mut self, length: usize) -> io::Result<String> {
        let mut buf = vec![0u8; length];
        self.read_exact(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Reads a string whose length is given by the next byte.
    pub fn read_string_u8(&mut self) -> io::Result<String> {
        let length = self.read_byte()?;
        self.read_string(length as usize)
    }

    /// Reads a string whose length is given by the next big-endian u16.
    pub fn read_string_u16(&mut self) -> io::Result<String> {
        let length = self.read_u16()?;
        self.read_string(length as usize)
    }

    /// Skips a variable-length field by reading a one-byte length and seeking
    /// that many bytes forward.
    pub fn read_byte_then_seek(&mut self) -> io::Result<()> {
        let length = self.read_byte()?;
        self.seek(SeekFrom::Current(length as i64))?;
        Ok(())
    }

    /// Skips a variable-length field by reading a two-byte length and seeking
    /// that many bytes forward.
    pub fn read_u16_then_seek(&mut self) -> io::Result<()> {
        let length = self.read_u16()?;
        self.seek(SeekFrom::Current(length as i64))?;
        Ok(())
    }

    /// Reads a two-byte length `n` and returns a sub-reader over the next `n`
    /// bytes, advancing this reader past them.
    pub fn read_u16_then_truncate(&mut self) -> io::Result<(u16, ViewReader)> {
        let length = self.read_u16()?;
        let field = self.truncate(length as usize)?;
        self.seek(SeekFrom::Current(length as i64))?;
        Ok((length, field))
    }

    /// Reads a three-byte length `n` and returns a sub-reader over the next
    /// `n` bytes, advancing this reader past them.
    pub fn read_u24_then_truncate(&mut self) -> io::Result<(u32, ViewReader)> {
        let length = self.read_u24()?;
        let field = self.truncate(length as usize)?;
        self.seek(SeekFrom::Current(length as i64))?;
        Ok((length, field))
    }

    /// Returns a reader over the sub-view `[position, position + length)`.
    /// Fails when the range extends past the end of the view; this reader's
    /// cursor is left untouched either way.
    pub fn truncate(&self, length: usize) -> io::Result<ViewReader> {
        if self.pos + length > self.view.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "truncate past end of view",
            ));
        }
        Ok(self.view.sub_view(self.pos, self.pos + length).reader())
    }

    /// Writes every slab of the backing view to `dst` in order, regardless
    /// of the cursor position. On a sink error the reported count covers the
    /// bytes written before the failure.
    pub fn write_to<W: Write>(&self, dst: &mut W) -> Result<u64, SinkError> {
        self.view.write_to(dst)
    }

    /// Repositions the cursor at the given global offset, saturated to the
    /// view length.
    fn set_position(&mut self, target: usize) {
        let target = target.min(self.view.len());
        self.seg_idx = 0;
        self.seg_off = 0;
        self.pos = 0;
        let mut n = target;
        while self.seg_idx < self.view.segments.len() {
            let len = self.view.segments[self.seg_idx].len();
            if n < len {
                self.seg_off = n;
                self.pos += n;
                return;
            }
            n -= len;
            self.pos += len;
            self.seg_idx += 1;
        }
        // Past the last segment; pos == view length.
    }
}

impl Read for ViewReader {
    /// Fills `buf` with as many bytes as are available, advancing the cursor.
    /// Returns `Ok(0)` at end of view.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() && self.seg_idx < self.view.segments.len() {
            let seg = &self.view.segments[self.seg_idx];
            let avail = &seg.as_bytes()[self.seg_off..];
            if avail.is_empty() {
                self.seg_idx += 1;
                self.seg_off = 0;
                continue;
            }
            let n = avail.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&avail[..n]);
            filled += n;
            self.seg_off += n;
            self.pos += n;
        }
        Ok(filled)
    }
}

impl Seek for ViewReader {
    /// Seeks relative to the start, end, or current position. Seeking past
    /// the end saturates at the end of the view; seeking before the start
    /// fails and leaves the cursor unchanged.
    fn seek(&mut self, whence: SeekFrom) -> io::Result<u64> {
        let target: i64 = match whence {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.view.len() as i64 + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }
        self.set_position(target as usize);
        Ok(self.pos as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds every segmentation of `data` into up to four slabs.
    fn segmentations(data: &[u8]) -> Vec<View> {
        let n = data.len();
        let mut out = vec![];
        for i in 0..=n {
            for j in i..=n {
                for k in j..=n {
                    let mut v = View::new();
                    for part in [&data[..i], &data[i..j], &data[j..k], &data[k..]] {
                        v.append(&View::from(part));
                    }
                    out.push(v);
                }
            }
        }
        out
    }

    #[test]
    fn empty_view() {
        let v = View::new();
        assert_eq!(v.len(), 0);
        assert!(v.is_empty());
        assert_eq!(v.get_byte(0), 0);
        assert_eq!(v.index(0, b"x"), None);
        assert_eq!(v.index(0, b""), Some(0));
        assert_eq!(v.to_vec(), Vec::<u8>::new());
    }

    #[test]
    fn append_and_len() {
        let mut v = View::from(&b"hello "[..]);
        v.append(&View::from(&b"world"[..]));
        assert_eq!(v.len(), 11);
        assert_eq!(v.to_vec(), b"hello world");
    }

    #[test]
    fn deep_copy_is_independent() {
        let mut v = View::from(&b"base"[..]);
        let copy = v.deep_copy();
        v.append(&View::from(&b"-more"[..]));
        assert_eq!(copy.to_vec(), b"base");
        assert_eq!(v.to_vec(), b"base-more");
    }

    #[test]
    fn get_byte_across_segments() {
        for v in segmentations(b"abcdef") {
            for (i, want) in b"abcdef".iter().enumerate() {
                assert_eq!(v.get_byte(i), *want);
            }
            assert_eq!(v.get_byte(6), 0);
            assert_eq!(v.get_byte(1000), 0);
        }
    }

    #[test]
    fn get_bytes_bounds() {
        let v = View::from(&b"abcdef"[..]);
        assert_eq!(v.get_bytes(1, 4).unwrap(), b"bcd");
        assert_eq!(v.get_bytes(0, 6).unwrap(), b"abcdef");
        assert_eq!(v.get_bytes(3, 3).unwrap(), b"");
        assert!(v.get_bytes(4, 3).is_none());
        assert!(v.get_bytes(0, 7).is_none());
    }

    #[test]
    fn integer_decode_across_segmentations() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        for v in segmentations(&data) {
            assert_eq!(v.get_u16(0), 0x0102);
            assert_eq!(v.get_u16(3), 0x0405);
            assert_eq!(v.get_u16(4), 0);
            assert_eq!(v.get_u24(0), 0x010203);
            assert_eq!(v.get_u24(2), 0x030405);
            assert_eq!(v.get_u24(3), 0);
            assert_eq!(v.get_u32(0), 0x01020304);
            assert_eq!(v.get_u32(1), 0x02030405);
            assert_eq!(v.get_u32(2), 0);
        }
    }

    #[test]
    fn sub_view_matches_slices() {
        let data = b"abcdefgh";
        for v in segmentations(data) {
            for start in 0..=data.len() {
                for end in start..=data.len() {
                    let sub = v.sub_view(start, end);
                    if start >= end {
                        assert!(sub.is_empty());
                    } else {
                        assert_eq!(sub.len(), end - start);
                        assert_eq!(sub.to_vec(), &data[start..end]);
                    }
                }
            }
        }
    }

    #[test]
    fn sub_view_out_of_range_is_empty() {
        let v = View::from(&b"abc"[..]);
        assert!(v.sub_view(1, 9).is_empty());
    }

    #[test]
    fn index_matches_contiguous_search() {
        let data = b"xxGET / HTTP/1.1";
        for v in segmentations(data) {
            assert_eq!(v.index(0, b"GET"), Some(2));
            assert_eq!(v.index(2, b"GET"), Some(2));
            assert_eq!(v.index(3, b"GET"), None);
            assert_eq!(v.index(0, b"HTTP/1.1"), Some(8));
            assert_eq!(v.index(0, b"HTTP/1.0"), None);
            assert_eq!(v.index(0, b" "), Some(5));
            assert_eq!(v.index(6, b" "), Some(7));
        }
    }

    #[test]
    fn index_straddles_slab_boundaries() {
        let mut v = View::from(&b"PRI * HT"[..]);
        v.append(&View::from(&b"TP/2.0\r\n"[..]));
        assert_eq!(v.index(0, b"PRI * HTTP/2.0\r\n"), Some(0));
        assert_eq!(v.index(0, b"HTTP"), Some(6));

        let mut v = View::from(&b"ab"[..]);
        v.append(&View::from(&b"c"[..]));
        v.append(&View::from(&b"de"[..]));
        assert_eq!(v.index(0, b"bcd"), Some(1));
        assert_eq!(v.index(2, b"bcd"), None);
    }

    #[test]
    fn index_empty_pattern() {
        let v = View::from(&b"abc"[..]);
        assert_eq!(v.index(0, b""), Some(0));
        assert_eq!(v.index(3, b""), Some(3));
        assert_eq!(v.index(4, b""), None);
    }

    #[test]
    fn equality_ignores_segmentation() {
        let flat = View::from(&b"equal bytes"[..]);
        for v in segmentations(b"equal bytes") {
            assert_eq!(v, flat);
        }
        assert_ne!(flat, View::from(&b"equal bytez"[..]));
        assert_ne!(flat, View::from(&b"equal byte"[..]));
    }

    #[test]
    fn reader_read_and_eof() {
        for v in segmentations(b"abcdef") {
            let mut r = v.reader();
            let mut buf = [0u8; 4];
            assert_eq!(r.read(&mut buf).unwrap(), 4);
            assert_eq!(&buf, b"abcd");
            assert_eq!(r.read(&mut buf).unwrap(), 2);
            assert_eq!(&buf[..2], b"ef");
            assert_eq!(r.read(&mut buf).unwrap(), 0);
        }
    }

    #[test]
    fn reader_integers() {
        let data = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04, 0x05];
        for v in segmentations(&data) {
            let mut r = v.reader();
            assert_eq!(r.read_u16().unwrap(), 0xdead);
            assert_eq!(r.read_u24().unwrap(), 0xbeef01);
            assert_eq!(r.read_u32().unwrap(), 0x02030405);
            assert!(r.read_byte().is_err());
        }
    }

    #[test]
    fn reader_strings() {
        // 1-byte length "hi", then u16 length "there"
        let v = View::from(&b"\x02hi\x00\x05there"[..]);
        let mut r = v.reader();
        assert_eq!(r.read_string_u8().unwrap(), "hi");
        assert_eq!(r.read_string_u16().unwrap(), "there");
        assert!(r.read_string(1).is_err());
    }

    #[test]
    fn reader_seek_semantics() {
        let v = View::from(&b"abcdef"[..]);
        let mut r = v.reader();
        assert_eq!(r.seek(SeekFrom::Start(2)).unwrap(), 2);
        assert_eq!(r.read_byte().unwrap(), b'c');
        assert_eq!(r.seek(SeekFrom::Current(1)).unwrap(), 4);
        assert_eq!(r.read_byte().unwrap(), b'e');
        assert_eq!(r.seek(SeekFrom::End(-1)).unwrap(), 5);
        assert_eq!(r.read_byte().unwrap(), b'f');
        // Past-end seeks saturate.
        assert_eq!(r.seek(SeekFrom::Start(100)).unwrap(), 6);
        assert!(r.read_byte().is_err());
    }

    #[test]
    fn reader_failed_seek_restores_cursor() {
        for v in segmentations(b"abcdef") {
            let mut r = v.reader();
            r.seek(SeekFrom::Start(3)).unwrap();
            assert!(r.seek(SeekFrom::Current(-4)).is_err());
            assert_eq!(r.position(), 3);
            assert_eq!(r.read_byte().unwrap(), b'd');
            assert!(r.seek(SeekFrom::End(-100)).is_err());
            assert_eq!(r.read_byte().unwrap(), b'e');
        }
    }

    #[test]
    fn reader_seek_across_segments() {
        for v in segmentations(b"abcdefgh") {
            let mut r = v.reader();
            for target in [7usize, 0, 4, 8, 2] {
                r.seek(SeekFrom::Start(target as u64)).unwrap();
                assert_eq!(r.position(), target);
                if target < 8 {
                    assert_eq!(r.read_byte().unwrap(), b"abcdefgh"[target]);
                } else {
                    assert!(r.read_byte().is_err());
                }
            }
        }
    }

    #[test]
    fn reader_truncate() {
        for v in segmentations(b"abcdef") {
            let mut r = v.reader();
            r.seek(SeekFrom::Start(2)).unwrap();
            let mut sub = r.truncate(3).unwrap();
            let mut out = vec![];
            sub.read_to_end(&mut out).unwrap();
            assert_eq!(out, b"cde");
            // The parent cursor is untouched.
            assert_eq!(r.position(), 2);
            assert!(r.truncate(5).is_err());
            assert!(r.truncate(4).is_ok());
        }
    }

    #[test]
    fn reader_length_prefixed_truncation() {
        // u16 length 3, field "abc", then trailing "zz".
        let v = View::from(&b"\x00\x03abczz"[..]);
        let mut r = v.reader();
        let (len, mut field) = r.read_u16_then_truncate().unwrap();
        assert_eq!(len, 3);
        assert_eq!(field.read_string(3).unwrap(), "abc");
        assert!(field.read_byte().is_err());
        // The parent has advanced past the field.
        assert_eq!(r.read_string(2).unwrap(), "zz");

        // u24 variant.
        let v = View::from(&b"\x00\x00\x02okrest"[..]);
        let mut r = v.reader();
        let (len, mut field) = r.read_u24_then_truncate().unwrap();
        assert_eq!(len, 2);
        assert_eq!(field.read_string(2).unwrap(), "ok");
        assert_eq!(r.read_string(4).unwrap(), "rest");
    }

    #[test]
    fn reader_skip_helpers() {
        // [1-byte len 2][2 bytes][u16 len 3][3 bytes][payload]
        let v = View::from(&b"\x02xx\x00\x03yyyZ"[..]);
        let mut r = v.reader();
        r.read_byte_then_seek().unwrap();
        r.read_u16_then_seek().unwrap();
        assert_eq!(r.read_byte().unwrap(), b'Z');
    }

    #[test]
    fn write_to_reports_partial_count() {
        struct Failing(usize);
        impl Write for Failing {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.0 == 0 {
                    return Err(io::Error::new(io::ErrorKind::Other, "full"));
                }
                let n = buf.len().min(self.0);
                self.0 -= n;
                Ok(n)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut v = View::from(&b"abcd"[..]);
        v.append(&View::from(&b"efgh"[..]));

        let mut ok = Vec::new();
        assert_eq!(v.write_to(&mut ok).unwrap(), 8);
        assert_eq!(ok, b"abcdefgh");

        let err = v.write_to(&mut Failing(4)).unwrap_err();
        assert_eq!(err.written, 4);
    }
}
