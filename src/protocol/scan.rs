//! Header-only walk over a partially received MsgPack value.
//!
//! The scanner reads markers and length prefixes but never payload bytes, and
//! it resumes where it stopped on the previous call. Combined, a value that
//! arrives over many reads is walked once in total, and a large `str`/`bin`/
//! `ext` body is skipped by its length without being looked at.

use rmp::Marker;

/// Nesting depth beyond which the scanner stops tracking and defers to the
/// full decoder, which enforces its own limit.
pub(crate) const MAX_SCAN_DEPTH: usize = 1024;

/// Outcome of a scan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scan {
    /// No complete value until the buffer holds at least this many bytes.
    Need(usize),
    /// A full decode should be attempted now.
    Ready,
}

/// Resumable position inside the first buffered value.
#[derive(Debug, Default)]
pub(crate) struct ValueScanner {
    /// Offset of the next item header.
    offset: usize,
    /// Items still missing in each open array or map, innermost last.
    open: Vec<u64>,
    /// Minimum buffer length before scanning can make progress.
    needed: usize,
    /// Set when the value is known to be complete or cannot be tracked.
    ready: bool,
}

impl ValueScanner {
    /// Forget all progress; the next call starts at offset 0.
    pub(crate) fn reset(&mut self) {
        self.offset = 0;
        self.open.clear();
        self.needed = 0;
        self.ready = false;
    }

    /// Continue walking `buf` from where the last call stopped.
    ///
    /// `buf` must start with the same bytes as on the previous call.
    pub(crate) fn advance(&mut self, buf: &[u8]) -> Scan {
        if self.ready {
            return Scan::Ready;
        }
        if buf.len() < self.needed {
            return Scan::Need(self.needed);
        }

        loop {
            let Some(&byte) = buf.get(self.offset) else {
                self.needed = self.offset + 1;
                return Scan::Need(self.needed);
            };

            let item = match item_shape(Marker::from_u8(byte), buf, self.offset) {
                Some(item) => item,
                None => {
                    // Length prefix not fully buffered yet.
                    self.needed = self.offset + header_len(Marker::from_u8(byte));
                    return Scan::Need(self.needed);
                }
            };

            match item {
                Item::Scalar(len) => {
                    let end = self.offset + len;
                    if buf.len() < end {
                        self.needed = end;
                        return Scan::Need(end);
                    }
                    self.offset = end;
                }
                Item::Container { header, items } => {
                    self.offset += header;
                    if items > 0 {
                        if self.open.len() == MAX_SCAN_DEPTH {
                            self.ready = true;
                            return Scan::Ready;
                        }
                        self.open.push(items);
                        continue;
                    }
                }
                Item::Invalid => {
                    self.ready = true;
                    return Scan::Ready;
                }
            }

            if self.close_finished() {
                self.ready = true;
                return Scan::Ready;
            }
        }
    }

    /// Count one finished item against its parents. Returns `true` once the
    /// top-level value is complete.
    fn close_finished(&mut self) -> bool {
        loop {
            match self.open.last_mut() {
                None => return true,
                Some(remaining) => {
                    *remaining -= 1;
                    if *remaining > 0 {
                        return false;
                    }
                    self.open.pop();
                }
            }
        }
    }
}

enum Item {
    /// Self-contained item of this many bytes, header included.
    Scalar(usize),
    /// Array or map; `items` counts map keys and values separately.
    Container { header: usize, items: u64 },
    /// Reserved marker; the decoder reports the error.
    Invalid,
}

/// Bytes taken by the marker plus any length prefix.
fn header_len(marker: Marker) -> usize {
    match marker {
        Marker::Str8 | Marker::Bin8 => 2,
        Marker::Str16 | Marker::Bin16 | Marker::Array16 | Marker::Map16 => 3,
        Marker::Str32 | Marker::Bin32 | Marker::Array32 | Marker::Map32 => 5,
        Marker::Ext8 => 3,
        Marker::Ext16 => 4,
        Marker::Ext32 => 6,
        _ => 1,
    }
}

/// Read the length prefix of width `N` following the marker at `at`.
fn prefix<const N: usize>(buf: &[u8], at: usize) -> Option<usize> {
    let bytes: [u8; N] = buf.get(at + 1..at + 1 + N)?.try_into().ok()?;
    Some(bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b)))
}

/// Shape of the item at `at`, or `None` if its length prefix is incomplete.
fn item_shape(marker: Marker, buf: &[u8], at: usize) -> Option<Item> {
    let item = match marker {
        Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {
            Item::Scalar(1)
        }
        Marker::U8 | Marker::I8 => Item::Scalar(2),
        Marker::U16 | Marker::I16 => Item::Scalar(3),
        Marker::U32 | Marker::I32 | Marker::F32 => Item::Scalar(5),
        Marker::U64 | Marker::I64 | Marker::F64 => Item::Scalar(9),

        Marker::FixStr(len) => Item::Scalar(1 + usize::from(len)),
        Marker::Str8 | Marker::Bin8 => Item::Scalar(2 + prefix::<1>(buf, at)?),
        Marker::Str16 | Marker::Bin16 => Item::Scalar(3 + prefix::<2>(buf, at)?),
        Marker::Str32 | Marker::Bin32 => Item::Scalar(5 + prefix::<4>(buf, at)?),

        Marker::FixExt1 => Item::Scalar(3),
        Marker::FixExt2 => Item::Scalar(4),
        Marker::FixExt4 => Item::Scalar(6),
        Marker::FixExt8 => Item::Scalar(10),
        Marker::FixExt16 => Item::Scalar(18),
        Marker::Ext8 => Item::Scalar(3 + prefix::<1>(buf, at)?),
        Marker::Ext16 => Item::Scalar(4 + prefix::<2>(buf, at)?),
        Marker::Ext32 => Item::Scalar(6 + prefix::<4>(buf, at)?),

        Marker::FixArray(n) => Item::Container {
            header: 1,
            items: u64::from(n),
        },
        Marker::Array16 => Item::Container {
            header: 3,
            items: prefix::<2>(buf, at)? as u64,
        },
        Marker::Array32 => Item::Container {
            header: 5,
            items: prefix::<4>(buf, at)? as u64,
        },
        Marker::FixMap(n) => Item::Container {
            header: 1,
            items: 2 * u64::from(n),
        },
        Marker::Map16 => Item::Container {
            header: 3,
            items: 2 * prefix::<2>(buf, at)? as u64,
        },
        Marker::Map32 => Item::Container {
            header: 5,
            items: 2 * prefix::<4>(buf, at)? as u64,
        },

        Marker::Reserved => Item::Invalid,
    };
    Some(item)
}
