//! Binary histogram reports
//!
//! A report is the serialized state of one [`Accumulator`]. Layout, all
//! integers in the report's byte order:
//!
//! ```text
//! u32                 address field width (4 or 8)
//! u32                 stack kind field width
//! repeated, in ascending context order:
//!   stack_kind        <stack kind width> bytes
//!   caller            <address width> bytes
//!   pc                <address width> bytes
//!   sid_first         <address width> bytes
//!   sid_second        <address width> bytes
//!   is_kernel_mode    1 byte (0 or 1)
//!   counters          256 x u32, byte value 0 through 255
//! ```
//!
//! There is no explicit byte-order marker. Writers default to host order;
//! readers recover the order from the header, since only one interpretation
//! of the width fields is plausible.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::accumulator::Accumulator;
use crate::context::{ExecutionContext, StackKind};
use crate::error::{ConfigError, ReportError};
use crate::histogram::{DenseCounts, BYTE_VALUES};

/// Size of the fixed report header in bytes
pub const HEADER_SIZE: usize = 8;

/// Size of one wire counter in bytes
pub const COUNTER_WIDTH: usize = 4;

/// Result type for report operations
pub type Result<T> = std::result::Result<T, ReportError>;

/// Width of the address-sized context fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum WordWidth {
    /// 32-bit guest
    Four,
    /// 64-bit guest
    Eight,
}

impl WordWidth {
    /// Width matching the host's pointer size
    pub fn host() -> Self {
        if cfg!(target_pointer_width = "32") {
            WordWidth::Four
        } else {
            WordWidth::Eight
        }
    }

    /// Width in bytes
    pub fn bytes(self) -> u32 {
        match self {
            WordWidth::Four => 4,
            WordWidth::Eight => 8,
        }
    }
}

impl Default for WordWidth {
    fn default() -> Self {
        Self::host()
    }
}

impl TryFrom<u32> for WordWidth {
    type Error = ConfigError;

    fn try_from(width: u32) -> std::result::Result<Self, Self::Error> {
        match width {
            4 => Ok(WordWidth::Four),
            8 => Ok(WordWidth::Eight),
            other => Err(ConfigError::InvalidWidth(other)),
        }
    }
}

impl From<WordWidth> for u32 {
    fn from(width: WordWidth) -> u32 {
        width.bytes()
    }
}

/// Byte order of every integer in a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Whatever the producing host uses
    #[default]
    Native,
    Little,
    Big,
}

impl ByteOrder {
    /// Resolve `Native` to the concrete host order
    pub fn resolve(self) -> Self {
        match self {
            ByteOrder::Native if cfg!(target_endian = "big") => ByteOrder::Big,
            ByteOrder::Native => ByteOrder::Little,
            concrete => concrete,
        }
    }

    fn put(self, buf: &mut Vec<u8>, value: u64, width: usize) {
        match self.resolve() {
            ByteOrder::Big => buf.extend_from_slice(&value.to_be_bytes()[8 - width..]),
            _ => buf.extend_from_slice(&value.to_le_bytes()[..width]),
        }
    }

    fn get(self, bytes: &[u8]) -> u64 {
        let fold_be = |acc: u64, &b: &u8| (acc << 8) | u64::from(b);
        match self.resolve() {
            ByteOrder::Big => bytes.iter().fold(0, fold_be),
            _ => bytes.iter().rev().fold(0, fold_be),
        }
    }
}

/// Encoding choices for writing a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFormat {
    pub word_width: WordWidth,
    pub byte_order: ByteOrder,
}

impl ReportFormat {
    /// Format with an explicit width and order
    pub fn new(word_width: WordWidth, byte_order: ByteOrder) -> Self {
        Self {
            word_width,
            byte_order,
        }
    }

    /// Header a writer emits for this format
    pub fn header(&self) -> ReportHeader {
        ReportHeader {
            address_width: self.word_width.bytes(),
            stack_kind_width: StackKind::ENCODED_WIDTH,
            byte_order: self.byte_order.resolve(),
        }
    }
}

/// Field widths and byte order of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportHeader {
    pub address_width: u32,
    pub stack_kind_width: u32,
    pub byte_order: ByteOrder,
}

impl ReportHeader {
    /// Size in bytes of one context record
    pub fn record_size(&self) -> usize {
        record_size(self.stack_kind_width, self.address_width)
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        self.byte_order.put(&mut buf, u64::from(self.address_width), 4);
        self.byte_order.put(&mut buf, u64::from(self.stack_kind_width), 4);
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Parse a header, detecting its byte order
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let plausible = |order: ByteOrder| {
            let address_width = order.get(&bytes[0..4]) as u32;
            let stack_kind_width = order.get(&bytes[4..8]) as u32;
            let ok = matches!(address_width, 4 | 8) && matches!(stack_kind_width, 1 | 2 | 4 | 8);
            ok.then_some(ReportHeader {
                address_width,
                stack_kind_width,
                byte_order: order,
            })
        };

        if let Some(header) = plausible(ByteOrder::Little).or_else(|| plausible(ByteOrder::Big)) {
            return Ok(header);
        }

        let address_width = ByteOrder::Native.get(&bytes[0..4]) as u32;
        if !matches!(address_width, 4 | 8) {
            return Err(ReportError::UnsupportedAddressWidth(address_width));
        }
        Err(ReportError::UnsupportedStackKindWidth(
            ByteOrder::Native.get(&bytes[4..8]) as u32,
        ))
    }
}

/// Size in bytes of one context record for the given field widths
pub fn record_size(stack_kind_width: u32, address_width: u32) -> usize {
    stack_kind_width as usize + 4 * address_width as usize + 1 + BYTE_VALUES * COUNTER_WIDTH
}

/// Summary of a written report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportStats {
    /// Context records written
    pub contexts: usize,
    /// Total bytes written including the header
    pub bytes_written: u64,
    /// Counter slots clamped to `u32::MAX`
    pub saturated_counters: usize,
}

/// Serialize `accumulator` to `out`
///
/// Each context record is assembled in memory and handed to the writer with a
/// single `write_all`, so a failure never leaves half a record behind from
/// the caller's point of view. Contexts are checked against the address width
/// before the header goes out, so `ValueTooWide` leaves `out` untouched.
pub fn write_report<W: Write>(
    accumulator: &Accumulator,
    out: &mut W,
    format: &ReportFormat,
) -> Result<ReportStats> {
    let header = format.header();
    check_widths(accumulator, header.address_width)?;
    out.write_all(&header.encode())?;

    let mut stats = ReportStats {
        bytes_written: HEADER_SIZE as u64,
        ..Default::default()
    };
    let mut record = Vec::with_capacity(header.record_size());

    for (context, histogram) in accumulator {
        record.clear();
        let saturated = encode_record(&mut record, &header, context, &histogram.to_dense())?;
        out.write_all(&record)?;

        stats.contexts += 1;
        stats.bytes_written += record.len() as u64;
        stats.saturated_counters += saturated;
    }

    if stats.saturated_counters > 0 {
        tracing::warn!(
            saturated = stats.saturated_counters,
            "Counters exceeded u32::MAX and were clamped in the report"
        );
    }

    Ok(stats)
}

/// Serialize `accumulator` to a file, creating or truncating it
///
/// An accumulator that cannot be encoded at the configured width is rejected
/// before the file is created.
pub fn write_report_file<P: AsRef<Path>>(
    accumulator: &Accumulator,
    path: P,
    format: &ReportFormat,
) -> Result<ReportStats> {
    let path = path.as_ref();
    check_widths(accumulator, format.header().address_width)?;
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let stats = write_report(accumulator, &mut writer, format)?;
    writer.flush()?;

    tracing::info!(
        path = %path.display(),
        contexts = stats.contexts,
        bytes = stats.bytes_written,
        "Wrote histogram report"
    );
    Ok(stats)
}

/// Reject the first context field that does not fit in `width` bytes
fn check_widths(accumulator: &Accumulator, width: u32) -> Result<()> {
    for context in accumulator.iter().map(|(context, _)| context) {
        for (field, value) in context.address_fields() {
            check_width(field, value, width)?;
        }
    }
    Ok(())
}

fn check_width(field: &'static str, value: u64, width: u32) -> Result<()> {
    if width < 8 && value >> (width * 8) != 0 {
        return Err(ReportError::ValueTooWide {
            field,
            value,
            width,
        });
    }
    Ok(())
}

/// Encode one context record, returning the number of saturated counters
fn encode_record(
    buf: &mut Vec<u8>,
    header: &ReportHeader,
    context: &ExecutionContext,
    counts: &DenseCounts,
) -> Result<usize> {
    let order = header.byte_order;
    let width = header.address_width;

    order.put(
        buf,
        u64::from(context.stack_kind.as_raw()),
        header.stack_kind_width as usize,
    );
    for (field, value) in context.address_fields() {
        check_width(field, value, width)?;
        order.put(buf, value, width as usize);
    }
    buf.push(u8::from(context.is_kernel_mode));

    let (wire, saturated) = counts.to_wire();
    for count in wire {
        order.put(buf, u64::from(count), COUNTER_WIDTH);
    }
    Ok(saturated)
}

/// One decoded context record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub context: ExecutionContext,
    pub counts: DenseCounts,
}

/// A fully decoded report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub header: ReportHeader,
    pub records: Vec<ContextRecord>,
}

impl Report {
    /// Counters for `context`, if present
    pub fn counts_for(&self, context: &ExecutionContext) -> Option<&DenseCounts> {
        self.records
            .iter()
            .find(|r| &r.context == context)
            .map(|r| &r.counts)
    }
}

/// Streaming report decoder
///
/// Yields one [`ContextRecord`] at a time so large reports need not be held
/// in memory.
pub struct ReportReader<R> {
    inner: R,
    header: ReportHeader,
    offset: usize,
    buf: Vec<u8>,
    done: bool,
}

impl<R: Read> ReportReader<R> {
    /// Read and validate the header
    pub fn new(mut inner: R) -> Result<Self> {
        let mut raw = [0u8; HEADER_SIZE];
        let got = read_full(&mut inner, &mut raw)?;
        if got < HEADER_SIZE {
            return Err(ReportError::Truncated {
                offset: got,
                needed: HEADER_SIZE - got,
            });
        }
        let header = ReportHeader::decode(&raw)?;

        Ok(Self {
            inner,
            buf: vec![0; header.record_size()],
            header,
            offset: HEADER_SIZE,
            done: false,
        })
    }

    /// Header of the report being read
    pub fn header(&self) -> &ReportHeader {
        &self.header
    }

    /// Next record, or `None` at a clean end of stream
    pub fn next_record(&mut self) -> Result<Option<ContextRecord>> {
        if self.done {
            return Ok(None);
        }

        let got = read_full(&mut self.inner, &mut self.buf)?;
        if got == 0 {
            self.done = true;
            return Ok(None);
        }
        if got < self.buf.len() {
            self.done = true;
            return Err(ReportError::Truncated {
                offset: self.offset + got,
                needed: self.buf.len() - got,
            });
        }

        let record = decode_record(&self.buf, &self.header, self.offset)?;
        self.offset += self.buf.len();
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for ReportReader<R> {
    type Item = Result<ContextRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode a complete in-memory report
pub fn decode_report(bytes: &[u8]) -> Result<Report> {
    let reader = ReportReader::new(bytes)?;
    let header = *reader.header();
    let records = reader.collect::<Result<Vec<_>>>()?;
    Ok(Report { header, records })
}

/// Decode a report file
pub fn read_report_file<P: AsRef<Path>>(path: P) -> Result<Report> {
    let file = File::open(path.as_ref())?;
    let reader = ReportReader::new(io::BufReader::new(file))?;
    let header = *reader.header();
    let records = reader.collect::<Result<Vec<_>>>()?;
    Ok(Report { header, records })
}

fn decode_record(buf: &[u8], header: &ReportHeader, base: usize) -> Result<ContextRecord> {
    let order = header.byte_order;
    let kind_width = header.stack_kind_width as usize;
    let width = header.address_width as usize;

    let raw_kind = order.get(&buf[..kind_width]);
    let stack_kind = StackKind::from_raw(raw_kind).ok_or(ReportError::UnknownStackKind {
        offset: base,
        value: raw_kind,
    })?;

    let mut pos = kind_width;
    let mut words = [0u64; 4];
    for word in &mut words {
        *word = order.get(&buf[pos..pos + width]);
        pos += width;
    }

    let is_kernel_mode = match buf[pos] {
        0 => false,
        1 => true,
        value => {
            return Err(ReportError::InvalidKernelFlag {
                offset: base + pos,
                value,
            })
        }
    };
    pos += 1;

    let mut wire = [0u32; BYTE_VALUES];
    for (slot, chunk) in wire.iter_mut().zip(buf[pos..].chunks_exact(COUNTER_WIDTH)) {
        *slot = order.get(chunk) as u32;
    }

    Ok(ContextRecord {
        context: ExecutionContext {
            stack_kind,
            caller: words[0],
            pc: words[1],
            sid_first: words[2],
            sid_second: words[3],
            is_kernel_mode,
        },
        counts: DenseCounts::from_wire(&wire),
    })
}

// Like `read_exact`, but reports how much was read instead of failing on EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
