use std::fs;
use std::io;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;
use crate::formats::RecordWriter;
use crate::record_types::Record;

/// Upper bound for the buffer reserved up front for one entry.
const MAX_PREALLOC: usize = 64 * 1024;

/// A length-prefixed record stream. The name comes from its first use: logging the write
/// operations of a database.
///
/// # WriteLog
///
/// WriteLog is a persistent data structure designed to be written to disk
/// that is a sequence of bytestrings.
/// It can be read back in relatively efficiently and yields the same byte
/// strings; on disk, it is represented as entries prefixed by 4 byte
/// big-endian length prefixes:
///
/// ```text
/// llllbbbbbbllllbbllllbbbbbbbbb...
/// ```
///
/// Where l is a length byte and b are bytes of a bytestring. A record is
/// stored as two consecutive entries, key first.
pub struct WriteLogWriter<W: Write> {
    dest: W,

    current_length: u64,
    entries_written: u32,
}

fn encode_u32(val: u32) -> [u8; 4] {
    let mut buf: [u8; 4] = [0; 4];

    for i in 0..4 {
        buf[3 - i] = (val >> (8 * i)) as u8;
    }

    buf
}

fn decode_u32(buf: [u8; 4]) -> u32 {
    let mut val: u32 = 0;

    for i in 0..4 {
        val |= (buf[3 - i] as u32) << (i * 8);
    }

    val
}

impl WriteLogWriter<io::BufWriter<fs::File>> {
    /// Opens a WriteLog for writing. Truncates a file if append == false.
    pub fn new_to_file(file: &Path, append: bool) -> io::Result<Self> {
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(file)
            .map(|f| WriteLogWriter::new(io::BufWriter::new(f)))
    }
}

impl<W: Write> WriteLogWriter<W> {
    /// Return a new WriteLog that writes to dest
    pub fn new(dest: W) -> WriteLogWriter<W> {
        WriteLogWriter {
            dest,
            current_length: 0,
            entries_written: 0,
        }
    }

    /// Appends one length-prefixed entry.
    pub fn write_entry(&mut self, buf: &[u8]) -> io::Result<()> {
        if buf.len() > u32::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "entry longer than 4 GiB",
            ));
        }
        self.dest.write_all(&encode_u32(buf.len() as u32))?;
        self.dest.write_all(buf)?;
        self.current_length += 4 + buf.len() as u64;
        self.entries_written += 1;
        Ok(())
    }

    /// Return how many (bytes,entries) have been written.
    pub fn get_stats(&self) -> (u64, u32) {
        (self.current_length, self.entries_written)
    }

    pub fn into_inner(self) -> W {
        self.dest
    }
}

impl<W: Write> RecordWriter for WriteLogWriter<W> {
    fn write_record(&mut self, record: &Record) -> Result<()> {
        self.write_entry(record.key.as_bytes())?;
        self.write_entry(record.value.as_bytes())?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.dest.flush()?;
        Ok(())
    }

    fn records_written(&self) -> usize {
        (self.entries_written / 2) as usize
    }
}

/// A Reader for WriteLog files. (more information on WriteLog files is to
/// be found above at WriteLogWriter).
pub struct WriteLogReader<R: Read> {
    src: R,
    entries_read: u32,
    bytes_read: usize,
}

impl WriteLogReader<io::BufReader<fs::File>> {
    pub fn new_from_file(file: &Path) -> io::Result<Self> {
        fs::OpenOptions::new()
            .read(true)
            .open(file)
            .map(|f| WriteLogReader::new(io::BufReader::new(f)))
    }
}

impl<R: Read> WriteLogReader<R> {
    pub fn new(src: R) -> WriteLogReader<R> {
        WriteLogReader {
            src,
            entries_read: 0,
            bytes_read: 0,
        }
    }

    pub fn get_stats(&self) -> (u32, usize) {
        (self.entries_read, self.bytes_read)
    }

    /// Fills buf completely. Returns Ok(false) if the source was already at EOF, and an
    /// UnexpectedEof error if it ended within buf.
    #[inline]
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut off = 0;
        while off < buf.len() {
            match self.src.read(&mut buf[off..]) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
                Ok(0) if off == 0 => return Ok(false),
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "Could not read enough data",
                    ))
                }
                Ok(s) => off += s,
            }
        }
        self.bytes_read += off;
        Ok(true)
    }

    /// Reads as many bytes as necessary into a vector and returns it.
    /// Returns None at a clean end of the log.
    pub fn read_vec(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut lengthbuf = [0; 4];

        if !self.read_bytes(&mut lengthbuf)? {
            return Ok(None);
        }

        // The prefix may be garbage; let the buffer grow with the data actually there.
        let length = decode_u32(lengthbuf) as usize;
        let mut buffer = Vec::with_capacity(length.min(MAX_PREALLOC));
        let got = (&mut self.src).take(length as u64).read_to_end(&mut buffer)?;
        self.bytes_read += got;

        if got < length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "length prefix without entry",
            ));
        }
        self.entries_read += 1;
        Ok(Some(buffer))
    }
}

impl<R: Read> Iterator for WriteLogReader<R> {
    type Item = io::Result<Vec<u8>>;
    fn next(&mut self) -> Option<io::Result<Vec<u8>>> {
        self.read_vec().transpose()
    }
}
