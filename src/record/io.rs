//! The fixed-layout record file.
//!
//! Offsets are absolute: the first 2 KiB belong to the caller (drivers
//! keep a text note there), the next 2 KiB hold three strict header
//! lines describing the region, and the byte array starts at 0x1000.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU8, Ordering};

use crate::combinadics::binomial;
use crate::error::Error;
use crate::record::set_record::{MAX_FIXED, RESERVED_LEN, SetRecord};

const DATA_OFFSET: u64 = 0x1000;

const SIZE_LINE: &str = "Full Set -- Size: ";
const VAR_LINE: (&str, &str, &str) = ("Variable Segment -- Size: ", ", M-Value Range: ", " to ");
const FIXED_LINE: (&str, &str) = ("Fixed Segment -- Size: ", ", Values: ");
const TRAILER_LINE: &str = "Data begins 4K (4096) into the file";

const IO_CHUNK: usize = 64 * 1024;

impl SetRecord {
    /// Writes the full file image: reserved region, header block, byte
    /// array. The writer is positioned from the start, so any previous
    /// content at these offsets is overwritten.
    pub fn export<W: Write + Seek>(&self, writer: &mut W) -> Result<(), Error> {
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&self.metadata())?;

        let mut header = String::new();
        header.push_str(SIZE_LINE);
        header.push_str(&self.size().to_string());
        header.push('\n');
        header.push_str(VAR_LINE.0);
        header.push_str(&self.var_size().to_string());
        header.push_str(VAR_LINE.1);
        header.push_str(&self.min_m().to_string());
        header.push_str(VAR_LINE.2);
        header.push_str(&self.max_m().to_string());
        header.push('\n');
        header.push_str(FIXED_LINE.0);
        header.push_str(&self.fixed_size().to_string());
        header.push_str(FIXED_LINE.1);
        for slot in 0..MAX_FIXED {
            if slot > 0 {
                header.push_str(", ");
            }
            let value = self.fixed().get(slot).copied().unwrap_or(0);
            header.push_str(&value.to_string());
        }
        header.push('\n');
        header.push_str(TRAILER_LINE);
        header.push('\n');
        debug_assert!(header.len() <= RESERVED_LEN);
        let mut block = header.into_bytes();
        block.resize(RESERVED_LEN, 0);
        writer.write_all(&block)?;

        let mut chunk = Vec::with_capacity(IO_CHUNK);
        for byte in self.bytes() {
            chunk.push(byte.load(Ordering::Relaxed));
            if chunk.len() == IO_CHUNK {
                writer.write_all(&chunk)?;
                chunk.clear();
            }
        }
        writer.write_all(&chunk)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a full file image into this record, replacing any prior
    /// binding. The header's set size must agree with the size the
    /// record was initialized with.
    pub fn import<R: Read + Seek>(&mut self, reader: &mut R) -> Result<(), Error> {
        reader.seek(SeekFrom::Start(0))?;
        let mut reserved = vec![0u8; RESERVED_LEN].into_boxed_slice();
        read_fully(reader, &mut reserved, "reserved region")?;
        let mut block = vec![0u8; RESERVED_LEN];
        read_fully(reader, &mut block, "header block")?;

        let text = std::str::from_utf8(&block)
            .map_err(|_| Error::Format("header block is not text".into()))?;
        let mut lines = text.lines();
        let mut next_line = || {
            lines
                .next()
                .ok_or_else(|| Error::Format("header block ends early".into()))
        };

        let mut scan = FieldScanner::new(next_line()?);
        scan.literal(SIZE_LINE)?;
        let size = scan.number()? as usize;
        scan.end()?;
        if size != self.size() {
            return Err(Error::WrongSize {
                expected: self.size(),
                found: size,
            });
        }

        let mut scan = FieldScanner::new(next_line()?);
        scan.literal(VAR_LINE.0)?;
        let var_size = scan.number()? as usize;
        scan.literal(VAR_LINE.1)?;
        let min_m = scan.number()?;
        scan.literal(VAR_LINE.2)?;
        let max_m = scan.number()?;
        scan.end()?;

        let mut scan = FieldScanner::new(next_line()?);
        scan.literal(FIXED_LINE.0)?;
        let fixed_size = scan.number()? as usize;
        scan.literal(FIXED_LINE.1)?;
        let mut slots = [0u64; MAX_FIXED];
        for (slot, value) in slots.iter_mut().enumerate() {
            if slot > 0 {
                scan.literal(", ")?;
            }
            *value = scan.number()?;
        }
        scan.end()?;

        if fixed_size > MAX_FIXED {
            return Err(Error::Format("fixed segment longer than four values".into()));
        }
        let fixed = slots[..fixed_size].to_vec();
        if var_size < 1
            || var_size + fixed_size != size
            || min_m < var_size as u64
            || (!fixed.is_empty()
                && (!fixed.windows(2).all(|w| w[0] < w[1]) || fixed[0] <= max_m))
        {
            return Err(Error::Format("header describes an impossible region".into()));
        }

        let base = binomial(min_m - 1, var_size as u64);
        let total = binomial(max_m, var_size as u64).saturating_sub(base);
        let len = usize::try_from(total).map_err(|_| Error::Alloc(total))?;

        reader.seek(SeekFrom::Start(DATA_OFFSET))?;
        let mut bytes: Vec<AtomicU8> = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| Error::Alloc(total))?;
        let mut chunk = vec![0u8; IO_CHUNK];
        let mut remaining = len;
        while remaining > 0 {
            let take = remaining.min(IO_CHUNK);
            read_fully(reader, &mut chunk[..take], "record body")?;
            bytes.extend(chunk[..take].iter().map(|&b| AtomicU8::new(b)));
            remaining -= take;
        }
        match reader.read(&mut [0u8; 1]) {
            Ok(0) => {}
            Ok(_) => {
                return Err(Error::Format("file is larger than the header says".into()));
            }
            Err(e) => return Err(Error::Storage(e)),
        }

        self.install(var_size, min_m, max_m, fixed, bytes.into_boxed_slice(), reserved);
        Ok(())
    }
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<(), Error> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Format(format!("file ends inside the {what}"))
        } else {
            Error::Storage(e)
        }
    })
}

/// Strict cursor over one header line: literals must match exactly and
/// numbers are unsigned decimals.
struct FieldScanner<'a> {
    rest: &'a str,
}

impl<'a> FieldScanner<'a> {
    fn new(line: &'a str) -> Self {
        FieldScanner { rest: line }
    }

    fn literal(&mut self, lit: &str) -> Result<(), Error> {
        match self.rest.strip_prefix(lit) {
            Some(rest) => {
                self.rest = rest;
                Ok(())
            }
            None => Err(Error::Format(format!("expected \"{}\"", lit.trim_end()))),
        }
    }

    fn number(&mut self) -> Result<u64, Error> {
        let digits = self.rest.len() - self.rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return Err(Error::Format("expected a number in the header".into()));
        }
        let (num, rest) = self.rest.split_at(digits);
        self.rest = rest;
        num.parse()
            .map_err(|_| Error::Format("header number out of range".into()))
    }

    fn end(&mut self) -> Result<(), Error> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(Error::Format("trailing junk in a header line".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NULLIF;
    use std::io::Cursor;

    fn sample_record() -> SetRecord {
        let mut rec = SetRecord::new(4).unwrap();
        rec.alloc(2, 2, 6, &[8, 9]).unwrap();
        rec.mark(&[3, 5, 8, 9], NULLIF).unwrap();
        rec.mark(&[2, 6, 8, 9], NULLIF).unwrap();
        rec
    }

    #[test]
    fn export_places_regions_at_fixed_offsets() {
        let rec = sample_record();
        rec.set_metadata(b"note line\n").unwrap();
        let mut file = Cursor::new(Vec::new());
        rec.export(&mut file).unwrap();

        let image = file.into_inner();
        assert_eq!(image.len() as u64, DATA_OFFSET + rec.total());
        assert_eq!(&image[..10], b"note line\n");
        let header = &image[RESERVED_LEN..RESERVED_LEN + 0x100];
        let text = std::str::from_utf8(&header[..header.iter().position(|&b| b == 0).unwrap()]).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "Full Set -- Size: 4");
        assert_eq!(
            lines.next().unwrap(),
            "Variable Segment -- Size: 2, M-Value Range: 2 to 6"
        );
        assert_eq!(
            lines.next().unwrap(),
            "Fixed Segment -- Size: 2, Values: 8, 9, 0, 0"
        );
        assert_eq!(lines.next().unwrap(), "Data begins 4K (4096) into the file");
    }

    #[test]
    fn export_import_round_trip_is_byte_identical() {
        let rec = sample_record();
        rec.set_metadata(b"meta\n").unwrap();
        let mut file = Cursor::new(Vec::new());
        rec.export(&mut file).unwrap();
        let first = file.into_inner();

        let mut back = SetRecord::new(4).unwrap();
        back.import(&mut Cursor::new(first.clone())).unwrap();
        assert_eq!(back.var_size(), rec.var_size());
        assert_eq!(back.min_m(), rec.min_m());
        assert_eq!(back.max_m(), rec.max_m());
        assert_eq!(back.fixed(), rec.fixed());
        assert_eq!(back.total(), rec.total());

        let mut again = Cursor::new(Vec::new());
        back.export(&mut again).unwrap();
        assert_eq!(again.into_inner(), first);
    }

    #[test]
    fn import_rejects_wrong_set_size() {
        let rec = sample_record();
        let mut file = Cursor::new(Vec::new());
        rec.export(&mut file).unwrap();

        let mut other = SetRecord::new(5).unwrap();
        match other.import(&mut Cursor::new(file.into_inner())) {
            Err(Error::WrongSize { expected: 5, found: 4 }) => {}
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn import_rejects_truncated_body() {
        let rec = sample_record();
        let mut file = Cursor::new(Vec::new());
        rec.export(&mut file).unwrap();
        let mut image = file.into_inner();
        image.truncate(image.len() - 1);

        let mut back = SetRecord::new(4).unwrap();
        match back.import(&mut Cursor::new(image)) {
            Err(Error::Format(msg)) => assert!(msg.contains("record body"), "{msg}"),
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn import_rejects_mangled_header() {
        let rec = sample_record();
        let mut file = Cursor::new(Vec::new());
        rec.export(&mut file).unwrap();
        let mut image = file.into_inner();
        image[RESERVED_LEN] = b'X';

        let mut back = SetRecord::new(4).unwrap();
        assert!(matches!(
            back.import(&mut Cursor::new(image)),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn import_rejects_inconsistent_region() {
        let rec = sample_record();
        let mut file = Cursor::new(Vec::new());
        rec.export(&mut file).unwrap();
        let mut image = file.into_inner();
        // fixed[0] dropped below max_m
        let header = String::from_utf8(image[RESERVED_LEN..RESERVED_LEN + 0x100].to_vec()).unwrap();
        let patched = header.replace("Values: 8, 9", "Values: 5, 9");
        image[RESERVED_LEN..RESERVED_LEN + 0x100].copy_from_slice(patched.as_bytes());

        let mut back = SetRecord::new(4).unwrap();
        assert!(matches!(
            back.import(&mut Cursor::new(image)),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn marks_survive_the_round_trip() {
        let rec = sample_record();
        let mut file = Cursor::new(Vec::new());
        rec.export(&mut file).unwrap();

        let mut back = SetRecord::new(4).unwrap();
        back.import(&mut Cursor::new(file.into_inner())).unwrap();
        let mut marked = Vec::new();
        back.query(NULLIF, NULLIF, None, |set, _| marked.push(set.to_vec()));
        marked.sort();
        assert_eq!(marked, vec![vec![2, 6, 8, 9], vec![3, 5, 8, 9]]);
    }
}
