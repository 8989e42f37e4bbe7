//! HDU container: splitting a FITS byte stream into header-data units and
//! assembling new ones.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::fits::block::{pad_to_block, padded_byte_len, BLOCK_SIZE, DATA_PAD_BYTE};
use crate::fits::header::{card_int, card_str, find_card, parse_header, serialize_header, Card};
use crate::fits::value::Value;

/// One header-data unit located inside a [`FitsFile`].
#[derive(Debug, Clone)]
pub struct Hdu {
    /// Header cards, END excluded.
    pub cards: Vec<Card>,
    /// Byte offset of the header in the stream.
    pub header_start: usize,
    /// Byte offset of the data segment.
    pub data_start: usize,
    /// Unpadded length of the data segment.
    pub data_len: usize,
}

impl Hdu {
    pub fn extname(&self) -> Option<&str> {
        card_str(&self.cards, "EXTNAME").map(str::trim)
    }
}

/// A FITS file held in memory.
#[derive(Debug, Clone)]
pub struct FitsFile {
    data: Vec<u8>,
    hdus: Vec<Hdu>,
}

/// Data bytes implied by the mandatory keywords:
/// `|BITPIX|/8 * GCOUNT * (PCOUNT + NAXIS1 * ... * NAXISn)`.
fn data_byte_len(cards: &[Card], is_primary: bool) -> Result<usize> {
    let bitpix = card_int(cards, "BITPIX").ok_or_else(|| Error::format("missing BITPIX"))?;
    let naxis = card_int(cards, "NAXIS").ok_or_else(|| Error::format("missing NAXIS"))?;
    if !matches!(bitpix, 8 | 16 | 32 | 64 | -32 | -64) {
        return Err(Error::format(format!("invalid BITPIX {bitpix}")));
    }
    if naxis == 0 {
        return Ok(0);
    }
    let mut elements: usize = 1;
    for i in 1..=naxis {
        let n = card_int(cards, &format!("NAXIS{i}"))
            .ok_or_else(|| Error::format(format!("missing NAXIS{i}")))?;
        let n = usize::try_from(n).map_err(|_| Error::format(format!("negative NAXIS{i}")))?;
        elements = elements
            .checked_mul(n)
            .ok_or_else(|| Error::format("data size overflow"))?;
    }
    let (pcount, gcount) = if is_primary {
        (0, 1)
    } else {
        (
            card_int(cards, "PCOUNT").unwrap_or(0).max(0) as usize,
            card_int(cards, "GCOUNT").unwrap_or(1).max(0) as usize,
        )
    };
    pcount
        .checked_add(elements)
        .and_then(|n| n.checked_mul(gcount))
        .and_then(|n| n.checked_mul(bitpix.unsigned_abs() as usize / 8))
        .ok_or_else(|| Error::format("data size overflow"))
}

/// Strip a gzip member header and trailer, returning the raw deflate stream.
fn strip_gzip_header(data: &[u8]) -> Result<&[u8]> {
    let bad = || Error::format("malformed gzip stream");
    if data.len() < 18 || data[2] != 8 {
        return Err(bad());
    }
    let flg = data[3];
    let mut pos = 10;
    if flg & 0x04 != 0 {
        let xlen = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2 + xlen;
    }
    for bit in [0x08u8, 0x10] {
        if flg & bit != 0 {
            let nul = data
                .get(pos..)
                .and_then(|rest| rest.iter().position(|&b| b == 0))
                .ok_or_else(bad)?;
            pos += nul + 1;
        }
    }
    if flg & 0x02 != 0 {
        pos += 2;
    }
    if data.len() < pos + 8 {
        return Err(bad());
    }
    Ok(&data[pos..data.len() - 8])
}

impl FitsFile {
    /// Parse a FITS byte stream. Gzip-compressed input is inflated first.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let data = if data.starts_with(&[0x1f, 0x8b]) {
            let raw = strip_gzip_header(&data)?;
            let inflated = miniz_oxide::inflate::decompress_to_vec(raw)
                .map_err(|e| Error::format(format!("gzip inflate failed: {e:?}")))?;
            debug!(compressed = data.len(), inflated = inflated.len(), "inflated gzip input");
            inflated
        } else {
            data
        };

        if data.len() < BLOCK_SIZE {
            return Err(Error::format("file shorter than one FITS block"));
        }

        let mut hdus = Vec::new();
        let mut offset = 0;
        while offset + BLOCK_SIZE <= data.len() {
            let (cards, header_len) = parse_header(&data[offset..])?;
            let is_primary = hdus.is_empty();
            if is_primary && find_card(&cards, "SIMPLE").is_none() {
                return Err(Error::format("first HDU must start with SIMPLE"));
            }
            if !is_primary && find_card(&cards, "XTENSION").is_none() {
                return Err(Error::format("extension HDU must start with XTENSION"));
            }
            let data_len = data_byte_len(&cards, is_primary)?;
            let data_start = offset + header_len;
            if data_len > data.len() - data_start {
                return Err(Error::format(format!(
                    "HDU {} data runs past end of file",
                    hdus.len() + 1
                )));
            }
            hdus.push(Hdu {
                cards,
                header_start: offset,
                data_start,
                data_len,
            });
            offset = data_start + padded_byte_len(data_len);
        }

        Ok(FitsFile { data, hdus })
    }

    /// Read and parse a file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        debug!(path = %path.display(), bytes = data.len(), "read FITS file");
        Self::from_bytes(data)
    }

    /// Number of HDUs, including the primary.
    pub fn len(&self) -> usize {
        self.hdus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hdus.is_empty()
    }

    /// The HDU with 1-based number `number` (1 is the primary HDU).
    pub fn hdu(&self, number: usize) -> Result<&Hdu> {
        number
            .checked_sub(1)
            .and_then(|i| self.hdus.get(i))
            .ok_or(Error::Index {
                index: number,
                len: self.hdus.len(),
            })
    }

    /// Data segment of an HDU, unpadded.
    pub fn data(&self, hdu: &Hdu) -> &[u8] {
        &self.data[hdu.data_start..hdu.data_start + hdu.data_len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hdu> {
        self.hdus.iter()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// A primary HDU with no data, announcing extensions.
pub fn empty_primary_hdu() -> Vec<u8> {
    let cards = vec![
        Card::new("SIMPLE", true).with_comment("conforms to FITS standard"),
        Card::new("BITPIX", 8i64),
        Card::new("NAXIS", 0i64),
        Card::new("EXTEND", true),
    ];
    serialize_header(&cards)
}

/// Serialize header cards and a data segment into one block-padded HDU.
pub fn serialize_hdu(cards: &[Card], data: &[u8]) -> Vec<u8> {
    let mut out = serialize_header(cards);
    out.extend_from_slice(data);
    pad_to_block(&mut out, DATA_PAD_BYTE);
    out
}

/// How [`write_hdus`] treats an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Create a new file, replacing any existing one.
    #[default]
    Write,
    /// Append HDUs to an existing file; creates it when missing.
    Append,
}

impl std::str::FromStr for WriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "w" => Ok(WriteMode::Write),
            "a" => Ok(WriteMode::Append),
            other => Err(Error::logic(format!("unknown write mode '{other}'"))),
        }
    }
}

/// Write already-serialized extension HDUs to `path`.
///
/// In `Write` mode an empty primary HDU is written first. The file handle is
/// closed on every return path.
pub fn write_hdus(path: impl AsRef<Path>, mode: WriteMode, hdus: &[Vec<u8>]) -> Result<()> {
    let path = path.as_ref();
    let file = match mode {
        WriteMode::Write => File::create(path)?,
        WriteMode::Append => OpenOptions::new().create(true).append(true).open(path)?,
    };
    let needs_primary = mode == WriteMode::Write || file.metadata()?.len() == 0;
    let mut out = BufWriter::new(file);
    if needs_primary {
        out.write_all(&empty_primary_hdu())?;
    }
    let mut total = 0;
    for hdu in hdus {
        out.write_all(hdu)?;
        total += hdu.len();
    }
    out.flush()?;
    debug!(path = %path.display(), ?mode, bytes = total, "wrote FITS extensions");
    Ok(())
}

/// Number of extension HDUs already present in `path`, or 0 when it does not exist.
pub fn existing_extension_count(path: impl AsRef<Path>) -> Result<usize> {
    match std::fs::read(path.as_ref()) {
        Ok(bytes) if bytes.is_empty() => Ok(0),
        Ok(bytes) => Ok(FitsFile::from_bytes(bytes)?.len().saturating_sub(1)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Convenience for keyword lookup on an HDU's integer cards.
pub fn hdu_int(hdu: &Hdu, keyword: &str) -> Option<i64> {
    card_int(&hdu.cards, keyword)
}

/// Raw value of a keyword on an HDU.
pub fn hdu_value<'a>(hdu: &'a Hdu, keyword: &str) -> Option<&'a Value> {
    find_card(&hdu.cards, keyword).and_then(|c| c.value.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bintable_hdu(rows: usize, width: usize) -> Vec<u8> {
        let cards = vec![
            Card::new("XTENSION", "BINTABLE"),
            Card::new("BITPIX", 8i64),
            Card::new("NAXIS", 2i64),
            Card::new("NAXIS1", width as i64),
            Card::new("NAXIS2", rows as i64),
            Card::new("PCOUNT", 0i64),
            Card::new("GCOUNT", 1i64),
            Card::new("TFIELDS", 0i64),
            Card::new("EXTNAME", "CAT"),
        ];
        serialize_hdu(&cards, &vec![7u8; rows * width])
    }

    fn two_hdu_file() -> Vec<u8> {
        let mut bytes = empty_primary_hdu();
        bytes.extend(bintable_hdu(3, 4));
        bytes
    }

    #[test]
    fn parse_primary_and_extension() {
        let fits = FitsFile::from_bytes(two_hdu_file()).unwrap();
        assert_eq!(fits.len(), 2);
        let ext = fits.hdu(2).unwrap();
        assert_eq!(ext.extname(), Some("CAT"));
        assert_eq!(ext.data_len, 12);
        assert_eq!(fits.data(ext), &[7u8; 12]);
        assert_eq!(fits.hdu(1).unwrap().data_len, 0);
    }

    #[test]
    fn hdu_numbers_are_one_based() {
        let fits = FitsFile::from_bytes(two_hdu_file()).unwrap();
        assert!(matches!(fits.hdu(0), Err(Error::Index { index: 0, len: 2 })));
        assert!(matches!(fits.hdu(3), Err(Error::Index { index: 3, len: 2 })));
    }

    #[test]
    fn rejects_missing_simple() {
        let bytes = bintable_hdu(1, 1);
        assert!(matches!(FitsFile::from_bytes(bytes), Err(Error::Format(_))));
    }

    #[test]
    fn rejects_truncated_data() {
        let mut bytes = two_hdu_file();
        bytes.truncate(bytes.len() - BLOCK_SIZE);
        assert!(FitsFile::from_bytes(bytes).is_err());
    }

    fn oversized_hdu(pcount: i64, gcount: i64) -> Vec<u8> {
        let cards = vec![
            Card::new("XTENSION", "BINTABLE"),
            Card::new("BITPIX", 8i64),
            Card::new("NAXIS", 2i64),
            Card::new("NAXIS1", i64::MAX),
            Card::new("NAXIS2", 1i64),
            Card::new("PCOUNT", pcount),
            Card::new("GCOUNT", gcount),
            Card::new("TFIELDS", 0i64),
        ];
        let mut bytes = empty_primary_hdu();
        bytes.extend(serialize_header(&cards));
        bytes
    }

    #[test]
    fn rejects_data_sizes_past_usize() {
        for (pcount, gcount) in [(i64::MAX, 1), (0, 3), (i64::MAX, 2)] {
            let result = FitsFile::from_bytes(oversized_hdu(pcount, gcount));
            assert!(matches!(result, Err(Error::Format(_))), "PCOUNT={pcount} GCOUNT={gcount}");
        }
    }

    #[test]
    fn rejects_short_input() {
        assert!(FitsFile::from_bytes(vec![0u8; 100]).is_err());
    }

    #[test]
    fn inflates_gzip_input() {
        let plain = two_hdu_file();
        let deflated = miniz_oxide::deflate::compress_to_vec(&plain, 6);
        let mut gz = vec![0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 0, 3];
        gz.extend_from_slice(&deflated);
        gz.extend_from_slice(&[0u8; 8]);
        let fits = FitsFile::from_bytes(gz).unwrap();
        assert_eq!(fits.len(), 2);
        assert_eq!(fits.as_bytes(), plain.as_slice());
    }

    #[test]
    fn write_mode_parsing() {
        assert_eq!("w".parse::<WriteMode>().unwrap(), WriteMode::Write);
        assert_eq!("a".parse::<WriteMode>().unwrap(), WriteMode::Append);
        assert!("x".parse::<WriteMode>().is_err());
    }

    #[test]
    fn write_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fits");
        write_hdus(&path, WriteMode::Write, &[bintable_hdu(1, 8)]).unwrap();
        assert_eq!(existing_extension_count(&path).unwrap(), 1);
        write_hdus(&path, WriteMode::Append, &[bintable_hdu(2, 8)]).unwrap();
        let fits = FitsFile::open(&path).unwrap();
        assert_eq!(fits.len(), 3);
        assert_eq!(hdu_int(fits.hdu(3).unwrap(), "NAXIS2"), Some(2));
    }

    #[test]
    fn extension_count_of_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(existing_extension_count(dir.path().join("nope.fits")).unwrap(), 0);
    }
}
