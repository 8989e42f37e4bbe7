//! FITS binary table column descriptors, TFORM codes and cell byte order.

use std::fmt;

use crate::error::{Error, Result};
use crate::fits::header::{card_float, card_int, card_str, require_usize, Card};

/// Element type code of a TFORMn value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    /// L -- logical byte (`T`/`F`/0).
    Logical,
    /// X -- bit array.
    Bit,
    /// B -- unsigned byte.
    Byte,
    /// I -- 16-bit signed integer.
    Short,
    /// J -- 32-bit signed integer.
    Int,
    /// K -- 64-bit signed integer.
    Long,
    /// E -- 32-bit IEEE float.
    Float,
    /// D -- 64-bit IEEE float.
    Double,
    /// C -- pair of 32-bit floats.
    ComplexFloat,
    /// M -- pair of 64-bit floats.
    ComplexDouble,
    /// A -- ASCII character.
    Ascii,
}

impl TypeCode {
    pub fn from_char(c: u8) -> Option<Self> {
        Some(match c {
            b'L' => TypeCode::Logical,
            b'X' => TypeCode::Bit,
            b'B' => TypeCode::Byte,
            b'I' => TypeCode::Short,
            b'J' => TypeCode::Int,
            b'K' => TypeCode::Long,
            b'E' => TypeCode::Float,
            b'D' => TypeCode::Double,
            b'C' => TypeCode::ComplexFloat,
            b'M' => TypeCode::ComplexDouble,
            b'A' => TypeCode::Ascii,
            _ => return None,
        })
    }

    pub fn as_char(self) -> char {
        match self {
            TypeCode::Logical => 'L',
            TypeCode::Bit => 'X',
            TypeCode::Byte => 'B',
            TypeCode::Short => 'I',
            TypeCode::Int => 'J',
            TypeCode::Long => 'K',
            TypeCode::Float => 'E',
            TypeCode::Double => 'D',
            TypeCode::ComplexFloat => 'C',
            TypeCode::ComplexDouble => 'M',
            TypeCode::Ascii => 'A',
        }
    }

    /// Bytes per element. Bits report 0; their width is `ceil(repeat / 8)`.
    pub fn element_size(self) -> usize {
        match self {
            TypeCode::Bit => 0,
            TypeCode::Logical | TypeCode::Byte | TypeCode::Ascii => 1,
            TypeCode::Short => 2,
            TypeCode::Int | TypeCode::Float => 4,
            TypeCode::Long | TypeCode::Double | TypeCode::ComplexFloat => 8,
            TypeCode::ComplexDouble => 16,
        }
    }
}

/// Heap descriptor flavor of a variable-length array column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// P -- two 32-bit integers (count, heap offset).
    P,
    /// Q -- two 64-bit integers (count, heap offset).
    Q,
}

impl Descriptor {
    pub fn byte_size(self) -> usize {
        match self {
            Descriptor::P => 8,
            Descriptor::Q => 16,
        }
    }
}

/// A parsed TFORMn value such as `1J`, `20A`, `16X` or `1PE(12)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TForm {
    pub repeat: usize,
    pub code: TypeCode,
    /// Set for variable-length array columns; `code` is then the element type.
    pub descriptor: Option<Descriptor>,
    /// Maximum element count of a variable-length column, when given.
    pub max_len: Option<usize>,
}

impl TForm {
    pub fn fixed(repeat: usize, code: TypeCode) -> Self {
        TForm {
            repeat,
            code,
            descriptor: None,
            max_len: None,
        }
    }

    pub fn variable(code: TypeCode, max_len: usize) -> Self {
        TForm {
            repeat: 1,
            code,
            descriptor: Some(Descriptor::P),
            max_len: Some(max_len),
        }
    }

    /// Bytes this column occupies in each row; `None` when that overflows.
    pub fn checked_byte_width(&self) -> Option<usize> {
        match (self.descriptor, self.code) {
            (Some(d), _) => self.repeat.checked_mul(d.byte_size()),
            (None, TypeCode::Bit) => Some(self.repeat.div_ceil(8)),
            (None, code) => self.repeat.checked_mul(code.element_size()),
        }
    }

    /// Bytes this column occupies in each row. Parsed forms always fit.
    pub fn byte_width(&self) -> usize {
        self.checked_byte_width().unwrap_or(usize::MAX)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::format(format!("invalid TFORM '{s}'"));
        let (body, max_len) = match s.find('(') {
            Some(open) => {
                let close = s[open..].find(')').ok_or_else(invalid)? + open;
                let max = s[open + 1..close].trim().parse::<usize>().map_err(|_| invalid())?;
                (&s[..open], Some(max))
            }
            None => (s, None),
        };

        let digits = body.bytes().take_while(u8::is_ascii_digit).count();
        let repeat = if digits == 0 {
            1
        } else {
            body[..digits].parse::<usize>().map_err(|_| invalid())?
        };
        let rest = body[digits..].as_bytes();
        let tform = match rest {
            [c] => TForm {
                repeat,
                code: TypeCode::from_char(*c).ok_or_else(invalid)?,
                descriptor: None,
                max_len: None,
            },
            [d @ (b'P' | b'Q'), c] => TForm {
                repeat,
                code: TypeCode::from_char(*c).ok_or_else(invalid)?,
                descriptor: Some(if *d == b'P' { Descriptor::P } else { Descriptor::Q }),
                max_len,
            },
            _ => return Err(invalid()),
        };
        if tform.checked_byte_width().is_none() {
            return Err(Error::format(format!("TFORM '{s}' is too wide for a row")));
        }
        Ok(tform)
    }
}

impl fmt::Display for TForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.descriptor {
            Some(d) => {
                let d = if d == Descriptor::P { 'P' } else { 'Q' };
                write!(f, "{}{}{}", self.repeat, d, self.code.as_char())?;
                if let Some(max) = self.max_len {
                    write!(f, "({max})")?;
                }
                Ok(())
            }
            None => write!(f, "{}{}", self.repeat, self.code.as_char()),
        }
    }
}

/// One column of a binary table HDU, as described by its header keywords.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// 1-based column number `n` of the `TxxxXn` keywords.
    pub number: usize,
    pub name: Option<String>,
    pub tform: TForm,
    pub unit: Option<String>,
    pub doc: Option<String>,
    /// TCCLSn: semantic class of the column (`Array`, `Object`).
    pub class: Option<String>,
    pub tzero: Option<f64>,
    /// Byte offset of the column within a row.
    pub offset: usize,
}

impl ColumnDescriptor {
    pub fn new(name: &str, tform: TForm) -> Self {
        ColumnDescriptor {
            number: 0,
            name: Some(name.to_string()),
            tform,
            unit: None,
            doc: None,
            class: None,
            tzero: None,
            offset: 0,
        }
    }
}

/// Shape and columns of a binary table extension.
#[derive(Debug, Clone, PartialEq)]
pub struct BinTableLayout {
    /// Row width in bytes (NAXIS1).
    pub naxis1: usize,
    /// Number of rows (NAXIS2).
    pub naxis2: usize,
    /// Bytes following the rows: gap plus heap (PCOUNT).
    pub pcount: usize,
    /// Offset of the heap from the start of the data segment.
    pub theap: usize,
    pub columns: Vec<ColumnDescriptor>,
}

impl BinTableLayout {
    /// Read the layout from the header of a BINTABLE extension.
    pub fn from_cards(cards: &[Card]) -> Result<Self> {
        match card_str(cards, "XTENSION").map(str::trim) {
            Some("BINTABLE") => {}
            Some(other) => {
                return Err(Error::format(format!("expected BINTABLE, found '{other}'")));
            }
            None => return Err(Error::format("missing required keyword XTENSION")),
        }
        let naxis1 = require_usize(cards, "NAXIS1")?;
        let naxis2 = require_usize(cards, "NAXIS2")?;
        let pcount = require_usize(cards, "PCOUNT")?;
        let tfields = require_usize(cards, "TFIELDS")?;
        let theap = match card_int(cards, "THEAP") {
            Some(n) => usize::try_from(n).map_err(|_| Error::format("negative THEAP"))?,
            None => naxis1
                .checked_mul(naxis2)
                .ok_or_else(|| Error::format(format!("table of {naxis2} rows of {naxis1} bytes overflows")))?,
        };

        let mut columns = Vec::with_capacity(tfields);
        let mut offset = 0usize;
        for n in 1..=tfields {
            let text = |prefix: &str| card_str(cards, &format!("{prefix}{n}")).map(str::to_string);
            let tform_str =
                text("TFORM").ok_or_else(|| Error::format(format!("missing TFORM{n}")))?;
            let tform = TForm::parse(&tform_str)?;
            columns.push(ColumnDescriptor {
                number: n,
                name: text("TTYPE"),
                tform,
                unit: text("TUNIT").filter(|u| !u.is_empty()),
                doc: text("TDOC"),
                class: text("TCCLS"),
                tzero: card_float(cards, &format!("TZERO{n}")),
                offset,
            });
            offset = offset
                .checked_add(tform.byte_width())
                .ok_or_else(|| Error::format("column widths overflow"))?;
        }
        if offset != naxis1 {
            return Err(Error::format(format!(
                "column widths sum to {offset} bytes but NAXIS1 is {naxis1}"
            )));
        }

        Ok(BinTableLayout {
            naxis1,
            naxis2,
            pcount,
            theap,
            columns,
        })
    }

    /// Assign column numbers and offsets and recompute NAXIS1.
    pub fn from_columns(mut columns: Vec<ColumnDescriptor>, naxis2: usize, heap_len: usize) -> Self {
        let mut offset = 0;
        for (i, col) in columns.iter_mut().enumerate() {
            col.number = i + 1;
            col.offset = offset;
            offset += col.tform.byte_width();
        }
        BinTableLayout {
            naxis1: offset,
            naxis2,
            pcount: heap_len,
            theap: offset * naxis2,
            columns,
        }
    }

    /// Mandatory and per-column header cards, in standard order.
    pub fn to_cards(&self) -> Vec<Card> {
        let mut cards = vec![
            Card::new("XTENSION", "BINTABLE").with_comment("binary table extension"),
            Card::new("BITPIX", 8i64),
            Card::new("NAXIS", 2i64),
            Card::new("NAXIS1", self.naxis1 as i64).with_comment("bytes per row"),
            Card::new("NAXIS2", self.naxis2 as i64).with_comment("number of rows"),
            Card::new("PCOUNT", self.pcount as i64).with_comment("heap size in bytes"),
            Card::new("GCOUNT", 1i64),
            Card::new("TFIELDS", self.columns.len() as i64),
        ];
        for col in &self.columns {
            let n = col.number;
            if let Some(name) = &col.name {
                cards.push(Card::new(&format!("TTYPE{n}"), name.as_str()));
            }
            cards.push(Card::new(&format!("TFORM{n}"), col.tform.to_string()));
            if let Some(unit) = &col.unit {
                cards.push(Card::new(&format!("TUNIT{n}"), unit.as_str()));
            }
            if let Some(doc) = &col.doc {
                cards.push(Card::new(&format!("TDOC{n}"), doc.as_str()));
            }
            if let Some(class) = &col.class {
                cards.push(Card::new(&format!("TCCLS{n}"), class.as_str()));
            }
            if let Some(tzero) = col.tzero {
                // Integral offsets below 2^63 are written as integers.
                let value = if tzero.fract() == 0.0 && tzero.abs() < 9.0e18 {
                    (tzero as i64).into()
                } else {
                    tzero.into()
                };
                cards.push(Card {
                    value: Some(value),
                    ..Card::new(&format!("TZERO{n}"), 0i64)
                });
            }
        }
        cards
    }
}

/// Convert a run of native-order elements into FITS (big-endian) order.
///
/// `flip_sign` toggles the most significant bit of every element, which is
/// how the TZERO offsets for unsigned 16/32/64-bit and signed 8-bit integers
/// are applied.
pub fn native_to_fits(src: &[u8], dst: &mut [u8], element_size: usize, flip_sign: bool) {
    debug_assert_eq!(src.len(), dst.len());
    for (s, d) in src.chunks_exact(element_size).zip(dst.chunks_exact_mut(element_size)) {
        d.copy_from_slice(s);
        if cfg!(target_endian = "little") {
            d.reverse();
        }
        if flip_sign {
            d[0] ^= 0x80;
        }
    }
}

/// Inverse of [`native_to_fits`].
pub fn fits_to_native(src: &[u8], dst: &mut [u8], element_size: usize, flip_sign: bool) {
    debug_assert_eq!(src.len(), dst.len());
    let msb = if cfg!(target_endian = "little") {
        element_size - 1
    } else {
        0
    };
    for (s, d) in src.chunks_exact(element_size).zip(dst.chunks_exact_mut(element_size)) {
        d.copy_from_slice(s);
        if cfg!(target_endian = "little") {
            d.reverse();
        }
        if flip_sign {
            d[msb] ^= 0x80;
        }
    }
}

/// Read bit `i` of a FITS bit array (most significant bit first).
pub fn get_bit(bytes: &[u8], i: usize) -> bool {
    bytes[i / 8] & (0x80 >> (i % 8)) != 0
}

/// Set bit `i` of a FITS bit array (most significant bit first).
pub fn set_bit(bytes: &mut [u8], i: usize, value: bool) {
    let mask = 0x80 >> (i % 8);
    if value {
        bytes[i / 8] |= mask;
    } else {
        bytes[i / 8] &= !mask;
    }
}
