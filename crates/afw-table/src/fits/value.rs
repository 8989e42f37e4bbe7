use std::fmt;

/// A parsed FITS header value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `T` or `F`.
    Logical(bool),
    Integer(i64),
    Float(f64),
    /// Content between single quotes, trailing blanks removed.
    String(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Logical(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Logical(b) => f.write_str(if *b { "T" } else { "F" }),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x:E}"),
            Value::String(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Logical(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Find ` /` in `field` and return `(before, comment)`.
///
/// Real-world writers often omit the space after the slash, so only the space
/// before it is required.
fn split_comment(field: &[u8]) -> (&[u8], Option<String>) {
    match field.windows(2).position(|w| w == b" /") {
        Some(i) => {
            let mut start = i + 2;
            if field.get(start) == Some(&b' ') {
                start += 1;
            }
            let comment = String::from_utf8_lossy(&field[start..]).trim_end().to_string();
            let comment = if comment.is_empty() { None } else { Some(comment) };
            (&field[..i], comment)
        }
        None => (field, None),
    }
}

/// Parse a quoted string starting at `field[0] == '\''`. Doubled quotes are a
/// literal quote; an unterminated string is accepted as-is.
fn parse_string(field: &[u8]) -> (Value, Option<String>) {
    let mut value = Vec::new();
    let mut i = 1;
    while i < field.len() {
        if field[i] == b'\'' {
            if field.get(i + 1) == Some(&b'\'') {
                value.push(b'\'');
                i += 2;
                continue;
            }
            i += 1;
            break;
        }
        value.push(field[i]);
        i += 1;
    }
    let (_, comment) = split_comment(&field[i.min(field.len())..]);
    let value = String::from_utf8_lossy(&value);
    (Value::String(value.trim_end().to_string()), comment)
}

/// Accepts the FITS `D` exponent as well as `E`.
fn parse_float(s: &str) -> Option<f64> {
    s.replace(['D', 'd'], "E").parse::<f64>().ok()
}

/// Parse the 70-byte value field (card bytes 10..80).
///
/// Returns `None` when the field holds no value (an undefined keyword).
pub fn parse_value(field: &[u8]) -> Option<(Value, Option<String>)> {
    let start = field.iter().position(|&b| b != b' ')?;
    let field = &field[start..];
    if field[0] == b'\'' {
        return Some(parse_string(field));
    }

    let (val_part, comment) = split_comment(field);
    let text = std::str::from_utf8(val_part).ok()?.trim();
    match text {
        "" => None,
        "T" => Some((Value::Logical(true), comment)),
        "F" => Some((Value::Logical(false), comment)),
        _ => {
            let looks_float = text.contains(['.', 'E', 'e', 'D', 'd']);
            if !looks_float {
                if let Ok(n) = text.parse::<i64>() {
                    return Some((Value::Integer(n), comment));
                }
            }
            parse_float(text).map(|f| (Value::Float(f), comment))
        }
    }
}

/// Right-justify `src` so it ends at column 30 of the card, or left-align it
/// when it is wider than the fixed-format slot.
fn right_justify(src: &[u8], dest: &mut [u8; 70]) {
    let width = src.len().max(20).min(70);
    let len = src.len().min(width);
    dest[width - len..width].copy_from_slice(&src[..len]);
}

fn format_float(f: f64) -> String {
    if f == 0.0 {
        return String::from("0.0");
    }
    // Shortest representation that parses back to the same bits.
    let s = format!("{f:E}");
    if s.contains('.') {
        s
    } else {
        s.replacen('E', ".0E", 1)
    }
}

fn write_string(s: &str, buf: &mut [u8; 70]) {
    buf[0] = b'\'';
    let mut pos = 1;
    for ch in s.bytes() {
        let needed = if ch == b'\'' { 2 } else { 1 };
        if pos + needed >= 70 {
            break;
        }
        buf[pos] = ch;
        if ch == b'\'' {
            buf[pos + 1] = b'\'';
        }
        pos += needed;
    }
    // Fixed-format strings hold at least eight characters between the quotes.
    pos = pos.max(9);
    buf[pos] = b'\'';
}

/// Serialize a [`Value`] into the 70-byte value field of a card.
pub fn format_value(value: &Value) -> [u8; 70] {
    let mut buf = [b' '; 70];
    match value {
        Value::Logical(b) => buf[19] = if *b { b'T' } else { b'F' },
        Value::Integer(n) => right_justify(n.to_string().as_bytes(), &mut buf),
        Value::Float(f) => right_justify(format_float(*f).as_bytes(), &mut buf),
        Value::String(s) => write_string(s, &mut buf),
    }
    buf
}

/// Byte index in the value field just past the value itself; comments are
/// placed after it.
pub(crate) fn value_end(field: &[u8; 70]) -> usize {
    if field[0] == b'\'' {
        let mut i = 1;
        while i < 70 {
            if field[i] == b'\'' {
                if i + 1 < 70 && field[i + 1] == b'\'' {
                    i += 2;
                    continue;
                }
                return i + 1;
            }
            i += 1;
        }
        70
    } else {
        field.iter().rposition(|&b| b != b' ').map_or(20, |i| (i + 1).max(20))
    }
}
