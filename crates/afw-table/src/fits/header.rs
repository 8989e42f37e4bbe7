//! FITS header card parsing and writing.

use crate::error::{Error, Result};
use crate::fits::block::{padded_byte_len, BLOCK_SIZE, CARD_SIZE, HEADER_PAD_BYTE};
use crate::fits::value::{format_value, parse_value, value_end, Value};

/// One 80-byte keyword record.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// Keyword name, left-justified and space-padded.
    pub keyword: [u8; 8],
    /// Present when the card carries a value indicator (`= ` in bytes 8..10).
    pub value: Option<Value>,
    pub comment: Option<String>,
}

/// Returns `true` if `name` can be written as a FITS keyword.
pub fn is_valid_keyword(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 8
        && name
            .bytes()
            .all(|b| matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_'))
}

/// Pad a keyword name to 8 bytes. Longer names are truncated; callers
/// validate with [`is_valid_keyword`] first.
pub fn make_keyword(name: &str) -> [u8; 8] {
    let mut k = [b' '; 8];
    let bytes = name.as_bytes();
    let len = bytes.len().min(8);
    k[..len].copy_from_slice(&bytes[..len]);
    k
}

impl Card {
    pub fn new(keyword: &str, value: impl Into<Value>) -> Self {
        Card {
            keyword: make_keyword(keyword),
            value: Some(value.into()),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// A COMMENT card carrying free-form text.
    pub fn commentary(text: &str) -> Self {
        Card {
            keyword: make_keyword("COMMENT"),
            value: None,
            comment: Some(text.to_string()),
        }
    }

    /// The keyword with trailing blanks removed.
    pub fn keyword_str(&self) -> &str {
        let end = self
            .keyword
            .iter()
            .rposition(|&b| b != b' ')
            .map_or(0, |i| i + 1);
        std::str::from_utf8(&self.keyword[..end]).unwrap_or("")
    }

    pub fn is_end(&self) -> bool {
        &self.keyword == b"END     "
    }

    /// COMMENT, HISTORY and blank keywords never carry values.
    pub fn is_commentary(&self) -> bool {
        matches!(self.keyword_str(), "COMMENT" | "HISTORY" | "")
    }
}

/// Parse a single 80-byte card.
pub fn parse_card(card: &[u8; CARD_SIZE]) -> Result<Card> {
    let mut keyword = [b' '; 8];
    keyword.copy_from_slice(&card[..8]);
    if !keyword
        .iter()
        .all(|b| matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b' ' | b'-' | b'_'))
    {
        return Err(Error::format(format!(
            "invalid keyword {:?}",
            String::from_utf8_lossy(&keyword)
        )));
    }

    let mut parsed = Card {
        keyword,
        value: None,
        comment: None,
    };
    if parsed.is_end() {
        return Ok(parsed);
    }

    if !parsed.is_commentary() && card[8] == b'=' && card[9] == b' ' {
        if let Some((value, comment)) = parse_value(&card[10..]) {
            parsed.value = Some(value);
            parsed.comment = comment;
        }
        return Ok(parsed);
    }

    let text = String::from_utf8_lossy(&card[8..]).trim_end().to_string();
    if !text.is_empty() {
        parsed.comment = Some(text);
    }
    Ok(parsed)
}

/// Append a `CONTINUE` card's piece to the previous card when its string
/// value ends in `&`. Returns whether the card was consumed.
fn continue_string(previous: Option<&mut Card>, image: &[u8; CARD_SIZE]) -> bool {
    let Some(Card {
        value: Some(Value::String(head)),
        comment,
        ..
    }) = previous
    else {
        return false;
    };
    if !head.ends_with('&') {
        return false;
    }
    let Some((Value::String(piece), piece_comment)) = parse_value(&image[10..]) else {
        return false;
    };
    head.pop();
    head.push_str(&piece);
    if piece_comment.is_some() {
        *comment = piece_comment;
    }
    true
}

/// Parse header blocks at the start of `data` up to and including the END
/// card. Returns the cards (END excluded) and the header length in bytes,
/// always a multiple of [`BLOCK_SIZE`]. Long strings split over `CONTINUE`
/// cards are joined.
pub fn parse_header(data: &[u8]) -> Result<(Vec<Card>, usize)> {
    let mut cards = Vec::new();
    for (i, chunk) in data.chunks_exact(CARD_SIZE).enumerate() {
        let bytes: &[u8; CARD_SIZE] = chunk
            .try_into()
            .map_err(|_| Error::format("truncated header card"))?;
        let card = parse_card(bytes)?;
        if &card.keyword == CONTINUE_KEYWORD && continue_string(cards.last_mut(), bytes) {
            continue;
        }
        if card.is_end() {
            let consumed = (i + 1) * CARD_SIZE;
            let header_len = padded_byte_len(consumed);
            if header_len > data.len() {
                return Err(Error::format("header ends inside a partial block"));
            }
            return Ok((cards, header_len));
        }
        cards.push(card);
    }
    Err(Error::format("END card not found"))
}

/// Room between the quotes of one string value field.
const STRING_FIELD_WIDTH: usize = 68;

const CONTINUE_KEYWORD: &[u8; 8] = b"CONTINUE";

/// Fails with `Logic` unless the card's string value and comment are
/// printable ASCII, the only text a FITS header can hold.
pub fn check_card_text(card: &Card) -> Result<()> {
    let printable = |s: &str| s.bytes().all(|b| (b' '..=b'~').contains(&b));
    if let Some(Value::String(s)) = &card.value {
        if !printable(s) {
            return Err(Error::logic(format!(
                "{} value {s:?} is not printable ASCII",
                card.keyword_str()
            )));
        }
    }
    if let Some(comment) = &card.comment {
        if !printable(comment) {
            return Err(Error::logic(format!(
                "{} comment {comment:?} is not printable ASCII",
                card.keyword_str()
            )));
        }
    }
    Ok(())
}

fn escaped_len(s: &str) -> usize {
    s.chars().map(|c| if c == '\'' { 2 } else { c.len_utf8() }).sum()
}

/// Split a string too long for one card into pieces that each fit a value
/// field together with the trailing `&` continuation marker.
fn split_long_string(s: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut width = 0;
    for c in s.chars() {
        let cost = if c == '\'' { 2 } else { c.len_utf8() };
        if width + cost > STRING_FIELD_WIDTH - 1 {
            pieces.push(std::mem::take(&mut piece));
            width = 0;
        }
        piece.push(c);
        width += cost;
    }
    pieces.push(piece);
    pieces
}

fn value_card_image(keyword: &[u8; 8], indicator: bool, value: &Value, comment: Option<&str>) -> [u8; CARD_SIZE] {
    let mut buf = [b' '; CARD_SIZE];
    buf[..8].copy_from_slice(keyword);
    if indicator {
        buf[8] = b'=';
    }
    let mut field = format_value(value);
    if let Some(comment) = comment {
        let sep = value_end(&field) + 1;
        if sep + 3 < 70 {
            field[sep] = b'/';
            let bytes = comment.as_bytes();
            let room = 70 - (sep + 2);
            let len = bytes.len().min(room);
            field[sep + 2..sep + 2 + len].copy_from_slice(&bytes[..len]);
        }
    }
    buf[10..].copy_from_slice(&field);
    buf
}

/// Serialize a card into its 80-byte image. String values longer than one
/// card are cut; [`card_images`] writes them in full.
pub fn format_card(card: &Card) -> [u8; CARD_SIZE] {
    match (&card.value, &card.comment) {
        (Some(value), comment) => value_card_image(&card.keyword, true, value, comment.as_deref()),
        (None, Some(comment)) => {
            let mut buf = [b' '; CARD_SIZE];
            buf[..8].copy_from_slice(&card.keyword);
            let bytes = comment.as_bytes();
            let len = bytes.len().min(72);
            buf[8..8 + len].copy_from_slice(&bytes[..len]);
            buf
        }
        (None, None) => {
            let mut buf = [b' '; CARD_SIZE];
            buf[..8].copy_from_slice(&card.keyword);
            buf
        }
    }
}

/// The card images for one card: a single image, or for long strings the
/// value card followed by `CONTINUE` cards, each piece but the last ending
/// in `&`. The comment goes on the last image.
pub fn card_images(card: &Card) -> Vec<[u8; CARD_SIZE]> {
    let long = match &card.value {
        Some(Value::String(s)) if escaped_len(s) > STRING_FIELD_WIDTH => s,
        _ => return vec![format_card(card)],
    };
    let pieces = split_long_string(long);
    let last = pieces.len() - 1;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, mut piece)| {
            let comment = if i == last {
                card.comment.as_deref()
            } else {
                piece.push('&');
                None
            };
            let value = Value::String(piece);
            if i == 0 {
                value_card_image(&card.keyword, true, &value, comment)
            } else {
                value_card_image(CONTINUE_KEYWORD, false, &value, comment)
            }
        })
        .collect()
}

/// Serialize cards plus the END card into whole header blocks.
pub fn serialize_header(cards: &[Card]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(padded_byte_len((cards.len() + 1) * CARD_SIZE));
    for card in cards {
        for image in card_images(card) {
            buf.extend_from_slice(&image);
        }
    }
    let mut end = [b' '; CARD_SIZE];
    end[..3].copy_from_slice(b"END");
    buf.extend_from_slice(&end);
    buf.resize(padded_byte_len(buf.len()).max(BLOCK_SIZE), HEADER_PAD_BYTE);
    buf
}

/// First card with the given keyword.
pub fn find_card<'a>(cards: &'a [Card], keyword: &str) -> Option<&'a Card> {
    cards.iter().find(|c| c.keyword_str() == keyword)
}

pub fn card_value<'a>(cards: &'a [Card], keyword: &str) -> Option<&'a Value> {
    find_card(cards, keyword).and_then(|c| c.value.as_ref())
}

pub fn card_int(cards: &[Card], keyword: &str) -> Option<i64> {
    card_value(cards, keyword).and_then(Value::as_int)
}

pub fn card_str<'a>(cards: &'a [Card], keyword: &str) -> Option<&'a str> {
    card_value(cards, keyword).and_then(Value::as_str)
}

pub fn card_float(cards: &[Card], keyword: &str) -> Option<f64> {
    card_value(cards, keyword).and_then(Value::as_float)
}

/// A mandatory non-negative integer keyword.
pub fn require_usize(cards: &[Card], keyword: &str) -> Result<usize> {
    let n = card_int(cards, keyword)
        .ok_or_else(|| Error::format(format!("missing required keyword {keyword}")))?;
    usize::try_from(n).map_err(|_| Error::format(format!("{keyword} is negative: {n}")))
}
