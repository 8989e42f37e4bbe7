use crate::error::{Error, Result};
use crate::fits::header::{is_valid_keyword, Card};
use crate::fits::value::Value;

/// Keywords that describe HDU structure rather than user metadata. They are
/// removed by [`Metadata::strip_structural`].
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "SIMPLE", "XTENSION", "BITPIX", "NAXIS", "EXTEND", "PCOUNT", "GCOUNT", "TFIELDS", "THEAP",
    "EXTNAME", "AFW_TYPE", "AR_HDU", "ALIAS", "END",
];

/// Column keyword prefixes; followed by the column number.
const COLUMN_PREFIXES: &[&str] = &[
    "TTYPE", "TFORM", "TUNIT", "TDOC", "TCCLS", "TZERO", "TSCAL", "TNULL", "TDIM", "TFLAG",
];

fn is_structural(keyword: &str) -> bool {
    if STRUCTURAL_KEYWORDS.contains(&keyword) {
        return true;
    }
    if let Some(rest) = keyword.strip_prefix("NAXIS") {
        return rest.bytes().all(|b| b.is_ascii_digit());
    }
    COLUMN_PREFIXES.iter().any(|p| {
        keyword
            .strip_prefix(p)
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub keyword: String,
    pub value: Value,
    pub comment: Option<String>,
}

/// Ordered FITS-header-like property list attached to a table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Vec<MetadataEntry>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a keyword, replacing its value in place if it already exists.
    pub fn set(&mut self, keyword: &str, value: impl Into<Value>) -> Result<()> {
        self.set_with_comment(keyword, value, None)
    }

    pub fn set_with_comment(
        &mut self,
        keyword: &str,
        value: impl Into<Value>,
        comment: Option<&str>,
    ) -> Result<()> {
        if !is_valid_keyword(keyword) {
            return Err(Error::logic(format!("invalid metadata keyword '{keyword}'")));
        }
        let value = value.into();
        let comment = comment.map(str::to_string);
        match self.entries.iter_mut().find(|e| e.keyword == keyword) {
            Some(entry) => {
                entry.value = value;
                entry.comment = comment;
            }
            None => self.entries.push(MetadataEntry {
                keyword: keyword.to_string(),
                value,
                comment,
            }),
        }
        Ok(())
    }

    pub fn get(&self, keyword: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|e| e.keyword == keyword)
            .map(|e| &e.value)
    }

    pub fn get_int(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(Value::as_int)
    }

    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(Value::as_str)
    }

    pub fn get_float(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(Value::as_float)
    }

    pub fn get_bool(&self, keyword: &str) -> Option<bool> {
        self.get(keyword).and_then(Value::as_bool)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.entries.iter().any(|e| e.keyword == keyword)
    }

    /// Remove a keyword, returning its value.
    pub fn remove(&mut self, keyword: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|e| e.keyword == keyword)?;
        Some(self.entries.remove(pos).value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetadataEntry> {
        self.entries.iter()
    }

    /// Drop structural HDU keywords, keeping only user metadata.
    pub fn strip_structural(&mut self) {
        self.entries.retain(|e| !is_structural(&e.keyword));
    }

    /// Build from header cards, skipping commentary and valueless cards.
    pub fn from_cards(cards: &[Card]) -> Self {
        let entries = cards
            .iter()
            .filter(|c| !c.is_commentary())
            .filter_map(|c| {
                c.value.as_ref().map(|v| MetadataEntry {
                    keyword: c.keyword_str().to_string(),
                    value: v.clone(),
                    comment: c.comment.clone(),
                })
            })
            .collect();
        Metadata { entries }
    }

    /// Header cards for every entry, in order.
    pub fn to_cards(&self) -> Vec<Card> {
        self.entries
            .iter()
            .map(|e| Card {
                comment: e.comment.clone(),
                ..Card::new(&e.keyword, e.value.clone())
            })
            .collect()
    }
}
