//! Decoder for the portal's delimited "sheet" responses.
//!
//! A sheet response is loose markup in which each data row sits between
//! `<TR>` and `</TR>`, optionally as a `<![CDATA[...]]>` block. The row
//! payload is a list of values separated by [`FIELD_DELIMITER`]. The first
//! value of every row is a row-sequence artifact and carries no data.
//!
//! Decoding is total: anything that does not look like a row is skipped.

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

/// The portal's private field separator (DOUBLE DAGGER).
pub const FIELD_DELIMITER: char = '\u{2021}';

/// Leading values per row that precede the first data column.
pub const SEQUENCE_FIELDS: usize = 1;

/// Separator between names in a column list.
pub const COLUMN_DELIMITER: char = '|';

const ROW_OPEN: &str = "<TR";
const ROW_CLOSE: &str = "</TR>";
const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// Ordered column names parsed from a pipe-delimited list.
///
/// Empty segments are kept: columns are matched by position, never by name.
/// A blank or `=` first segment names the row-sequence slot and is not a
/// data column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    columns: Vec<String>,
    data_start: usize,
}

impl ColumnSpec {
    pub fn parse(spec: &str) -> Self {
        let columns: Vec<String> = spec.split(COLUMN_DELIMITER).map(str::to_string).collect();
        let data_start = match columns.first().map(|c| c.trim()) {
            Some("") | Some("=") if columns.len() > 1 => SEQUENCE_FIELDS,
            _ => 0,
        };
        Self {
            columns,
            data_start,
        }
    }

    /// Every segment of the list, placeholders included.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Columns that receive data values, in positional order.
    pub fn data_columns(&self) -> &[String] {
        &self.columns[self.data_start..]
    }

    /// Number of data columns.
    pub fn len(&self) -> usize {
        self.data_columns().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_columns().is_empty()
    }
}

impl From<&str> for ColumnSpec {
    fn from(spec: &str) -> Self {
        Self::parse(spec)
    }
}

/// One decoded row: column-keyed values in column order plus any surplus values.
///
/// Values at blank-named (placeholder) positions are discarded: they appear
/// neither in [`Record::values`] nor in [`Record::overflow`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    values: Vec<(String, String)>,
    overflow: Vec<String>,
}

impl Record {
    /// Value of the first column called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `(column, value)` pairs in column order.
    pub fn values(&self) -> &[(String, String)] {
        &self.values
    }

    /// Values beyond the declared columns, in row order.
    pub fn overflow(&self) -> &[String] {
        &self.overflow
    }

    /// True when every mapped value is empty.
    pub fn is_blank(&self) -> bool {
        self.values.iter().all(|(_, v)| v.is_empty())
    }
}

struct OrderedFields<'a>(&'a [(String, String)]);

impl Serialize for OrderedFields<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Record", 2)?;
        s.serialize_field("fields", &OrderedFields(&self.values))?;
        s.serialize_field("overflow", &self.overflow)?;
        s.end()
    }
}

/// Decode every row of `raw` against `spec`, in input order.
///
/// Rows whose mapped values are all empty are dropped.
pub fn decode(raw: &str, spec: &ColumnSpec) -> Vec<Record> {
    row_payloads(raw)
        .into_iter()
        .filter_map(|payload| decode_row(&payload, spec))
        .collect()
}

/// Map one row payload onto the column spec.
pub fn decode_row(payload: &str, spec: &ColumnSpec) -> Option<Record> {
    let fields: Vec<&str> = payload.split(FIELD_DELIMITER).collect();
    let data = fields.get(SEQUENCE_FIELDS..).unwrap_or_default();
    let columns = spec.data_columns();

    let values = columns
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.trim().is_empty())
        .map(|(i, name)| {
            let value = data.get(i).copied().unwrap_or_default();
            (name.clone(), value.to_string())
        })
        .collect();

    let overflow = data
        .get(columns.len()..)
        .unwrap_or_default()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let record = Record { values, overflow };
    (!record.is_blank()).then_some(record)
}

/// Extract the text payload of every complete `<TR ...>...</TR>` block.
fn row_payloads(raw: &str) -> Vec<String> {
    // ASCII upper-casing keeps byte offsets identical.
    let upper = raw.to_ascii_uppercase();
    let mut payloads = Vec::new();
    let mut cursor = 0;

    while let Some(found) = upper[cursor..].find(ROW_OPEN) {
        let open = cursor + found;
        let after_name = open + ROW_OPEN.len();
        let boundary = upper[after_name..].chars().next();
        if !matches!(boundary, Some(c) if c == '>' || c.is_ascii_whitespace()) {
            // `<TRACK>` and friends.
            cursor = after_name;
            continue;
        }
        let Some(tag_end) = upper[after_name..].find('>') else {
            break;
        };
        let content_start = after_name + tag_end + 1;
        let Some(close) = upper[content_start..].find(ROW_CLOSE) else {
            break;
        };
        let content_end = content_start + close;
        payloads.push(row_text(&raw[content_start..content_end]));
        cursor = content_end + ROW_CLOSE.len();
    }

    payloads
}

/// CDATA content verbatim, otherwise the row with tags stripped and
/// entities unescaped.
fn row_text(content: &str) -> String {
    let trimmed = content.trim();
    if let Some(inner) = trimmed
        .strip_prefix(CDATA_OPEN)
        .and_then(|rest| rest.strip_suffix(CDATA_CLOSE))
    {
        return inner.to_string();
    }
    unescape(&strip_tags(trimmed))
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
