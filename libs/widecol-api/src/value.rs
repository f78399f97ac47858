use std::fmt;
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::converter::TypeConverter;
use crate::error::ConversionError;

/// Pattern used for `DateTime` columns unless the registry is configured otherwise.
pub const DEFAULT_DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A validated `strftime` pattern for `DateTime` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTimeFormat(Arc<str>);

impl DateTimeFormat {
    pub fn new(pattern: &str) -> Result<Self, ConversionError> {
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return Err(ConversionError::new(
                "DateTime",
                format!("invalid date/time pattern '{pattern}'"),
            ));
        }
        Ok(Self(Arc::from(pattern)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DateTimeFormat {
    fn default() -> Self {
        Self(Arc::from(DEFAULT_DATE_TIME_FORMAT))
    }
}

/// Codec tag: how a column's bytes are decoded, encoded, parsed and formatted.
///
/// Built-in codecs follow the usual wide-column conventions (big-endian
/// fixed-width numbers, UTF-8 text). `Custom` delegates to a plugin converter.
#[derive(Clone)]
pub enum ValueType {
    String,
    /// Arbitrary bytes rendered with `\xHH` escapes for non-printable bytes.
    BinaryString,
    Integer,
    Long,
    Float,
    Double,
    Boolean,
    Short,
    DateTime(DateTimeFormat),
    Xml,
    Json,
    Custom(Arc<dyn TypeConverter>),
}

impl ValueType {
    /// Built-in type names, in the order a type picker lists them.
    pub const BUILTIN_NAMES: [&'static str; 11] = [
        "String",
        "BinaryString",
        "Integer",
        "Long",
        "Float",
        "Double",
        "Boolean",
        "Short",
        "DateTime",
        "Xml",
        "Json",
    ];

    pub fn name(&self) -> &str {
        match self {
            ValueType::String => "String",
            ValueType::BinaryString => "BinaryString",
            ValueType::Integer => "Integer",
            ValueType::Long => "Long",
            ValueType::Float => "Float",
            ValueType::Double => "Double",
            ValueType::Boolean => "Boolean",
            ValueType::Short => "Short",
            ValueType::DateTime(_) => "DateTime",
            ValueType::Xml => "Xml",
            ValueType::Json => "Json",
            ValueType::Custom(converter) => converter.name(),
        }
    }

    /// Resolve a built-in type by name (case-insensitive).
    ///
    /// `DateTime` gets `date_format`. Custom converters are resolved by the
    /// engine's registry, not here.
    pub fn builtin(name: &str, date_format: &DateTimeFormat) -> Option<ValueType> {
        let ty = match name.to_ascii_lowercase().as_str() {
            "string" => ValueType::String,
            "binarystring" => ValueType::BinaryString,
            "integer" => ValueType::Integer,
            "long" => ValueType::Long,
            "float" => ValueType::Float,
            "double" => ValueType::Double,
            "boolean" => ValueType::Boolean,
            "short" => ValueType::Short,
            "datetime" => ValueType::DateTime(date_format.clone()),
            "xml" => ValueType::Xml,
            "json" => ValueType::Json,
            _ => return None,
        };
        Some(ty)
    }

    /// Default type for a column that has no explicit type configured.
    ///
    /// - names ending in `timestamp` (any case) hold epoch millis → `Long`
    /// - the row key column `key` → `BinaryString`
    /// - anything else → `String`
    pub fn from_column_name(name: &str) -> ValueType {
        if name.to_ascii_lowercase().ends_with("timestamp") {
            ValueType::Long
        } else if name == crate::row::KEY_COLUMN {
            ValueType::BinaryString
        } else {
            ValueType::String
        }
    }

    /// Suggest a more specific type for text that looks structured.
    ///
    /// `{...}` / `[...]` → `Json`, `<...>` → `Xml`. Advisory only.
    pub fn guess(text: &str) -> Option<ValueType> {
        let t = text.trim();
        if (t.starts_with('{') && t.ends_with('}')) || (t.starts_with('[') && t.ends_with(']')) {
            Some(ValueType::Json)
        } else if t.starts_with('<') && t.ends_with('>') {
            Some(ValueType::Xml)
        } else {
            None
        }
    }

    /// Whether values of this type are compared as text (substring and pattern operators apply).
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            ValueType::String
                | ValueType::BinaryString
                | ValueType::Xml
                | ValueType::Json
                | ValueType::DateTime(_)
                | ValueType::Custom(_)
        )
    }

    /// Stored bytes → in-memory value.
    pub fn decode(&self, bytes: &[u8]) -> Result<Datum, ConversionError> {
        match self {
            ValueType::String => Ok(Datum::Text(self.utf8(bytes)?)),
            ValueType::BinaryString => Ok(Datum::Bytes(bytes.to_vec())),
            ValueType::Integer => Ok(Datum::Int(i32::from_be_bytes(self.fixed(bytes)?))),
            ValueType::Long => Ok(Datum::Long(i64::from_be_bytes(self.fixed(bytes)?))),
            ValueType::Short => Ok(Datum::Short(i16::from_be_bytes(self.fixed(bytes)?))),
            ValueType::Float => Ok(Datum::Float(f32::from_be_bytes(self.fixed(bytes)?))),
            ValueType::Double => Ok(Datum::Double(f64::from_be_bytes(self.fixed(bytes)?))),
            ValueType::Boolean => match self.fixed::<1>(bytes)? {
                [0x00] => Ok(Datum::Bool(false)),
                [0xFF] => Ok(Datum::Bool(true)),
                [b] => Err(self.error(format!("byte 0x{b:02X} is neither 0x00 nor 0xFF"))),
            },
            ValueType::DateTime(fmt) => parse_date_time(fmt, &self.utf8(bytes)?),
            ValueType::Xml => {
                let text = self.utf8(bytes)?;
                check_xml(&text)?;
                Ok(Datum::Xml(text))
            }
            ValueType::Json => serde_json::from_slice(bytes)
                .map(Datum::Json)
                .map_err(|e| self.error(e)),
            ValueType::Custom(converter) => converter.to_text(bytes).map(Datum::Text),
        }
    }

    /// In-memory value → stored bytes. Fails only when `datum` belongs to another type.
    pub fn encode(&self, datum: &Datum) -> Result<Vec<u8>, ConversionError> {
        match (self, datum) {
            (ValueType::String, Datum::Text(s)) => Ok(s.as_bytes().to_vec()),
            (ValueType::BinaryString, Datum::Bytes(b)) => Ok(b.clone()),
            (ValueType::Integer, Datum::Int(v)) => Ok(v.to_be_bytes().to_vec()),
            (ValueType::Long, Datum::Long(v)) => Ok(v.to_be_bytes().to_vec()),
            (ValueType::Short, Datum::Short(v)) => Ok(v.to_be_bytes().to_vec()),
            (ValueType::Float, Datum::Float(v)) => Ok(v.to_be_bytes().to_vec()),
            (ValueType::Double, Datum::Double(v)) => Ok(v.to_be_bytes().to_vec()),
            (ValueType::Boolean, Datum::Bool(v)) => Ok(vec![if *v { 0xFF } else { 0x00 }]),
            (ValueType::DateTime(fmt), Datum::DateTime(dt)) => {
                Ok(dt.format(fmt.as_str()).to_string().into_bytes())
            }
            (ValueType::Xml, Datum::Xml(s)) => Ok(s.as_bytes().to_vec()),
            (ValueType::Json, Datum::Json(v)) => serde_json::to_vec(v).map_err(|e| self.error(e)),
            (ValueType::Custom(converter), Datum::Text(s)) => converter.to_bytes(s),
            (ty, datum) => Err(ConversionError::new(
                ty.name(),
                format!("cannot encode a {} value", datum.kind()),
            )),
        }
    }

    /// User text → in-memory value.
    pub fn parse(&self, text: &str) -> Result<Datum, ConversionError> {
        match self {
            ValueType::String => Ok(Datum::Text(text.to_string())),
            ValueType::BinaryString => Ok(Datum::Bytes(unescape_binary(text))),
            ValueType::Integer => text.trim().parse().map(Datum::Int).map_err(|e| self.error(e)),
            ValueType::Long => text.trim().parse().map(Datum::Long).map_err(|e| self.error(e)),
            ValueType::Short => text.trim().parse().map(Datum::Short).map_err(|e| self.error(e)),
            ValueType::Float => text.trim().parse().map(Datum::Float).map_err(|e| self.error(e)),
            ValueType::Double => text.trim().parse().map(Datum::Double).map_err(|e| self.error(e)),
            ValueType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Datum::Bool(true)),
                "false" => Ok(Datum::Bool(false)),
                other => Err(self.error(format!("'{other}' is not true or false"))),
            },
            ValueType::DateTime(fmt) => parse_date_time(fmt, text.trim()),
            ValueType::Xml => {
                check_xml(text)?;
                Ok(Datum::Xml(text.to_string()))
            }
            ValueType::Json => serde_json::from_str(text)
                .map(Datum::Json)
                .map_err(|e| self.error(e)),
            ValueType::Custom(converter) => {
                let bytes = converter.to_bytes(text)?;
                converter.to_text(&bytes).map(Datum::Text)
            }
        }
    }

    /// In-memory value → display text.
    pub fn format(&self, datum: &Datum) -> String {
        match (self, datum) {
            (ValueType::DateTime(fmt), Datum::DateTime(dt)) => dt.format(fmt.as_str()).to_string(),
            (_, datum) => datum.to_string(),
        }
    }

    fn utf8(&self, bytes: &[u8]) -> Result<String, ConversionError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| self.error(e))
    }

    fn fixed<const N: usize>(&self, bytes: &[u8]) -> Result<[u8; N], ConversionError> {
        bytes.try_into().map_err(|_| {
            self.error(format!("expected {N} bytes, got {}", bytes.len()))
        })
    }

    fn error(&self, msg: impl fmt::Display) -> ConversionError {
        ConversionError::new(self.name(), msg.to_string())
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::DateTime(fmt) => write!(f, "DateTime({})", fmt.as_str()),
            ValueType::Custom(converter) => write!(f, "Custom({})", converter.name()),
            other => f.write_str(other.name()),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ValueType::DateTime(a), ValueType::DateTime(b)) => a == b,
            (ValueType::Custom(a), ValueType::Custom(b)) => a.name() == b.name(),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

/// Decoded in-memory value. One variant per built-in codec; custom
/// converters decode to `Text`.
#[derive(Debug, Clone)]
pub enum Datum {
    Text(String),
    Bytes(Vec<u8>),
    Int(i32),
    Long(i64),
    Short(i16),
    Float(f32),
    Double(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Xml(String),
    Json(serde_json::Value),
}

impl Datum {
    fn kind(&self) -> &'static str {
        match self {
            Datum::Text(_) => "text",
            Datum::Bytes(_) => "bytes",
            Datum::Int(_) => "integer",
            Datum::Long(_) => "long",
            Datum::Short(_) => "short",
            Datum::Float(_) => "float",
            Datum::Double(_) => "double",
            Datum::Bool(_) => "boolean",
            Datum::DateTime(_) => "date/time",
            Datum::Xml(_) => "xml",
            Datum::Json(_) => "json",
        }
    }
}

// Floats compare by bit pattern so NaN survives the round-trip law.
impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Datum::Text(a), Datum::Text(b)) => a == b,
            (Datum::Bytes(a), Datum::Bytes(b)) => a == b,
            (Datum::Int(a), Datum::Int(b)) => a == b,
            (Datum::Long(a), Datum::Long(b)) => a == b,
            (Datum::Short(a), Datum::Short(b)) => a == b,
            (Datum::Float(a), Datum::Float(b)) => a.to_bits() == b.to_bits(),
            (Datum::Double(a), Datum::Double(b)) => a.to_bits() == b.to_bits(),
            (Datum::Bool(a), Datum::Bool(b)) => a == b,
            (Datum::DateTime(a), Datum::DateTime(b)) => a == b,
            (Datum::Xml(a), Datum::Xml(b)) => a == b,
            (Datum::Json(a), Datum::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Text(s) | Datum::Xml(s) => f.write_str(s),
            Datum::Bytes(b) => f.write_str(&escape_binary(b)),
            Datum::Int(v) => write!(f, "{v}"),
            Datum::Long(v) => write!(f, "{v}"),
            Datum::Short(v) => write!(f, "{v}"),
            Datum::Float(v) => write!(f, "{v}"),
            Datum::Double(v) => write!(f, "{v}"),
            Datum::Bool(v) => write!(f, "{v}"),
            Datum::DateTime(dt) => write!(f, "{}", dt.format(DEFAULT_DATE_TIME_FORMAT)),
            Datum::Json(v) => write!(f, "{v}"),
        }
    }
}

/// A value tagged with its codec: the stored byte form plus its decoded form.
///
/// Both forms are always in sync: constructors derive one from the other and
/// every mutation goes through `retag` or `set_text`.
#[derive(Debug, Clone)]
pub struct TypedValue {
    value_type: ValueType,
    raw: Vec<u8>,
    decoded: Datum,
}

impl TypedValue {
    /// Decode stored bytes under `value_type`.
    pub fn decode(value_type: ValueType, raw: Vec<u8>) -> Result<Self, ConversionError> {
        let decoded = value_type.decode(&raw)?;
        Ok(Self { value_type, raw, decoded })
    }

    /// Decode stored bytes, falling back to `BinaryString` when they are
    /// malformed for `value_type`. The error, if any, is handed back for reporting.
    pub fn decode_lossy(value_type: ValueType, raw: Vec<u8>) -> (Self, Option<ConversionError>) {
        match value_type.decode(&raw) {
            Ok(decoded) => (Self { value_type, raw, decoded }, None),
            Err(e) => (Self::binary(raw), Some(e)),
        }
    }

    /// Parse user-entered text under `value_type`; the byte form is derived with `encode`.
    pub fn parse(value_type: ValueType, text: &str) -> Result<Self, ConversionError> {
        let decoded = value_type.parse(text)?;
        let raw = value_type.encode(&decoded)?;
        Ok(Self { value_type, raw, decoded })
    }

    /// Wrap bytes as `BinaryString`, which accepts any input.
    pub fn binary(raw: Vec<u8>) -> Self {
        let decoded = Datum::Bytes(raw.clone());
        Self { value_type: ValueType::BinaryString, raw, decoded }
    }

    /// Wrap text as `String`.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            value_type: ValueType::String,
            raw: text.as_bytes().to_vec(),
            decoded: Datum::Text(text),
        }
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn datum(&self) -> &Datum {
        &self.decoded
    }

    /// Display text under the current type.
    pub fn formatted(&self) -> String {
        self.value_type.format(&self.decoded)
    }

    /// Change the type, re-deriving the decoded form from the existing bytes.
    ///
    /// Bytes that don't fit the new type leave the value as `BinaryString`
    /// and return the error.
    pub fn retag(&mut self, value_type: ValueType) -> Result<(), ConversionError> {
        match value_type.decode(&self.raw) {
            Ok(decoded) => {
                self.value_type = value_type;
                self.decoded = decoded;
                Ok(())
            }
            Err(e) => {
                self.value_type = ValueType::BinaryString;
                self.decoded = Datum::Bytes(self.raw.clone());
                Err(e)
            }
        }
    }

    /// Replace the value with user-entered text under the current type.
    /// On error the value is left unchanged.
    pub fn set_text(&mut self, text: &str) -> Result<(), ConversionError> {
        let decoded = self.value_type.parse(text)?;
        self.raw = self.value_type.encode(&decoded)?;
        self.decoded = decoded;
        Ok(())
    }

    /// A type suggestion for `String` values that look like JSON or XML.
    pub fn guess_type(&self) -> Option<ValueType> {
        match (&self.value_type, &self.decoded) {
            (ValueType::String, Datum::Text(text)) => ValueType::guess(text),
            _ => None,
        }
    }
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        self.value_type == other.value_type && self.raw == other.raw
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted())
    }
}

/// Render bytes as printable ASCII, escaping everything else (and `\`) as `\xHH`.
pub fn escape_binary(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..=0x7E).contains(&b) && b != b'\\' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{b:02X}"));
        }
    }
    out
}

/// Inverse of [`escape_binary`]. A backslash that doesn't start a valid
/// `\xHH` escape is kept literally.
pub fn unescape_binary(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() && bytes[i + 1] == b'x' {
            let hex = std::str::from_utf8(&bytes[i + 2..i + 4]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn parse_date_time(fmt: &DateTimeFormat, text: &str) -> Result<Datum, ConversionError> {
    let err = |e: chrono::ParseError| {
        ConversionError::new("DateTime", format!("'{text}' does not match '{}': {e}", fmt.as_str()))
    };
    match NaiveDateTime::parse_from_str(text, fmt.as_str()) {
        Ok(naive) => Ok(Datum::DateTime(naive.and_utc())),
        // Date-only patterns carry no time fields.
        Err(first) => NaiveDate::parse_from_str(text, fmt.as_str())
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Datum::DateTime(naive.and_utc()))
            .ok_or_else(|| err(first)),
    }
}

fn check_xml(text: &str) -> Result<(), ConversionError> {
    let t = text.trim();
    if t.starts_with('<') && t.ends_with('>') {
        Ok(())
    } else {
        Err(ConversionError::new("Xml", "markup must start with '<' and end with '>'"))
    }
}
