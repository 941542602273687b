use crate::prelude::*;

use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::collections::HashMap;
use std::num::NonZeroU16;

// CommandCode {{{
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct CommandCode([u8; 2]);

impl CommandCode {
    pub const fn new(hi: u8, lo: u8) -> Self {
        Self([hi, lo])
    }

    pub const fn from_u16(code: u16) -> Self {
        Self(code.to_be_bytes())
    }

    pub const fn as_u16(&self) -> u16 {
        u16::from_be_bytes(self.0)
    }

    pub const fn bytes(&self) -> [u8; 2] {
        self.0
    }
}

impl From<[u8; 2]> for CommandCode {
    fn from(bytes: [u8; 2]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}{:02X}", self.0[0], self.0[1])
    }
}

impl std::fmt::Debug for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", self)
    }
}

impl std::str::FromStr for CommandCode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != 4 {
            bail!("command code {:?} must be exactly 4 hex digits", s);
        }
        let code = u16::from_str_radix(digits, 16)
            .map_err(|err| anyhow!("command code {:?} is not hex: {}", s, err))?;
        Ok(Self::from_u16(code))
    }
}

impl Serialize for CommandCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
} // }}}

// Schema {{{
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadKind {
    /// ASCII text of exactly this many bytes, NUL/space padded.
    FixedString(usize),
    /// Signed big-endian integer divided by `divisor`, in `unit`.
    Scaled {
        divisor: NonZeroU16,
        unit: Cow<'static, str>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSchema {
    pub name: Cow<'static, str>,
    pub kind: PayloadKind,
}

impl CommandSchema {
    pub fn scaled<N, U>(name: N, divisor: u16, unit: U) -> Result<Self, CatalogError>
    where
        N: Into<Cow<'static, str>>,
        U: Into<Cow<'static, str>>,
    {
        let name = name.into();
        let divisor = NonZeroU16::new(divisor).ok_or_else(|| CatalogError::ZeroDivisor(name.to_string()))?;
        Ok(Self {
            name,
            kind: PayloadKind::Scaled {
                divisor,
                unit: unit.into(),
            },
        })
    }

    pub fn fixed_string<N>(name: N, length: usize) -> Result<Self, CatalogError>
    where
        N: Into<Cow<'static, str>>,
    {
        let name = name.into();
        if length == 0 || length > u8::MAX as usize {
            return Err(CatalogError::InvalidLength(name.to_string(), length));
        }
        Ok(Self {
            name,
            kind: PayloadKind::FixedString(length),
        })
    }

    pub fn unit(&self) -> &str {
        match &self.kind {
            PayloadKind::FixedString(_) => "",
            PayloadKind::Scaled { unit, .. } => unit,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.kind, PayloadKind::Scaled { .. })
    }

    /// Key used when exporting this command as a metric, e.g. "DC Cur1" -> "dc_cur1".
    pub fn metric_name(&self) -> String {
        metric_name(&self.name)
    }
}

pub fn metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
} // }}}

// Built-in table {{{
const fn scaled(divisor: u16, unit: &'static str) -> PayloadKind {
    let divisor = match NonZeroU16::new(divisor) {
        Some(d) => d,
        None => panic!("scaled command with zero divisor"),
    };
    PayloadKind::Scaled {
        divisor,
        unit: Cow::Borrowed(unit),
    }
}

struct Builtin {
    code: CommandCode,
    name: &'static str,
    kind: PayloadKind,
}

const fn entry(hi: u8, lo: u8, name: &'static str, kind: PayloadKind) -> Builtin {
    Builtin {
        code: CommandCode::new(hi, lo),
        name,
        kind,
    }
}

// temperatures are reported by the device in whole degrees C, unit "o" as
// the protocol documentation labels it
const BUILTIN: [Builtin; 20] = [
    entry(0x10, 0x01, "DC Cur1", scaled(10, "A")),
    entry(0x10, 0x02, "DC Volts1", scaled(1, "V")),
    entry(0x10, 0x03, "DC Pwr1", scaled(1, "W")),
    entry(0x10, 0x04, "DC Cur2", scaled(10, "A")),
    entry(0x10, 0x05, "DC Volts2", scaled(1, "V")),
    entry(0x10, 0x06, "DC Pwr2", scaled(1, "W")),
    entry(0x10, 0x07, "AC Current", scaled(10, "A")),
    entry(0x10, 0x08, "AC Volts", scaled(1, "V")),
    entry(0x10, 0x09, "AC Power", scaled(1, "W")),
    entry(0x11, 0x07, "AC I Avg", scaled(10, "A")),
    entry(0x11, 0x08, "AC V Avg", scaled(1, "V")),
    entry(0x11, 0x09, "AC P Avg", scaled(1, "W")),
    entry(0x13, 0x03, "Day Wh", scaled(1, "Wh")),
    entry(0x13, 0x04, "Uptime", scaled(1, "min")),
    entry(0x00, 0x00, "Inverter Type", PayloadKind::FixedString(9)),
    entry(0x00, 0x01, "Serial", PayloadKind::FixedString(1)),
    entry(0x00, 0x08, "Part", PayloadKind::FixedString(1)),
    entry(0x00, 0x40, "FW Version", PayloadKind::FixedString(10)),
    entry(0x20, 0x05, "AC Temp", scaled(1, "o")),
    entry(0x21, 0x08, "DC Temp", scaled(1, "o")),
]; // }}}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("command {0} defined more than once")]
    DuplicateCode(CommandCode),
    #[error("command {0:?} has a zero divisor")]
    ZeroDivisor(String),
    #[error("command {0:?} has invalid string length {1}")]
    InvalidLength(String, usize),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("command {0} is not in the catalog")]
    UnknownCommand(CommandCode),
    #[error("command {command}: expected {expected} payload bytes, got {actual}")]
    LengthMismatch {
        command: CommandCode,
        expected: String,
        actual: usize,
    },
}

// Samples {{{
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Number(f64),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Number(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Number(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecodedSample {
    pub command: CommandCode,
    pub name: String,
    pub value: Value,
    pub unit: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
} // }}}

#[derive(Clone, Debug)]
pub struct Catalog {
    entries: HashMap<CommandCode, CommandSchema>,
    order: Vec<CommandCode>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Catalog {
    /// The device's own command table.
    pub fn builtin() -> Self {
        let mut entries = HashMap::with_capacity(BUILTIN.len());
        let mut order = Vec::with_capacity(BUILTIN.len());
        for b in BUILTIN {
            order.push(b.code);
            entries.insert(
                b.code,
                CommandSchema {
                    name: Cow::Borrowed(b.name),
                    kind: b.kind,
                },
            );
        }
        Self { entries, order }
    }

    /// Built-in table extended with site-specific entries. Codes must not
    /// collide with each other or with the built-in ones.
    pub fn with_entries<I>(extra: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (CommandCode, CommandSchema)>,
    {
        let mut catalog = Self::builtin();
        for (code, schema) in extra {
            if catalog.entries.contains_key(&code) {
                return Err(CatalogError::DuplicateCode(code));
            }
            catalog.order.push(code);
            catalog.entries.insert(code, schema);
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, code: CommandCode) -> Option<&CommandSchema> {
        self.entries.get(&code)
    }

    pub fn contains(&self, code: CommandCode) -> bool {
        self.entries.contains_key(&code)
    }

    /// Case-insensitive reverse lookup by human readable name.
    pub fn find_by_name(&self, name: &str) -> Option<CommandCode> {
        self.order
            .iter()
            .copied()
            .find(|code| self.entries[code].name.eq_ignore_ascii_case(name.trim()))
    }

    /// Codes in table order.
    pub fn codes(&self) -> impl Iterator<Item = CommandCode> + '_ {
        self.order.iter().copied()
    }

    pub fn decode(&self, code: CommandCode, payload: &[u8]) -> Result<DecodedSample, DecodeError> {
        let schema = self.lookup(code).ok_or(DecodeError::UnknownCommand(code))?;

        let value = match &schema.kind {
            PayloadKind::FixedString(length) => {
                if payload.len() != *length {
                    return Err(DecodeError::LengthMismatch {
                        command: code,
                        expected: length.to_string(),
                        actual: payload.len(),
                    });
                }
                Value::Text(decode_ascii(payload))
            }
            PayloadKind::Scaled { divisor, .. } => {
                let raw = decode_signed_be(payload).ok_or_else(|| DecodeError::LengthMismatch {
                    command: code,
                    expected: "1, 2 or 4".to_string(),
                    actual: payload.len(),
                })?;
                Value::Number(raw as f64 / f64::from(divisor.get()))
            }
        };

        Ok(DecodedSample {
            command: code,
            name: schema.name.to_string(),
            value,
            unit: schema.unit().to_string(),
            timestamp: chrono::Utc::now(),
        })
    }
}

fn decode_ascii(payload: &[u8]) -> String {
    let text: String = payload
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
        .collect();
    text.trim_end_matches(|c: char| c == '\0' || c == ' ').to_string()
}

fn decode_signed_be(payload: &[u8]) -> Option<i64> {
    match *payload {
        [a] => Some(i8::from_be_bytes([a]) as i64),
        [a, b] => Some(i16::from_be_bytes([a, b]) as i64),
        [a, b, c, d] => Some(i32::from_be_bytes([a, b, c, d]) as i64),
        _ => None,
    }
}
