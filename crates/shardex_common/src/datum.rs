use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single scalar value flowing through routing, binding and merging.
/// Shard cursors, bound parameters and generated keys all speak `Datum`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    /// Fixed-point decimal: mantissa × 10^(-scale). `Decimal(12345, 2)` = 123.45
    Decimal(i128, u8),
    Text(String),
    Timestamp(i64), // microseconds since Unix epoch
    Date(i32),      // days since Unix epoch (1970-01-01)
    Bytea(Vec<u8>),
}

impl Datum {
    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Boolean(_) => "boolean",
            Datum::Int32(_) => "int32",
            Datum::Int64(_) => "int64",
            Datum::Float64(_) => "float64",
            Datum::Decimal(_, _) => "decimal",
            Datum::Text(_) => "text",
            Datum::Timestamp(_) => "timestamp",
            Datum::Date(_) => "date",
            Datum::Bytea(_) => "bytea",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int32(v) => Some(*v as i64),
            Datum::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int32(v) => Some(*v as f64),
            Datum::Int64(v) => Some(*v as f64),
            Datum::Float64(v) => Some(*v),
            Datum::Decimal(m, s) => Some(*m as f64 / 10f64.powi(*s as i32)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Numeric addition used by SUM/COUNT merging. NULL is the identity.
    /// Returns `None` for non-numeric operands and on integer overflow.
    pub fn add(&self, other: &Datum) -> Option<Datum> {
        match (self, other) {
            (Datum::Null, other) | (other, Datum::Null) => Some(other.clone()),
            (Datum::Int32(a), Datum::Int32(b)) => Some(Datum::Int64(*a as i64 + *b as i64)),
            (Datum::Int64(a), Datum::Int64(b)) => a.checked_add(*b).map(Datum::Int64),
            (Datum::Int64(a), Datum::Int32(b)) | (Datum::Int32(b), Datum::Int64(a)) => {
                a.checked_add(*b as i64).map(Datum::Int64)
            }
            (Datum::Float64(a), Datum::Float64(b)) => Some(Datum::Float64(a + b)),
            (Datum::Float64(a), Datum::Int64(b)) | (Datum::Int64(b), Datum::Float64(a)) => {
                Some(Datum::Float64(a + *b as f64))
            }
            (Datum::Float64(a), Datum::Int32(b)) | (Datum::Int32(b), Datum::Float64(a)) => {
                Some(Datum::Float64(a + *b as f64))
            }
            (Datum::Decimal(a, sa), Datum::Decimal(b, sb)) => {
                let (na, nb, scale) = decimal_align(*a, *sa, *b, *sb);
                na.checked_add(nb).map(|m| Datum::Decimal(m, scale))
            }
            (Datum::Decimal(m, s), other) | (other, Datum::Decimal(m, s)) => {
                let int = other.as_i64()?;
                let scaled = (int as i128).checked_mul(10i128.checked_pow(*s as u32)?)?;
                m.checked_add(scaled).map(|m| Datum::Decimal(m, *s))
            }
            _ => None,
        }
    }

    /// Render as an SQL literal for statement rewriting.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Datum::Null => "NULL".to_string(),
            Datum::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Datum::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Datum::Timestamp(_) | Datum::Date(_) => format!("'{}'", self),
            Datum::Bytea(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                format!("X'{}'", hex)
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Boolean(b) => write!(f, "{}", b),
            Datum::Int32(v) => write!(f, "{}", v),
            Datum::Int64(v) => write!(f, "{}", v),
            Datum::Float64(v) => write!(f, "{}", v),
            Datum::Decimal(m, s) => write!(f, "{}", decimal_to_string(*m, *s)),
            Datum::Text(s) => write!(f, "{}", s),
            Datum::Timestamp(us) => {
                let secs = us.div_euclid(1_000_000);
                let nsecs = (us.rem_euclid(1_000_000) * 1000) as u32;
                match chrono::DateTime::from_timestamp(secs, nsecs) {
                    Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
                    None => write!(f, "{}", us),
                }
            }
            Datum::Date(days) => {
                let epoch =
                    chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(chrono::NaiveDate::MIN);
                match epoch.checked_add_signed(chrono::Duration::days(*days as i64)) {
                    Some(d) => write!(f, "{}", d.format("%Y-%m-%d")),
                    None => write!(f, "{}", days),
                }
            }
            Datum::Bytea(bytes) => {
                write!(f, "\\x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Datum::Null, _) | (_, Datum::Null) => false, // NULL != NULL in SQL
            (Datum::Boolean(a), Datum::Boolean(b)) => a == b,
            (Datum::Text(a), Datum::Text(b)) => a == b,
            (Datum::Timestamp(a), Datum::Timestamp(b)) => a == b,
            (Datum::Date(a), Datum::Date(b)) => a == b,
            (Datum::Bytea(a), Datum::Bytea(b)) => a == b,
            _ => self.partial_cmp(other) == Some(Ordering::Equal),
        }
    }
}

impl Eq for Datum {}

impl Hash for Datum {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Integers share one tag so Int32(x) and Int64(x) hash alike.
        match self {
            Datum::Null => 0u8.hash(state),
            Datum::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Datum::Int32(v) => {
                2u8.hash(state);
                (*v as i64).hash(state);
            }
            Datum::Int64(v) => {
                2u8.hash(state);
                v.hash(state);
            }
            Datum::Float64(v) => {
                3u8.hash(state);
                v.to_bits().hash(state);
            }
            Datum::Decimal(m, s) => {
                4u8.hash(state);
                let (nm, ns) = decimal_trim(*m, *s);
                nm.hash(state);
                ns.hash(state);
            }
            Datum::Text(s) => {
                5u8.hash(state);
                s.hash(state);
            }
            Datum::Timestamp(us) => {
                6u8.hash(state);
                us.hash(state);
            }
            Datum::Date(days) => {
                7u8.hash(state);
                days.hash(state);
            }
            Datum::Bytea(bytes) => {
                8u8.hash(state);
                bytes.hash(state);
            }
        }
    }
}

#[allow(clippy::non_canonical_partial_ord_impl)]
impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Datum::Null, _) | (_, Datum::Null) => None,
            (Datum::Boolean(a), Datum::Boolean(b)) => a.partial_cmp(b),
            (Datum::Text(a), Datum::Text(b)) => a.partial_cmp(b),
            (Datum::Timestamp(a), Datum::Timestamp(b)) => a.partial_cmp(b),
            (Datum::Date(a), Datum::Date(b)) => a.partial_cmp(b),
            (Datum::Bytea(a), Datum::Bytea(b)) => a.partial_cmp(b),
            (Datum::Decimal(a, sa), Datum::Decimal(b, sb)) => {
                let (na, nb, _) = decimal_align(*a, *sa, *b, *sb);
                na.partial_cmp(&nb)
            }
            (Datum::Decimal(m, s), other) if other.as_i64().is_some() => {
                let scaled = other.as_i64()? as i128 * 10i128.pow(*s as u32);
                m.partial_cmp(&scaled)
            }
            (other, Datum::Decimal(m, s)) if other.as_i64().is_some() => {
                let scaled = other.as_i64()? as i128 * 10i128.pow(*s as u32);
                scaled.partial_cmp(m)
            }
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            },
        }
    }
}

impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).unwrap_or(Ordering::Equal)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Boolean(v)
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Datum::Int32(v)
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int64(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float64(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Text(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::Text(v)
    }
}

/// A row is an ordered list of datums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedRow {
    pub values: Vec<Datum>,
}

impl OwnedRow {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    pub fn get(&self, idx: usize) -> Option<&Datum> {
        self.values.get(idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop every column past `width` (used to hide derived merge columns).
    pub fn truncate(&mut self, width: usize) {
        self.values.truncate(width);
    }
}

impl fmt::Display for OwnedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

// ── Decimal helpers ─────────────────────────────────────────────────────

/// (12345, 2) → "123.45", (-1, 3) → "-0.001", (100, 0) → "100"
pub fn decimal_to_string(mantissa: i128, scale: u8) -> String {
    if scale == 0 {
        return mantissa.to_string();
    }
    let digits = mantissa.unsigned_abs().to_string();
    let scale = scale as usize;
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale - digits.len() + 1), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    let sign = if mantissa < 0 { "-" } else { "" };
    format!("{}{}.{}", sign, int_part, frac_part)
}

/// Bring two decimals to a common scale.
fn decimal_align(a: i128, sa: u8, b: i128, sb: u8) -> (i128, i128, u8) {
    match sa.cmp(&sb) {
        Ordering::Equal => (a, b, sa),
        Ordering::Less => (a * 10i128.pow((sb - sa) as u32), b, sb),
        Ordering::Greater => (a, b * 10i128.pow((sa - sb) as u32), sa),
    }
}

/// Strip trailing zeros so equal decimals hash identically.
pub fn decimal_trim(mut m: i128, mut s: u8) -> (i128, u8) {
    while s > 0 && m % 10 == 0 {
        m /= 10;
        s -= 1;
    }
    (m, s)
}
