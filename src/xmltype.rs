//! XML Schema typed property values.
//!
//! A dead property may declare its type with `xsi:type`. For the types
//! in [`XsType`] the text content is checked against the lexical rules
//! of the type and stored in canonical form; any other type name is kept
//! as an opaque label.
use std::fmt::Write;

use base64::Engine;
use regex::Regex;
use time::{Date, Month, Time, UtcOffset};
use uuid::Uuid;

use crate::condition::ConditionCode;
use crate::xmldom::{Element, Node, QName, NS_MS_TYPES_URI, NS_XS_URI};

const BAD_VALUE: &str = "The value was not formatted correctly for its type.";

lazy_static! {
    static ref RE_DECIMAL: Regex = Regex::new(r"^([+-]?)(\d*)(?:\.(\d*))?$").unwrap();
    static ref RE_FLOAT: Regex = Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").unwrap();
    static ref RE_INTEGER: Regex = Regex::new(r"^[+-]?\d+$").unwrap();
    static ref RE_DATETIME: Regex = Regex::new(
        r"^(-?\d{4,})-(\d\d)-(\d\d)T(\d\d):(\d\d):(\d\d)(?:\.(\d+))?(Z|[+-]\d\d:\d\d)?$"
    )
    .unwrap();
    static ref RE_DATE: Regex = Regex::new(r"^(-?\d{4,})-(\d\d)-(\d\d)(Z|[+-]\d\d:\d\d)?$").unwrap();
    static ref RE_DURATION: Regex = Regex::new(
        r"^-?P(\d+Y)?(\d+M)?(\d+D)?(T(\d+H)?(\d+M)?(\d+(?:\.\d+)?S)?)?$"
    )
    .unwrap();
}

/// The XML Schema types that are checked and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XsType {
    String,
    DateTime,
    Date,
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    UnsignedByte,
    UnsignedShort,
    UnsignedInt,
    UnsignedLong,
    Integer,
    Decimal,
    Double,
    Float,
    Duration,
    AnyUri,
    Guid,
    Base64Binary,
    HexBinary,
}

impl XsType {
    pub fn from_qname(name: &QName) -> Option<XsType> {
        if name.ns == NS_MS_TYPES_URI {
            return if name.name == "guid" {
                Some(XsType::Guid)
            } else {
                None
            };
        }
        if name.ns != NS_XS_URI {
            return None;
        }
        let t = match name.name.as_str() {
            "string" => XsType::String,
            "dateTime" => XsType::DateTime,
            "date" => XsType::Date,
            "boolean" => XsType::Boolean,
            "byte" => XsType::Byte,
            "short" => XsType::Short,
            "int" => XsType::Int,
            "long" => XsType::Long,
            "unsignedByte" => XsType::UnsignedByte,
            "unsignedShort" => XsType::UnsignedShort,
            "unsignedInt" => XsType::UnsignedInt,
            "unsignedLong" => XsType::UnsignedLong,
            "integer" => XsType::Integer,
            "decimal" => XsType::Decimal,
            "double" => XsType::Double,
            "float" => XsType::Float,
            "duration" => XsType::Duration,
            "anyURI" => XsType::AnyUri,
            "base64Binary" => XsType::Base64Binary,
            "hexBinary" => XsType::HexBinary,
            _ => return None,
        };
        Some(t)
    }

    pub fn qname(self) -> QName {
        let name = match self {
            XsType::Guid => return QName::new(NS_MS_TYPES_URI, "guid"),
            XsType::String => "string",
            XsType::DateTime => "dateTime",
            XsType::Date => "date",
            XsType::Boolean => "boolean",
            XsType::Byte => "byte",
            XsType::Short => "short",
            XsType::Int => "int",
            XsType::Long => "long",
            XsType::UnsignedByte => "unsignedByte",
            XsType::UnsignedShort => "unsignedShort",
            XsType::UnsignedInt => "unsignedInt",
            XsType::UnsignedLong => "unsignedLong",
            XsType::Integer => "integer",
            XsType::Decimal => "decimal",
            XsType::Double => "double",
            XsType::Float => "float",
            XsType::Duration => "duration",
            XsType::AnyUri => "anyURI",
            XsType::Base64Binary => "base64Binary",
            XsType::HexBinary => "hexBinary",
        };
        QName::new(NS_XS_URI, name)
    }

    // value range of the integer types.
    fn bounds(self) -> Option<(i128, i128)> {
        let b = match self {
            XsType::Byte => (i8::MIN as i128, i8::MAX as i128),
            XsType::Short => (i16::MIN as i128, i16::MAX as i128),
            XsType::Int => (i32::MIN as i128, i32::MAX as i128),
            XsType::Long => (i64::MIN as i128, i64::MAX as i128),
            XsType::UnsignedByte => (0, u8::MAX as i128),
            XsType::UnsignedShort => (0, u16::MAX as i128),
            XsType::UnsignedInt => (0, u32::MAX as i128),
            XsType::UnsignedLong => (0, u64::MAX as i128),
            XsType::Integer => (i128::MIN, i128::MAX),
            _ => return None,
        };
        Some(b)
    }
}

/// A parsed typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum XsValue {
    String(String),
    DateTime(Date, Time, Option<UtcOffset>),
    Date(Date, Option<UtcOffset>),
    Boolean(bool),
    Integer(XsType, i128),
    /// Normalized lexical form.
    Decimal(String),
    Double(f64),
    Float(f32),
    Duration(String),
    AnyUri(String),
    Guid(Uuid),
    Base64Binary(Vec<u8>),
    HexBinary(Vec<u8>),
}

fn bad() -> ConditionCode {
    ConditionCode::unprocessable(BAD_VALUE)
}

impl XsValue {
    /// Parse `text` as a value of type `ty`. Surrounding whitespace is
    /// ignored for everything but strings.
    pub fn parse(ty: XsType, text: &str) -> Result<XsValue, ConditionCode> {
        let s = text.trim();
        let v = match ty {
            XsType::String => XsValue::String(text.to_string()),
            XsType::Boolean => match s {
                "true" | "1" => XsValue::Boolean(true),
                "false" | "0" => XsValue::Boolean(false),
                _ => return Err(bad()),
            },
            XsType::Byte
            | XsType::Short
            | XsType::Int
            | XsType::Long
            | XsType::UnsignedByte
            | XsType::UnsignedShort
            | XsType::UnsignedInt
            | XsType::UnsignedLong
            | XsType::Integer => {
                if !RE_INTEGER.is_match(s) {
                    return Err(bad());
                }
                let n: i128 = s.parse().map_err(|_| bad())?;
                let (min, max) = ty.bounds().ok_or_else(bad)?;
                if n < min || n > max {
                    return Err(bad());
                }
                XsValue::Integer(ty, n)
            }
            XsType::Decimal => XsValue::Decimal(normalize_decimal(s).ok_or_else(bad)?),
            XsType::Double => XsValue::Double(parse_float(s)?),
            XsType::Float => {
                let d = parse_float(s)?;
                let f = d as f32;
                if f.is_infinite() && d.is_finite() {
                    return Err(bad());
                }
                XsValue::Float(f)
            }
            XsType::DateTime => parse_datetime(s).ok_or_else(bad)?,
            XsType::Date => parse_date(s).ok_or_else(bad)?,
            XsType::Duration => {
                let caps = RE_DURATION.captures(s).ok_or_else(bad)?;
                let any_date = (1..=3).any(|i| caps.get(i).is_some());
                let any_time = (5..=7).any(|i| caps.get(i).is_some());
                if (!any_date && !any_time) || (caps.get(4).is_some() && !any_time) {
                    return Err(bad());
                }
                XsValue::Duration(s.to_string())
            }
            XsType::AnyUri => {
                if !valid_uri(s) {
                    return Err(bad());
                }
                XsValue::AnyUri(s.to_string())
            }
            XsType::Guid => XsValue::Guid(Uuid::parse_str(s).map_err(|_| bad())?),
            XsType::Base64Binary => {
                let compact: String = s.split_ascii_whitespace().collect();
                let data = base64::engine::general_purpose::STANDARD
                    .decode(compact)
                    .map_err(|_| bad())?;
                XsValue::Base64Binary(data)
            }
            XsType::HexBinary => XsValue::HexBinary(hex::decode(s).map_err(|_| bad())?),
        };
        Ok(v)
    }

    /// The canonical lexical form.
    pub fn to_lexical(&self) -> String {
        match self {
            XsValue::String(s) => s.clone(),
            XsValue::DateTime(d, t, o) => {
                let mut s = format_date(d);
                let _ = write!(s, "T{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second());
                if t.nanosecond() > 0 {
                    let frac = format!("{:09}", t.nanosecond());
                    s.push('.');
                    s.push_str(frac.trim_end_matches('0'));
                }
                if let Some(o) = o {
                    s.push_str(&format_offset(o));
                }
                s
            }
            XsValue::Date(d, o) => {
                let mut s = format_date(d);
                if let Some(o) = o {
                    s.push_str(&format_offset(o));
                }
                s
            }
            XsValue::Boolean(b) => b.to_string(),
            XsValue::Integer(_, n) => n.to_string(),
            XsValue::Decimal(s) | XsValue::Duration(s) | XsValue::AnyUri(s) => s.clone(),
            XsValue::Double(d) => format_float(*d),
            XsValue::Float(f) => {
                if f.is_finite() {
                    format!("{:E}", f)
                } else {
                    format_float(*f as f64)
                }
            }
            XsValue::Guid(g) => g.hyphenated().to_string(),
            XsValue::Base64Binary(b) => base64::engine::general_purpose::STANDARD.encode(b),
            XsValue::HexBinary(b) => hex::encode_upper(b),
        }
    }
}

/// Check the value of a property element against its `xsi:type` and
/// return the element with its text in canonical form.
///
/// Elements without a type, with an unknown type or with empty content
/// are returned unchanged. A known simple type on an element with child
/// elements is an error.
pub fn coerce(elem: &Element) -> Result<Element, ConditionCode> {
    let ty = match elem.xsi_type.as_ref().and_then(XsType::from_qname) {
        Some(ty) => ty,
        None => return Ok(elem.clone()),
    };
    if elem.has_child_elems() {
        return Err(bad());
    }
    let text = elem.text();
    if text.is_empty() {
        return Ok(elem.clone());
    }
    let value = XsValue::parse(ty, &text)?;
    let mut out = elem.empty_copy();
    out.children = vec![Node::Text(value.to_lexical())];
    Ok(out)
}

fn normalize_decimal(s: &str) -> Option<String> {
    let caps = RE_DECIMAL.captures(s)?;
    let neg = &caps[1] == "-";
    let int = caps.get(2).map_or("", |m| m.as_str());
    let frac = caps.get(3).map_or("", |m| m.as_str());
    if int.is_empty() && frac.is_empty() {
        return None;
    }
    let int = int.trim_start_matches('0');
    let frac = frac.trim_end_matches('0');
    let mut out = String::new();
    if neg && !(int.is_empty() && frac.is_empty()) {
        out.push('-');
    }
    out.push_str(if int.is_empty() { "0" } else { int });
    if !frac.is_empty() {
        out.push('.');
        out.push_str(frac);
    }
    Some(out)
}

fn parse_float(s: &str) -> Result<f64, ConditionCode> {
    match s {
        "INF" | "+INF" => return Ok(f64::INFINITY),
        "-INF" => return Ok(f64::NEG_INFINITY),
        "NaN" => return Ok(f64::NAN),
        _ => {}
    }
    if !RE_FLOAT.is_match(s) {
        return Err(bad());
    }
    let d: f64 = s.parse().map_err(|_| bad())?;
    if d.is_infinite() {
        return Err(bad());
    }
    Ok(d)
}

fn format_float(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d == f64::INFINITY {
        "INF".to_string()
    } else if d == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        format!("{:E}", d)
    }
}

fn parse_ymd(y: &str, m: &str, d: &str) -> Option<Date> {
    let year: i32 = y.parse().ok()?;
    let month = Month::try_from(m.parse::<u8>().ok()?).ok()?;
    Date::from_calendar_date(year, month, d.parse().ok()?).ok()
}

fn parse_offset(s: Option<&str>) -> Option<Option<UtcOffset>> {
    let s = match s {
        None => return Some(None),
        Some("Z") => return Some(Some(UtcOffset::UTC)),
        Some(s) => s,
    };
    let sign: i8 = if s.starts_with('-') { -1 } else { 1 };
    let h: i8 = s.get(1..3)?.parse().ok()?;
    let m: i8 = s.get(4..6)?.parse().ok()?;
    if h > 14 || m > 59 || (h == 14 && m > 0) {
        return None;
    }
    UtcOffset::from_hms(sign * h, sign * m, 0).ok().map(Some)
}

fn parse_datetime(s: &str) -> Option<XsValue> {
    let caps = RE_DATETIME.captures(s)?;
    let date = parse_ymd(&caps[1], &caps[2], &caps[3])?;
    let nanos = match caps.get(7) {
        Some(frac) => {
            let digits: String = frac.as_str().chars().chain("000000000".chars()).take(9).collect();
            digits.parse().ok()?
        }
        None => 0,
    };
    let time = Time::from_hms_nano(
        caps[4].parse().ok()?,
        caps[5].parse().ok()?,
        caps[6].parse().ok()?,
        nanos,
    )
    .ok()?;
    let offset = parse_offset(caps.get(8).map(|m| m.as_str()))?;
    Some(XsValue::DateTime(date, time, offset))
}

fn parse_date(s: &str) -> Option<XsValue> {
    let caps = RE_DATE.captures(s)?;
    let date = parse_ymd(&caps[1], &caps[2], &caps[3])?;
    let offset = parse_offset(caps.get(4).map(|m| m.as_str()))?;
    Some(XsValue::Date(date, offset))
}

fn format_date(d: &Date) -> String {
    let y = d.year();
    let year = if y < 0 {
        format!("-{:04}", -y)
    } else {
        format!("{:04}", y)
    };
    format!("{}-{:02}-{:02}", year, u8::from(d.month()), d.day())
}

fn format_offset(o: &UtcOffset) -> String {
    if o.is_utc() {
        return "Z".to_string();
    }
    let (h, m, _) = o.as_hms();
    let sign = if o.is_negative() { '-' } else { '+' };
    format!("{}{:02}:{:02}", sign, h.abs(), m.abs())
}

// absolute URI or a relative reference.
fn valid_uri(s: &str) -> bool {
    if s.chars().any(|c| c.is_control()) {
        return false;
    }
    match url::Url::parse(s) {
        Ok(_) => true,
        Err(url::ParseError::RelativeUrlWithoutBase) => url::Url::parse("http://base.invalid/")
            .and_then(|base| base.join(s))
            .is_ok(),
        Err(_) => false,
    }
}
