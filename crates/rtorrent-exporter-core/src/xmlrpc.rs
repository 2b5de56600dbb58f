//! Minimal XML-RPC value model and wire codec.
//!
//! rTorrent exposes its control interface over XML-RPC. This module covers
//! exactly the subset the exporter exchanges with it:
//! - requests: `methodCall` with string parameters,
//! - responses: a single `value`, possibly nested arrays (`d.multicall2`
//!   returns one array of per-download arrays),
//! - faults: `faultCode`/`faultString` pairs.
//!
//! Scalar integers arrive as `<i4>`, `<i8>` or `<ex:i8>` depending on the
//! rTorrent build; all are widened to `i64`.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

/// One XML-RPC value.
///
/// Detail rows from `d.multicall2` are `Array`s of scalars, which is why this
/// type doubles as the element type of a decoded download row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Double(f64),
    String(String),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
}

impl Value {
    /// Returns the string content, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Wire-level type name, used in decode error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }
}

/// Error type for XML-RPC exchanges.
#[derive(Debug)]
pub enum XmlRpcError {
    /// The response was not well-formed or used an unsupported construct.
    Parse(String),
    /// The server answered with a `<fault>`.
    Fault { code: i64, message: String },
}

impl std::fmt::Display for XmlRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XmlRpcError::Parse(msg) => write!(f, "XML-RPC parse error: {}", msg),
            XmlRpcError::Fault { code, message } => {
                write!(f, "XML-RPC fault {}: {}", code, message)
            }
        }
    }
}

impl std::error::Error for XmlRpcError {}

// ============================================================
// Request serialization
// ============================================================

/// Serializes one `methodCall` document.
pub fn format_request(method: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(128 + params.len() * 32);
    out.push_str("<?xml version=\"1.0\"?><methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param><value>");
        write_value(&mut out, param);
        out.push_str("</value></param>");
    }
    out.push_str("</params></methodCall>");
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Int(n) => {
            out.push_str("<i8>");
            out.push_str(&n.to_string());
            out.push_str("</i8>");
        }
        Value::Bool(b) => {
            out.push_str("<boolean>");
            out.push_str(if *b { "1" } else { "0" });
            out.push_str("</boolean>");
        }
        Value::Double(d) => {
            out.push_str("<double>");
            out.push_str(&d.to_string());
            out.push_str("</double>");
        }
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                out.push_str("<value>");
                write_value(out, item);
                out.push_str("</value>");
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name><value>");
                write_value(out, member);
                out.push_str("</value></member>");
            }
            out.push_str("</struct>");
        }
    }
}

// ============================================================
// Response parsing
// ============================================================

/// Parses a `methodResponse` document into its single value.
///
/// A `<fault>` response is surfaced as [`XmlRpcError::Fault`].
pub fn parse_response(xml: &str) -> Result<Value, XmlRpcError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut saw_response = false;
    let mut in_fault = false;

    loop {
        match next_event(&mut reader)? {
            Event::Start(e) => match e.name().as_ref() {
                b"methodResponse" => saw_response = true,
                b"fault" => in_fault = true,
                b"value" => {
                    if !saw_response {
                        return Err(XmlRpcError::Parse(
                            "value outside of methodResponse".to_string(),
                        ));
                    }
                    let value = parse_value(&mut reader)?;
                    if in_fault {
                        return Err(parse_fault(value));
                    }
                    return Ok(value);
                }
                b"params" | b"param" => {}
                other => {
                    return Err(XmlRpcError::Parse(format!(
                        "unexpected element <{}>",
                        String::from_utf8_lossy(other)
                    )));
                }
            },
            Event::Eof => {
                return Err(XmlRpcError::Parse("response contains no value".to_string()));
            }
            _ => {}
        }
    }
}

/// Maps a `<fault>` struct into its error form.
fn parse_fault(value: Value) -> XmlRpcError {
    let Value::Struct(members) = value else {
        return XmlRpcError::Parse("fault payload is not a struct".to_string());
    };

    let mut code = 0;
    let mut message = String::new();
    for (name, member) in members {
        match (name.as_str(), member) {
            ("faultCode", Value::Int(n)) => code = n,
            ("faultString", Value::String(s)) => message = s,
            _ => {}
        }
    }
    XmlRpcError::Fault { code, message }
}

/// Parses the content of a `<value>` element whose start tag has already been
/// consumed, up to and including its end tag.
fn parse_value(reader: &mut Reader<&[u8]>) -> Result<Value, XmlRpcError> {
    match next_event(reader)? {
        // Bare text inside <value> is a string per the XML-RPC spec.
        Event::Text(t) => {
            let text = unescape_text(&t)?;
            expect_end(reader, b"value")?;
            Ok(Value::String(text))
        }
        // <value></value> or <value/> content exhausted immediately.
        Event::End(e) if e.name().as_ref() == b"value" => Ok(Value::String(String::new())),
        Event::Empty(e) if e.name().as_ref() == b"string" => {
            expect_end(reader, b"value")?;
            Ok(Value::String(String::new()))
        }
        Event::Start(e) => {
            let value = match e.name().as_ref() {
                b"string" => Value::String(read_scalar(reader, b"string")?),
                b"int" | b"i4" | b"i8" | b"ex:i8" => {
                    let raw = read_scalar(reader, e.name().as_ref())?;
                    let n = raw.trim().parse::<i64>().map_err(|_| {
                        XmlRpcError::Parse(format!("invalid integer {:?}", raw))
                    })?;
                    Value::Int(n)
                }
                b"boolean" => {
                    let raw = read_scalar(reader, b"boolean")?;
                    match raw.trim() {
                        "0" => Value::Bool(false),
                        "1" => Value::Bool(true),
                        other => {
                            return Err(XmlRpcError::Parse(format!(
                                "invalid boolean {:?}",
                                other
                            )));
                        }
                    }
                }
                b"double" => {
                    let raw = read_scalar(reader, b"double")?;
                    let d = raw.trim().parse::<f64>().map_err(|_| {
                        XmlRpcError::Parse(format!("invalid double {:?}", raw))
                    })?;
                    Value::Double(d)
                }
                b"array" => parse_array(reader)?,
                b"struct" => parse_struct(reader)?,
                other => {
                    return Err(XmlRpcError::Parse(format!(
                        "unsupported value type <{}>",
                        String::from_utf8_lossy(other)
                    )));
                }
            };
            expect_end(reader, b"value")?;
            Ok(value)
        }
        other => Err(XmlRpcError::Parse(format!(
            "unexpected content in <value>: {:?}",
            other
        ))),
    }
}

/// Parses `<data><value>…</value>…</data></array>` after `<array>`.
fn parse_array(reader: &mut Reader<&[u8]>) -> Result<Value, XmlRpcError> {
    expect_start(reader, b"data")?;
    let mut items = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) if e.name().as_ref() == b"value" => {
                items.push(parse_value(reader)?);
            }
            Event::Empty(e) if e.name().as_ref() == b"value" => {
                items.push(Value::String(String::new()));
            }
            Event::End(e) if e.name().as_ref() == b"data" => break,
            other => {
                return Err(XmlRpcError::Parse(format!(
                    "unexpected content in <data>: {:?}",
                    other
                )));
            }
        }
    }
    expect_end(reader, b"array")?;
    Ok(Value::Array(items))
}

/// Parses `<member>…</member>…</struct>` after `<struct>`.
fn parse_struct(reader: &mut Reader<&[u8]>) -> Result<Value, XmlRpcError> {
    let mut members = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) if e.name().as_ref() == b"member" => {
                expect_start(reader, b"name")?;
                let name = read_scalar(reader, b"name")?;
                expect_start(reader, b"value")?;
                let value = parse_value(reader)?;
                expect_end(reader, b"member")?;
                members.push((name, value));
            }
            Event::End(e) if e.name().as_ref() == b"struct" => break,
            other => {
                return Err(XmlRpcError::Parse(format!(
                    "unexpected content in <struct>: {:?}",
                    other
                )));
            }
        }
    }
    Ok(Value::Struct(members))
}

/// Reads text up to the closing tag of `tag`. Absent text means empty string.
fn read_scalar(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<String, XmlRpcError> {
    let mut text = String::new();
    loop {
        match next_event(reader)? {
            Event::Text(t) => text.push_str(&unescape_text(&t)?),
            Event::End(e) if e.name().as_ref() == tag => return Ok(text),
            other => {
                return Err(XmlRpcError::Parse(format!(
                    "unexpected content in scalar: {:?}",
                    other
                )));
            }
        }
    }
}

fn expect_start(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<(), XmlRpcError> {
    match next_event(reader)? {
        Event::Start(e) if e.name().as_ref() == tag => Ok(()),
        other => Err(XmlRpcError::Parse(format!(
            "expected <{}>, found {:?}",
            String::from_utf8_lossy(tag),
            other
        ))),
    }
}

fn expect_end(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<(), XmlRpcError> {
    match next_event(reader)? {
        Event::End(e) if e.name().as_ref() == tag => Ok(()),
        other => Err(XmlRpcError::Parse(format!(
            "expected </{}>, found {:?}",
            String::from_utf8_lossy(tag),
            other
        ))),
    }
}

fn next_event<'a>(reader: &mut Reader<&'a [u8]>) -> Result<Event<'a>, XmlRpcError> {
    loop {
        match reader.read_event() {
            Ok(Event::Decl(_)) | Ok(Event::Comment(_)) | Ok(Event::PI(_)) => {}
            Ok(event) => return Ok(event),
            Err(e) => return Err(XmlRpcError::Parse(e.to_string())),
        }
    }
}

fn unescape_text(t: &quick_xml::events::BytesText<'_>) -> Result<String, XmlRpcError> {
    t.unescape()
        .map(|s| s.into_owned())
        .map_err(|e| XmlRpcError::Parse(e.to_string()))
}
