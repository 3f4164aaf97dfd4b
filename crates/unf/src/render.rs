//! Single-line shell-style rendering of BSON values
//!
//! Output follows the controller's own dump format, e.g.
//! `{ "__cmd" : "select", "collection" : "setting" }`, which is what the
//! field extractor anchors on.

use base64::{engine::general_purpose, Engine as _};
use bson::{Bson, Document};
use chrono::{DateTime, Utc};

pub fn render_document(doc: &Document) -> String {
    let mut out = String::new();
    write_document(&mut out, doc);
    out
}

pub fn render_value(value: &Bson) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_document(out: &mut String, doc: &Document) {
    if doc.is_empty() {
        out.push_str("{ }");
        return;
    }

    out.push_str("{ ");
    for (i, (key, value)) in doc.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_string(out, key);
        out.push_str(" : ");
        write_value(out, value);
    }
    out.push_str(" }");
}

// recursion depth is bounded by `MAX_DEPTH` for anything `decode_documents` produced
fn write_value(out: &mut String, value: &Bson) {
    match value {
        Bson::Document(doc) => write_document(out, doc),
        Bson::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Bson::String(s) => write_string(out, s),
        Bson::Int32(n) => out.push_str(&n.to_string()),
        Bson::Int64(n) => out.push_str(&format!("NumberLong({n})")),
        Bson::Double(f) => out.push_str(&format_double(*f)),
        Bson::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Bson::Null => out.push_str("null"),
        Bson::Undefined => out.push_str("undefined"),
        Bson::MinKey => out.push_str("MinKey"),
        Bson::MaxKey => out.push_str("MaxKey"),
        Bson::ObjectId(oid) => out.push_str(&format!("ObjectId(\"{}\")", oid.to_hex())),
        Bson::DateTime(dt) => out.push_str(&format_date(dt.timestamp_millis())),
        Bson::Timestamp(ts) => {
            out.push_str(&format!("Timestamp({}, {})", ts.time, ts.increment))
        }
        Bson::Binary(bin) => out.push_str(&format!(
            "new BinData({}, \"{}\")",
            u8::from(bin.subtype),
            general_purpose::STANDARD.encode(&bin.bytes)
        )),
        Bson::RegularExpression(re) => {
            out.push_str(&format!("/{}/{}", re.pattern, re.options))
        }
        Bson::JavaScriptCode(code) => {
            out.push_str("{ \"$code\" : ");
            write_string(out, code);
            out.push_str(" }");
        }
        Bson::Symbol(sym) => {
            out.push_str("{ \"$symbol\" : ");
            write_string(out, sym);
            out.push_str(" }");
        }
        other => out.push_str(&other.to_string()),
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn format_double(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    // keep a fractional digit so doubles never read as integers
    if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

fn format_date(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(dt) if millis % 1000 == 0 => format!("ISODate(\"{}\")", dt.format("%Y-%m-%dT%H:%M:%SZ")),
        Some(dt) => format!("ISODate(\"{}\")", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
        None => format!("new Date({millis})"),
    }
}
