//! Canonical JSON encoding.
//!
//! Everything that is signed or hashed is serialized through [`CanonicalFormatter`]:
//! object keys sorted lexicographically by code point, no insignificant whitespace,
//! integers only, and strings that escape only `"` and `\`. The formatter plugs into
//! `serde_json::Serializer::with_formatter`, so the same serde model produces both the
//! wire form and the signed image.
//!
//! Because `serde_json`'s formatter callbacks see object keys in the order the model
//! emits them, the formatter buffers each object's entries and sorts them when the
//! object closes. Keys are compared as raw UTF-8 bytes, which orders them by code
//! point.

use serde::Serialize;
use serde_json::ser::{CharEscape, Formatter};
use std::collections::BTreeMap;
use std::io;
use std::mem;

/// Serializes `value` into its canonical JSON byte image.
pub fn to_canonical<T>(value: &T) -> serde_json::Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let mut data = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
    value.serialize(&mut ser)?;
    Ok(data)
}

/// A `serde_json` formatter producing canonical JSON.
#[derive(Debug, Default)]
pub struct CanonicalFormatter {
    /// One entry per object currently being assembled, innermost last.
    stack: Vec<Object>,
}

/// An object whose entries are collected out of order and emitted sorted.
#[derive(Debug, Default)]
struct Object {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    key: Vec<u8>,
    value: Vec<u8>,
    in_key: bool,
}

impl Object {
    fn take_entry(&mut self) -> (Vec<u8>, Vec<u8>) {
        (mem::take(&mut self.key), mem::take(&mut self.value))
    }
}

impl CanonicalFormatter {
    /// Creates a new formatter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `bytes` to the current sink: the enclosing object's key or value buffer
    /// when one is open, the caller's writer otherwise.
    fn write_bytes<W>(&mut self, writer: &mut W, bytes: &[u8]) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        match self.stack.last_mut() {
            Some(object) => {
                if object.in_key {
                    object.key.extend_from_slice(bytes);
                } else {
                    object.value.extend_from_slice(bytes);
                }
                Ok(())
            }
            None => writer.write_all(bytes),
        }
    }
}

fn float_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "floating point numbers have no canonical JSON form",
    )
}

impl Formatter for CanonicalFormatter {
    fn write_null<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, b"null")
    }

    fn write_bool<W>(&mut self, writer: &mut W, value: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, if value { b"true" } else { b"false" })
    }

    fn write_i8<W>(&mut self, writer: &mut W, value: i8) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, value.to_string().as_bytes())
    }

    fn write_i16<W>(&mut self, writer: &mut W, value: i16) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, value.to_string().as_bytes())
    }

    fn write_i32<W>(&mut self, writer: &mut W, value: i32) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, value.to_string().as_bytes())
    }

    fn write_i64<W>(&mut self, writer: &mut W, value: i64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, value.to_string().as_bytes())
    }

    fn write_i128<W>(&mut self, writer: &mut W, value: i128) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, value.to_string().as_bytes())
    }

    fn write_u8<W>(&mut self, writer: &mut W, value: u8) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, value.to_string().as_bytes())
    }

    fn write_u16<W>(&mut self, writer: &mut W, value: u16) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, value.to_string().as_bytes())
    }

    fn write_u32<W>(&mut self, writer: &mut W, value: u32) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, value.to_string().as_bytes())
    }

    fn write_u64<W>(&mut self, writer: &mut W, value: u64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, value.to_string().as_bytes())
    }

    fn write_u128<W>(&mut self, writer: &mut W, value: u128) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, value.to_string().as_bytes())
    }

    fn write_f32<W>(&mut self, _writer: &mut W, _value: f32) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        Err(float_error())
    }

    fn write_f64<W>(&mut self, _writer: &mut W, _value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        Err(float_error())
    }

    fn begin_string<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, b"\"")
    }

    fn end_string<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, b"\"")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, fragment.as_bytes())
    }

    // Only `"` and `\` are escaped; everything else, control characters included, is
    // emitted as its raw byte.
    fn write_char_escape<W>(&mut self, writer: &mut W, escape: CharEscape) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        match escape {
            CharEscape::Quote => self.write_bytes(writer, b"\\\""),
            CharEscape::ReverseSolidus => self.write_bytes(writer, b"\\\\"),
            CharEscape::Solidus => self.write_bytes(writer, b"/"),
            CharEscape::Backspace => self.write_bytes(writer, b"\x08"),
            CharEscape::FormFeed => self.write_bytes(writer, b"\x0c"),
            CharEscape::LineFeed => self.write_bytes(writer, b"\n"),
            CharEscape::CarriageReturn => self.write_bytes(writer, b"\r"),
            CharEscape::Tab => self.write_bytes(writer, b"\t"),
            CharEscape::AsciiControl(byte) => self.write_bytes(writer, &[byte]),
        }
    }

    fn begin_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, b"[")
    }

    fn end_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, b"]")
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            self.write_bytes(writer, b",")
        }
    }

    fn end_array_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        Ok(())
    }

    fn begin_object<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.stack.push(Object::default());
        Ok(())
    }

    fn end_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        // The object is complete; emit its entries sorted by key into whatever
        // encloses it.
        let object = match self.stack.pop() {
            Some(object) => object,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unbalanced end of object",
                ))
            }
        };
        let mut out = Vec::new();
        out.push(b'{');
        for (i, (key, value)) in object.entries.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            out.extend_from_slice(key);
            out.push(b':');
            out.extend_from_slice(value);
        }
        out.push(b'}');
        self.write_bytes(writer, &out)
    }

    fn begin_object_key<W>(&mut self, _writer: &mut W, _first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if let Some(object) = self.stack.last_mut() {
            object.in_key = true;
        }
        Ok(())
    }

    fn end_object_key<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if let Some(object) = self.stack.last_mut() {
            object.in_key = false;
        }
        Ok(())
    }

    fn begin_object_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        Ok(())
    }

    fn end_object_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if let Some(object) = self.stack.last_mut() {
            let (key, value) = object.take_entry();
            object.entries.insert(key, value);
        }
        Ok(())
    }

    fn write_raw_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_bytes(writer, fragment.as_bytes())
    }
}
