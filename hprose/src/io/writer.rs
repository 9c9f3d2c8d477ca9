use bytes::{BufMut, Bytes, BytesMut};
use foldhash::fast::RandomState;
use std::collections::HashMap;

use super::{Value, tags::*};

/// Encodes values into an in-memory buffer.
///
/// A non-simple writer remembers every string it has written and emits a
/// back-reference (`r<index>;`) when the same string is written again.
/// Bytes, lists and maps take a reference index too, so indices stay in
/// step with the reader's table.
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
    refs: Option<WriterRefs>,
}

#[derive(Debug, Default)]
struct WriterRefs {
    strings: HashMap<String, usize, RandomState>,
    count: usize,
}

impl WriterRefs {
    fn next_index(&mut self) -> usize {
        let index = self.count;
        self.count += 1;
        index
    }
}

impl Writer {
    #[must_use]
    pub fn new(simple: bool) -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
            refs: if simple {
                None
            } else {
                Some(WriterRefs::default())
            },
        }
    }

    /// Continues writing after `bytes`, in simple mode.
    #[must_use]
    pub fn with_bytes(bytes: &[u8]) -> Self {
        let mut writer = Self::new(true);
        writer.buf.extend_from_slice(bytes);
        writer
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Forgets all back-reference targets written so far.
    pub fn reset(&mut self) {
        if let Some(refs) = &mut self.refs {
            refs.strings.clear();
            refs.count = 0;
        }
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_byte(&mut self, tag: u8) {
        self.buf.put_u8(tag);
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_nil(&mut self) {
        self.buf.put_u8(TAG_NULL);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(if value { TAG_TRUE } else { TAG_FALSE });
    }

    pub fn write_int(&mut self, value: i64) {
        if (0..=9).contains(&value) {
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            self.buf.put_u8(b'0' + value as u8);
            return;
        }
        let tag = if i32::try_from(value).is_ok() {
            TAG_INTEGER
        } else {
            TAG_LONG
        };
        self.buf.put_u8(tag);
        self.write_number(value);
        self.buf.put_u8(TAG_SEMICOLON);
    }

    pub fn write_double(&mut self, value: f64) {
        if value.is_nan() {
            self.buf.put_u8(TAG_NAN);
        } else if value.is_infinite() {
            self.buf.put_u8(TAG_INFINITY);
            self.buf
                .put_u8(if value > 0.0 { TAG_POS } else { TAG_NEG });
        } else {
            self.buf.put_u8(TAG_DOUBLE);
            self.buf.extend_from_slice(value.to_string().as_bytes());
            self.buf.put_u8(TAG_SEMICOLON);
        }
    }

    pub fn write_string(&mut self, value: &str) {
        let len = value.encode_utf16().count();
        match len {
            0 => self.buf.put_u8(TAG_EMPTY),
            1 => {
                self.buf.put_u8(TAG_UTF8_CHAR);
                self.buf.extend_from_slice(value.as_bytes());
            }
            _ => {
                if let Some(refs) = &mut self.refs {
                    if let Some(&index) = refs.strings.get(value) {
                        self.buf.put_u8(TAG_REF);
                        self.write_number(index);
                        self.buf.put_u8(TAG_SEMICOLON);
                        return;
                    }
                    let index = refs.next_index();
                    refs.strings.insert(value.to_string(), index);
                }
                self.buf.put_u8(TAG_STRING);
                self.write_number(len);
                self.buf.put_u8(TAG_QUOTE);
                self.buf.extend_from_slice(value.as_bytes());
                self.buf.put_u8(TAG_QUOTE);
            }
        }
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.take_ref_index();
        self.buf.put_u8(TAG_BYTES);
        if !value.is_empty() {
            self.write_number(value.len());
        }
        self.buf.put_u8(TAG_QUOTE);
        self.buf.extend_from_slice(value);
        self.buf.put_u8(TAG_QUOTE);
    }

    /// Writes a list of values.
    pub fn write_slice(&mut self, values: &[Value]) {
        self.take_ref_index();
        self.buf.put_u8(TAG_LIST);
        if !values.is_empty() {
            self.write_number(values.len());
        }
        self.buf.put_u8(TAG_OPENBRACE);
        for value in values {
            self.write_value(value);
        }
        self.buf.put_u8(TAG_CLOSEBRACE);
    }

    pub fn write_string_slice(&mut self, values: &[String]) {
        self.take_ref_index();
        self.buf.put_u8(TAG_LIST);
        if !values.is_empty() {
            self.write_number(values.len());
        }
        self.buf.put_u8(TAG_OPENBRACE);
        for value in values {
            self.write_string(value);
        }
        self.buf.put_u8(TAG_CLOSEBRACE);
    }

    pub fn write_map(&mut self, entries: &[(Value, Value)]) {
        self.take_ref_index();
        self.buf.put_u8(TAG_MAP);
        if !entries.is_empty() {
            self.write_number(entries.len());
        }
        self.buf.put_u8(TAG_OPENBRACE);
        for (key, value) in entries {
            self.write_value(key);
            self.write_value(value);
        }
        self.buf.put_u8(TAG_CLOSEBRACE);
    }

    pub fn write_value(&mut self, value: &Value) {
        match value {
            Value::Nil => self.write_nil(),
            Value::Bool(b) => self.write_bool(*b),
            Value::Int(i) => self.write_int(*i),
            Value::Double(d) => self.write_double(*d),
            Value::String(s) => self.write_string(s),
            Value::Bytes(b) => self.write_bytes(b),
            Value::List(l) => self.write_slice(l),
            Value::Map(m) => self.write_map(m),
        }
    }

    fn write_number(&mut self, n: impl std::fmt::Display) {
        self.buf.extend_from_slice(n.to_string().as_bytes());
    }

    fn take_ref_index(&mut self) {
        if let Some(refs) = &mut self.refs {
            refs.next_index();
        }
    }
}
