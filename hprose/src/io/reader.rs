use bytes::Bytes;

use super::{Value, ValueType, tags::*};
use crate::{Error, ErrorKind, Result};

/// Decodes values from a request buffer.
///
/// The reader keeps a reference table of every string, byte string, list
/// and map it has decoded so that `r<index>;` back-references can be
/// resolved.
#[derive(Debug)]
pub struct Reader {
    buf: Bytes,
    pos: usize,
    refs: Vec<Value>,
    depth: usize,
}

/// Deepest nesting of lists and maps a reader accepts.
pub const MAX_DEPTH: usize = 128;

fn unexpected(tag: u8, expected: &[u8]) -> Error {
    let expected = String::from_utf8_lossy(expected);
    if tag == 0 {
        Error::new(
            ErrorKind::DecodeFailed,
            format!("unexpected end of input, expected one of \"{expected}\""),
        )
    } else {
        Error::new(
            ErrorKind::DecodeFailed,
            format!(
                "unexpected tag '{}', expected one of \"{expected}\"",
                char::from(tag)
            ),
        )
    }
}

impl Reader {
    #[must_use]
    pub fn new(buf: Bytes) -> Self {
        Self {
            buf,
            pos: 0,
            refs: Vec::new(),
            depth: 0,
        }
    }

    /// Number of bytes not consumed yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Forgets all back-reference targets decoded so far.
    pub fn reset(&mut self) {
        self.refs.clear();
    }

    /// # Errors
    ///
    /// Fails at the end of the input.
    pub fn read_byte(&mut self) -> Result<u8> {
        let Some(&b) = self.buf.get(self.pos) else {
            return Err(Error::new(
                ErrorKind::DecodeFailed,
                "unexpected end of input",
            ));
        };
        self.pos += 1;
        Ok(b)
    }

    /// Reads one tag and checks that it is one of `expected`.
    ///
    /// # Errors
    ///
    /// Fails on any other tag or at the end of the input.
    pub fn check_tags(&mut self, expected: &[u8]) -> Result<u8> {
        let tag = self.read_byte().map_err(|_| unexpected(0, expected))?;
        if expected.contains(&tag) {
            Ok(tag)
        } else {
            Err(unexpected(tag, expected))
        }
    }

    /// # Errors
    ///
    /// Fails if the next tag does not start a string.
    pub fn read_string(&mut self) -> Result<String> {
        let tag = self.read_byte()?;
        match tag {
            TAG_EMPTY => Ok(String::new()),
            TAG_UTF8_CHAR => self.read_utf8_char(),
            TAG_STRING => self.read_string_body(),
            TAG_REF => match self.read_ref()? {
                Value::String(s) => Ok(s),
                other => Err(Error::new(
                    ErrorKind::DecodeFailed,
                    format!("reference to {} is not a string", other.type_name()),
                )),
            },
            tag => Err(unexpected(tag, &[TAG_EMPTY, TAG_UTF8_CHAR, TAG_STRING, TAG_REF])),
        }
    }

    /// Reads a container element count terminated by `{`.
    ///
    /// # Errors
    ///
    /// Fails on a malformed count, or a count larger than the input left.
    pub fn read_count(&mut self) -> Result<usize> {
        let count: usize = self.read_int_until(TAG_OPENBRACE)?;
        if count > self.remaining() {
            return Err(Error::new(
                ErrorKind::DecodeFailed,
                format!("invalid count: {count}"),
            ));
        }
        Ok(count)
    }

    /// # Errors
    ///
    /// Fails on malformed input.
    pub fn read_value(&mut self) -> Result<Value> {
        let tag = self.read_byte()?;
        match tag {
            b'0'..=b'9' => Ok(Value::Int(i64::from(tag - b'0'))),
            TAG_INTEGER | TAG_LONG => Ok(Value::Int(self.read_int_until(TAG_SEMICOLON)?)),
            TAG_DOUBLE => {
                let text = self.read_until(TAG_SEMICOLON)?;
                text.parse().map(Value::Double).map_err(|_| {
                    Error::new(ErrorKind::DecodeFailed, format!("invalid double: {text}"))
                })
            }
            TAG_NAN => Ok(Value::Double(f64::NAN)),
            TAG_INFINITY => match self.read_byte()? {
                TAG_NEG => Ok(Value::Double(f64::NEG_INFINITY)),
                _ => Ok(Value::Double(f64::INFINITY)),
            },
            TAG_NULL => Ok(Value::Nil),
            TAG_EMPTY => Ok(Value::String(String::new())),
            TAG_TRUE => Ok(Value::Bool(true)),
            TAG_FALSE => Ok(Value::Bool(false)),
            TAG_UTF8_CHAR => self.read_utf8_char().map(Value::String),
            TAG_STRING => self.read_string_body().map(Value::String),
            TAG_BYTES => self.read_bytes_body(),
            TAG_LIST => {
                let count = self.read_count()?;
                self.nested(|r| r.read_list_body(count, |_| ValueType::Any))
                    .map(Value::List)
            }
            TAG_MAP => {
                let count = self.read_count()?;
                self.nested(|r| r.read_map_body(count))
            }
            TAG_REF => self.read_ref(),
            tag => Err(Error::new(
                ErrorKind::DecodeFailed,
                format!("unexpected tag '{}'", char::from(tag)),
            )),
        }
    }

    /// Reads a value and converts it into a slot of type `ty`.
    ///
    /// # Errors
    ///
    /// Fails on malformed input or when the value does not convert.
    pub fn read_value_as(&mut self, ty: &ValueType) -> Result<Value> {
        let value = self.read_value()?;
        ty.coerce(value)
    }

    /// Reads the `count` elements of a list whose `a` tag and count were
    /// already consumed, converting the `i`-th one into `slot_type(i)`,
    /// followed by the closing brace.
    ///
    /// # Errors
    ///
    /// Fails on malformed input or when an element does not convert.
    pub fn read_slice<F>(&mut self, count: usize, slot_type: F) -> Result<Vec<Value>>
    where
        F: Fn(usize) -> ValueType,
    {
        self.nested(|r| r.read_list_body(count, slot_type))
    }

    /// Reads an untyped list whose `a` tag was already consumed.
    ///
    /// # Errors
    ///
    /// Fails on malformed input.
    pub fn read_slice_without_tag(&mut self) -> Result<Vec<Value>> {
        let count = self.read_count()?;
        self.read_slice(count, |_| ValueType::Any)
    }

    /// Runs `f` one container level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::new(
                ErrorKind::DecodeFailed,
                format!("nesting is deeper than {MAX_DEPTH}"),
            ));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    // Capacity grows with the elements actually decoded, never with the
    // announced count.
    fn read_list_body<F>(&mut self, count: usize, slot_type: F) -> Result<Vec<Value>>
    where
        F: Fn(usize) -> ValueType,
    {
        let index = self.refs.len();
        self.refs.push(Value::Nil);
        let mut values = Vec::new();
        for i in 0..count {
            values.push(self.read_value_as(&slot_type(i))?);
        }
        self.check_tags(&[TAG_CLOSEBRACE])?;
        self.refs[index] = Value::List(values.clone());
        Ok(values)
    }

    fn read_map_body(&mut self, count: usize) -> Result<Value> {
        let index = self.refs.len();
        self.refs.push(Value::Nil);
        let mut entries = Vec::new();
        for _ in 0..count {
            let key = self.read_value()?;
            let value = self.read_value()?;
            entries.push((key, value));
        }
        self.check_tags(&[TAG_CLOSEBRACE])?;
        self.refs[index] = Value::Map(entries.clone());
        Ok(Value::Map(entries))
    }

    fn read_ref(&mut self) -> Result<Value> {
        let index: usize = self.read_int_until(TAG_SEMICOLON)?;
        self.refs.get(index).cloned().ok_or_else(|| {
            Error::new(
                ErrorKind::DecodeFailed,
                format!("invalid reference: {index}"),
            )
        })
    }

    fn read_utf8_char(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let width = utf8_width(rest.first().copied().unwrap_or(0));
        if width == 0 || rest.len() < width {
            return Err(Error::new(ErrorKind::DecodeFailed, "invalid utf-8 char"));
        }
        let s = std::str::from_utf8(&rest[..width])?.to_string();
        self.pos += width;
        Ok(s)
    }

    fn read_string_body(&mut self) -> Result<String> {
        let units: usize = self.read_int_until(TAG_QUOTE)?;
        let rest = &self.buf[self.pos..];
        let mut offset = 0;
        let mut remaining = units;
        while remaining > 0 {
            let width = utf8_width(rest.get(offset).copied().unwrap_or(0));
            if width == 0 || offset + width > rest.len() {
                return Err(Error::new(
                    ErrorKind::DecodeFailed,
                    format!("string shorter than {units} utf-16 units"),
                ));
            }
            // 4-byte sequences are surrogate pairs in utf-16.
            let cost = if width == 4 { 2 } else { 1 };
            remaining = remaining.saturating_sub(cost);
            offset += width;
        }
        let s = std::str::from_utf8(&rest[..offset])?.to_string();
        self.pos += offset;
        self.check_tags(&[TAG_QUOTE])?;
        self.refs.push(Value::String(s.clone()));
        Ok(s)
    }

    fn read_bytes_body(&mut self) -> Result<Value> {
        let len: usize = self.read_int_until(TAG_QUOTE)?;
        if self.remaining() < len {
            return Err(Error::new(
                ErrorKind::DecodeFailed,
                format!("bytes shorter than {len}"),
            ));
        }
        let bytes = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        self.check_tags(&[TAG_QUOTE])?;
        let value = Value::Bytes(bytes);
        self.refs.push(value.clone());
        Ok(value)
    }

    fn read_until(&mut self, delimiter: u8) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let Some(end) = rest.iter().position(|&b| b == delimiter) else {
            return Err(unexpected(0, &[delimiter]));
        };
        let text = std::str::from_utf8(&rest[..end])?.to_string();
        self.pos += end + 1;
        Ok(text)
    }

    /// Reads an integer terminated by `delimiter`. An empty number is zero.
    fn read_int_until<T: std::str::FromStr + Default>(&mut self, delimiter: u8) -> Result<T> {
        let text = self.read_until(delimiter)?;
        if text.is_empty() {
            return Ok(T::default());
        }
        text.parse().map_err(|_| {
            Error::new(ErrorKind::DecodeFailed, format!("invalid number: {text}"))
        })
    }
}

fn utf8_width(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Writer;

    fn reader(s: &str) -> Reader {
        Reader::new(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_read_scalars() {
        let mut r = reader("7i-12;l1099511627776;d1.5;ntfeuxN");
        assert_eq!(r.read_value(), Ok(Value::Int(7)));
        assert_eq!(r.read_value(), Ok(Value::Int(-12)));
        assert_eq!(r.read_value(), Ok(Value::Int(1 << 40)));
        assert_eq!(r.read_value(), Ok(Value::Double(1.5)));
        assert_eq!(r.read_value(), Ok(Value::Nil));
        assert_eq!(r.read_value(), Ok(Value::Bool(true)));
        assert_eq!(r.read_value(), Ok(Value::Bool(false)));
        assert_eq!(r.read_value(), Ok("".into()));
        assert_eq!(r.read_value(), Ok("x".into()));
        assert!(r.read_value().unwrap().as_f64().unwrap().is_nan());
        assert_eq!(r.remaining(), 0);
        assert!(r.read_byte().is_err());
    }

    #[test]
    fn test_read_strings_and_refs() {
        let mut r = reader("s2\"\u{1F600}\"a2{s5\"hello\"r0;}r0;");
        assert_eq!(r.read_string(), Ok("\u{1F600}".to_string()));
        assert_eq!(
            r.read_value(),
            Ok(Value::List(vec!["hello".into(), "\u{1F600}".into()]))
        );
        assert_eq!(r.read_string(), Ok("\u{1F600}".to_string()));

        let mut r = reader("r0;");
        assert_eq!(r.read_value().unwrap_err().msg, "invalid reference: 0");
    }

    #[test]
    fn test_check_tags() {
        let mut r = reader("Cx");
        assert_eq!(r.check_tags(&[TAG_CALL, TAG_END]), Ok(TAG_CALL));
        let err = r.check_tags(&[TAG_CALL, TAG_END]).unwrap_err();
        assert_eq!(err.msg, "unexpected tag 'x', expected one of \"Cz\"");
        let err = r.check_tags(&[TAG_END]).unwrap_err();
        assert_eq!(err.msg, "unexpected end of input, expected one of \"z\"");
    }

    #[test]
    fn test_read_typed_slice() {
        let mut r = reader("a3{s1\"5\"1s3\"abc\"}");
        r.check_tags(&[TAG_LIST]).unwrap();
        let count = r.read_count().unwrap();
        assert_eq!(count, 3);
        let types = [ValueType::Int, ValueType::Double];
        let values = r
            .read_slice(count, |i| types.get(i).cloned().unwrap_or(ValueType::Any))
            .unwrap();
        assert_eq!(
            values,
            vec![Value::Int(5), Value::Double(1.0), "abc".into()]
        );
    }

    #[test]
    fn test_writer_reader_agree_on_refs() {
        let value = Value::List(vec![
            "alpha".into(),
            Value::Map(vec![("beta".into(), "alpha".into())]),
            "beta".into(),
            Value::Bytes(Bytes::from_static(b"\x00\xff")),
        ]);
        let mut writer = Writer::new(false);
        writer.write_value(&value);
        let mut r = Reader::new(writer.into_bytes());
        assert_eq!(r.read_value(), Ok(value));
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| {
            let mut s = "a1{".repeat(depth - 1);
            s.push_str("a{}");
            s.push_str(&"}".repeat(depth - 1));
            s
        };
        let mut r = reader(&nested(MAX_DEPTH));
        assert!(r.read_value().is_ok());
        assert_eq!(r.remaining(), 0);

        let err = reader(&nested(MAX_DEPTH + 1)).read_value().unwrap_err();
        assert_eq!(err.kind, ErrorKind::DecodeFailed);
        assert_eq!(err.msg, format!("nesting is deeper than {MAX_DEPTH}"));

        // Far past the limit fails without exhausting the stack.
        let err = reader(&"a1{".repeat(200_000)).read_value().unwrap_err();
        assert_eq!(err.kind, ErrorKind::DecodeFailed);

        // The limit is on depth, not on the total number of containers.
        let mut r = reader(&"a{}".repeat(MAX_DEPTH * 2));
        for _ in 0..MAX_DEPTH * 2 {
            assert_eq!(r.read_value(), Ok(Value::List(vec![])));
        }
    }

    #[test]
    fn test_announced_count_is_not_trusted() {
        let mut r = reader("a9{1}");
        assert!(r.read_value().is_err());
        let mut r = reader("a1{1}");
        assert_eq!(r.read_value(), Ok(Value::List(vec![Value::Int(1)])));
    }
}
