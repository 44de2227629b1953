//! A minimal streaming JSON writer used to re-serialize an already-tokenized
//! sub-document into minified bytes, without ever building a generic value
//! tree for it. The Rust analogue of `CPLJSonStreamingWriter`.

struct Frame {
    count: usize,
}

pub struct MinifyingJsonWriter {
    out: Vec<u8>,
    stack: Vec<Frame>,
    pending_value_after_key: bool,
}

impl Default for MinifyingJsonWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MinifyingJsonWriter {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            stack: Vec::new(),
            pending_value_after_key: false,
        }
    }

    fn comma_and_count(&mut self) {
        if let Some(frame) = self.stack.last_mut() {
            if frame.count > 0 {
                self.out.push(b',');
            }
            frame.count += 1;
        }
    }

    fn begin_value(&mut self) {
        if self.pending_value_after_key {
            self.pending_value_after_key = false;
        } else {
            self.comma_and_count();
        }
    }

    pub fn start_object(&mut self) {
        self.begin_value();
        self.out.push(b'{');
        self.stack.push(Frame { count: 0 });
    }

    pub fn end_object(&mut self) {
        self.out.push(b'}');
        self.stack.pop();
    }

    pub fn start_array(&mut self) {
        self.begin_value();
        self.out.push(b'[');
        self.stack.push(Frame { count: 0 });
    }

    pub fn end_array(&mut self) {
        self.out.push(b']');
        self.stack.pop();
    }

    pub fn write_key(&mut self, key: &str) {
        self.comma_and_count();
        write_quoted(&mut self.out, key);
        self.out.push(b':');
        self.pending_value_after_key = true;
    }

    pub fn write_string(&mut self, s: &str) {
        self.begin_value();
        write_quoted(&mut self.out, s);
    }

    pub fn write_number_raw(&mut self, raw: &str) {
        self.begin_value();
        self.out.extend_from_slice(raw.as_bytes());
    }

    pub fn write_bool(&mut self, b: bool) {
        self.begin_value();
        self.out
            .extend_from_slice(if b { b"true" } else { b"false" });
    }

    pub fn write_null(&mut self) {
        self.begin_value();
        self.out.extend_from_slice(b"null");
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

fn write_quoted(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minifies_nested_object() {
        let mut w = MinifyingJsonWriter::new();
        w.start_object();
        w.write_key("a");
        w.write_number_raw("1");
        w.write_key("b");
        w.start_array();
        w.write_string("x");
        w.write_bool(true);
        w.write_null();
        w.end_array();
        w.end_object();
        let bytes = w.into_bytes();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":1,"b":["x",true,null]}"#
        );
    }

    #[test]
    fn escapes_control_and_quote_characters() {
        let mut w = MinifyingJsonWriter::new();
        w.write_string("a\"b\nc");
        assert_eq!(
            String::from_utf8(w.into_bytes()).unwrap(),
            r#""a\"b\nc""#
        );
    }
}
