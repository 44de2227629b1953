//! Turns a JSON reference manifest (v0 or v1) into a `RefFile`, via either
//! a bounded-memory streaming parser or a buffered `serde_json::Value` walk.

use std::io::Read;

use crate::entry::{inline_from_str, referenced_from_parts, Entry, RefArrayElem, RefFile};
use crate::error::{KerchunkError, Result};
use crate::json::{Lexer, MinifyingJsonWriter, Tok};

/// Peeks at the first chunk of a manifest and guesses whether it is likely
/// to parse cleanly under the streaming parser: a plain JSON object whose
/// first key is either a recognizable v0 Zarr metadata key, or `"version"`
/// followed somewhere in the probe window by a `refs`/`.zgroup`/`.zarray`
/// marker. This is a heuristic, not a validator — a `false` here just means
/// "fall back to buffering", never "this manifest is invalid".
pub fn is_likely_streamable(probe: &[u8]) -> bool {
    let s = String::from_utf8_lossy(probe);
    let trimmed = s.trim_start();
    if !trimmed.starts_with('{') {
        return false;
    }
    let after_brace = trimmed[1..].trim_start();
    if !after_brace.starts_with('"') {
        return false;
    }
    let rest = &after_brace[1..];
    let Some(end) = rest.find('"') else {
        return false;
    };
    match &rest[..end] {
        "version" => s.contains("\"refs\"") || s.contains(".zgroup") || s.contains(".zarray"),
        ".zgroup" | ".zattrs" | ".zarray" => true,
        _ => false,
    }
}

/// Parses the whole document into a `serde_json::Value` first. Used when
/// the streaming parser is disabled or the fast-path probe is negative.
pub fn parse_buffered_bytes(bytes: &[u8]) -> Result<RefFile> {
    let root: serde_json::Value = serde_json::from_slice(bytes)?;
    let obj = root
        .as_object()
        .ok_or_else(|| KerchunkError::BadManifest("manifest is not a JSON object".to_string()))?;
    if obj.is_empty() {
        return Err(KerchunkError::BadManifest(
            "manifest has no entries".to_string(),
        ));
    }

    let mut rf = RefFile::new();
    if let Some(version_val) = obj.get("version") {
        let version_num = version_val.as_i64().ok_or_else(|| {
            KerchunkError::BadManifest("version must be an integer".to_string())
        })?;
        if version_num != 1 {
            return Err(KerchunkError::UnsupportedFeature(format!(
                "unsupported manifest version {version_num}"
            )));
        }
        if obj.contains_key("templates") || obj.contains_key("gen") {
            return Err(KerchunkError::UnsupportedFeature(
                "templated references are not supported".to_string(),
            ));
        }
        let refs = obj
            .get("refs")
            .and_then(|v| v.as_object())
            .ok_or_else(|| {
                KerchunkError::BadManifest("v1 manifest missing refs object".to_string())
            })?;
        for (key, value) in refs {
            apply_entry_value(&mut rf, key, value)?;
        }
    } else {
        for (key, value) in obj {
            apply_entry_value(&mut rf, key, value)?;
        }
        if !rf.contains_key(".zgroup") {
            return Err(KerchunkError::BadManifest(
                "v0 manifest missing required .zgroup key".to_string(),
            ));
        }
    }
    Ok(rf)
}

fn apply_entry_value(rf: &mut RefFile, key: &str, value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::String(s) => {
            rf.insert(key.to_string(), Entry::Inline(inline_from_str(key, s)?));
        }
        serde_json::Value::Object(_) => {
            rf.insert(key.to_string(), Entry::Inline(serde_json::to_vec(value)?));
        }
        serde_json::Value::Array(arr) => {
            let elems = arr
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => Ok(RefArrayElem::Str(s.clone())),
                    serde_json::Value::Number(n) => Ok(RefArrayElem::Num(n.to_string())),
                    _ => Err(KerchunkError::BadRefArray {
                        key: key.to_string(),
                        reason: "array element must be a string or number".to_string(),
                    }),
                })
                .collect::<Result<Vec<_>>>()?;
            let (uri, range) = referenced_from_parts(key, &elems)?;
            let uri_idx = rf.intern_uri(&uri);
            rf.insert(key.to_string(), Entry::Referenced { uri: uri_idx, range });
        }
        other => {
            return Err(KerchunkError::BadManifest(format!(
                "key {key}: unsupported value type {other:?}"
            )))
        }
    }
    Ok(())
}

/// Parses a manifest incrementally, never holding more than one entry's
/// worth of sub-document in memory at a time.
pub fn parse_streaming<R: Read>(reader: R) -> Result<RefFile> {
    StreamingRefsParser {
        lexer: Lexer::new(reader),
    }
    .parse()
}

struct StreamingRefsParser<R: Read> {
    lexer: Lexer<R>,
}

impl<R: Read> StreamingRefsParser<R> {
    fn parse(mut self) -> Result<RefFile> {
        let mut rf = RefFile::new();
        let first = self.lexer.next_token()?;
        if first != Tok::LBrace {
            return Err(KerchunkError::BadManifest(
                "manifest is not a JSON object".to_string(),
            ));
        }
        let tok = self.lexer.next_token()?;
        if tok == Tok::RBrace {
            return Err(KerchunkError::BadManifest(
                "manifest has no entries".to_string(),
            ));
        }
        let key = expect_key(tok)?;
        if key == "version" {
            self.parse_v1(&mut rf)?;
        } else {
            self.parse_v0(&mut rf, key)?;
        }
        Ok(rf)
    }

    fn expect(&mut self, expected: Tok) -> Result<()> {
        let tok = self.lexer.next_token()?;
        if tok != expected {
            return Err(KerchunkError::BadManifest(format!(
                "expected {expected:?}, found {tok:?}"
            )));
        }
        Ok(())
    }

    fn parse_v1(&mut self, rf: &mut RefFile) -> Result<()> {
        self.expect(Tok::Colon)?;
        let version_num = match self.lexer.next_token()? {
            Tok::Num(n) => n,
            other => {
                return Err(KerchunkError::BadManifest(format!(
                    "version must be a number, found {other:?}"
                )))
            }
        };
        if version_num.trim() != "1" {
            return Err(KerchunkError::UnsupportedFeature(format!(
                "unsupported manifest version {version_num}"
            )));
        }

        let mut seen_refs = false;
        loop {
            match self.lexer.next_token()? {
                Tok::RBrace => break,
                Tok::Comma => {
                    let key = expect_key(self.lexer.next_token()?)?;
                    self.expect(Tok::Colon)?;
                    match key.as_str() {
                        "templates" | "gen" => {
                            return Err(KerchunkError::UnsupportedFeature(
                                "templated references are not supported".to_string(),
                            ))
                        }
                        "refs" => {
                            let val_tok = self.lexer.next_token()?;
                            if val_tok != Tok::LBrace {
                                return Err(KerchunkError::BadManifest(
                                    "refs must be an object".to_string(),
                                ));
                            }
                            self.parse_refs_object(rf)?;
                            seen_refs = true;
                        }
                        _ => {
                            // Legacy/unrecognized top-level key (e.g. a
                            // carried-over `.zgroup`): consumed and ignored.
                            let val_tok = self.lexer.next_token()?;
                            skip_value(&mut self.lexer, val_tok)?;
                        }
                    }
                }
                other => {
                    return Err(KerchunkError::BadManifest(format!(
                        "expected `,` or `}}`, found {other:?}"
                    )))
                }
            }
        }

        if !seen_refs {
            return Err(KerchunkError::BadManifest(
                "v1 manifest missing refs object".to_string(),
            ));
        }
        Ok(())
    }

    fn parse_refs_object(&mut self, rf: &mut RefFile) -> Result<()> {
        let mut first = true;
        loop {
            let tok = self.lexer.next_token()?;
            if tok == Tok::RBrace {
                break;
            }
            if !first && tok != Tok::Comma {
                return Err(KerchunkError::BadManifest(format!(
                    "expected `,` or `}}`, found {tok:?}"
                )));
            }
            let key_tok = if first { tok } else { self.lexer.next_token()? };
            first = false;
            let key = expect_key(key_tok)?;
            self.expect(Tok::Colon)?;
            let val_tok = self.lexer.next_token()?;
            self.parse_entry_value(rf, &key, val_tok)?;
        }
        Ok(())
    }

    fn parse_v0(&mut self, rf: &mut RefFile, first_key: String) -> Result<()> {
        self.expect(Tok::Colon)?;
        let val_tok = self.lexer.next_token()?;
        self.parse_entry_value(rf, &first_key, val_tok)?;

        loop {
            match self.lexer.next_token()? {
                Tok::RBrace => break,
                Tok::Comma => {
                    let key = expect_key(self.lexer.next_token()?)?;
                    self.expect(Tok::Colon)?;
                    let val_tok = self.lexer.next_token()?;
                    self.parse_entry_value(rf, &key, val_tok)?;
                }
                other => {
                    return Err(KerchunkError::BadManifest(format!(
                        "expected `,` or `}}`, found {other:?}"
                    )))
                }
            }
        }

        if !rf.contains_key(".zgroup") {
            return Err(KerchunkError::BadManifest(
                "v0 manifest missing required .zgroup key".to_string(),
            ));
        }
        Ok(())
    }

    fn parse_entry_value(&mut self, rf: &mut RefFile, key: &str, tok: Tok) -> Result<()> {
        match tok {
            Tok::Str(s) => {
                rf.insert(key.to_string(), Entry::Inline(inline_from_str(key, &s)?));
            }
            Tok::LBrace => {
                let mut w = MinifyingJsonWriter::new();
                echo_object(&mut self.lexer, &mut w)?;
                rf.insert(key.to_string(), Entry::Inline(w.into_bytes()));
            }
            Tok::LBracket => {
                let elems = parse_ref_array_elems(&mut self.lexer, key)?;
                let (uri, range) = referenced_from_parts(key, &elems)?;
                let uri_idx = rf.intern_uri(&uri);
                rf.insert(key.to_string(), Entry::Referenced { uri: uri_idx, range });
            }
            other => {
                return Err(KerchunkError::BadManifest(format!(
                    "key {key}: unsupported value type {other:?}"
                )))
            }
        }
        Ok(())
    }
}

fn expect_key(tok: Tok) -> Result<String> {
    match tok {
        Tok::Str(s) => Ok(s),
        other => Err(KerchunkError::BadManifest(format!(
            "expected an object key, found {other:?}"
        ))),
    }
}

fn parse_ref_array_elems<R: Read>(lexer: &mut Lexer<R>, key: &str) -> Result<Vec<RefArrayElem>> {
    // Opening `[` already consumed by the caller.
    let mut elems = Vec::new();
    let mut first = true;
    loop {
        let tok = lexer.next_token()?;
        if tok == Tok::RBracket {
            break;
        }
        if !first {
            if tok != Tok::Comma {
                return Err(KerchunkError::BadRefArray {
                    key: key.to_string(),
                    reason: format!("expected `,` or `]`, found {tok:?}"),
                });
            }
        }
        let elem_tok = if first { tok } else { lexer.next_token()? };
        first = false;
        match elem_tok {
            Tok::Str(s) => elems.push(RefArrayElem::Str(s)),
            Tok::Num(n) => elems.push(RefArrayElem::Num(n)),
            other => {
                return Err(KerchunkError::BadRefArray {
                    key: key.to_string(),
                    reason: format!("array element must be a string or number, found {other:?}"),
                })
            }
        }
    }
    Ok(elems)
}

/// Consumes and discards one JSON value's tokens.
fn skip_value<R: Read>(lexer: &mut Lexer<R>, tok: Tok) -> Result<()> {
    let mut throwaway = MinifyingJsonWriter::new();
    echo_value(lexer, tok, &mut throwaway)
}

fn echo_value<R: Read>(lexer: &mut Lexer<R>, tok: Tok, w: &mut MinifyingJsonWriter) -> Result<()> {
    match tok {
        Tok::Str(s) => w.write_string(&s),
        Tok::Num(n) => w.write_number_raw(&n),
        Tok::True => w.write_bool(true),
        Tok::False => w.write_bool(false),
        Tok::Null => w.write_null(),
        Tok::LBrace => echo_object(lexer, w)?,
        Tok::LBracket => echo_array(lexer, w)?,
        other => {
            return Err(KerchunkError::BadManifest(format!(
                "unexpected token {other:?} in value position"
            )))
        }
    }
    Ok(())
}

fn echo_object<R: Read>(lexer: &mut Lexer<R>, w: &mut MinifyingJsonWriter) -> Result<()> {
    w.start_object();
    let mut first = true;
    loop {
        let tok = lexer.next_token()?;
        if tok == Tok::RBrace {
            break;
        }
        if !first && tok != Tok::Comma {
            return Err(KerchunkError::BadManifest(format!(
                "expected `,` or `}}` in object, found {tok:?}"
            )));
        }
        let key_tok = if first { tok } else { lexer.next_token()? };
        first = false;
        let key = expect_key(key_tok)?;
        w.write_key(&key);
        let colon = lexer.next_token()?;
        if colon != Tok::Colon {
            return Err(KerchunkError::BadManifest(format!(
                "expected `:`, found {colon:?}"
            )));
        }
        let val_tok = lexer.next_token()?;
        echo_value(lexer, val_tok, w)?;
    }
    w.end_object();
    Ok(())
}

fn echo_array<R: Read>(lexer: &mut Lexer<R>, w: &mut MinifyingJsonWriter) -> Result<()> {
    w.start_array();
    let mut first = true;
    loop {
        let tok = lexer.next_token()?;
        if tok == Tok::RBracket {
            break;
        }
        if !first && tok != Tok::Comma {
            return Err(KerchunkError::BadManifest(format!(
                "expected `,` or `]` in array, found {tok:?}"
            )));
        }
        let val_tok = if first { tok } else { lexer.next_token()? };
        first = false;
        echo_value(lexer, val_tok, w)?;
    }
    w.end_array();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const V0_DOC: &str = r#"{
        ".zgroup": "{\"zarr_format\":2}",
        ".zattrs": "{\"foo\":1}",
        "data/0.0": ["s3://bucket/blob.nc", 100, 42],
        "data/0.1": ["s3://bucket/whole.bin"],
        "data/0.2": "base64:aGVsbG8="
    }"#;

    const V1_DOC: &str = r#"{
        "version": 1,
        "refs": {
            ".zgroup": "{\"zarr_format\":2}",
            "data/0.0": ["s3://bucket/blob.nc", 100, 42]
        }
    }"#;

    #[test]
    fn probe_detects_v0_and_v1() {
        assert!(is_likely_streamable(br#"{".zgroup": "x"}"#));
        assert!(is_likely_streamable(
            br#"{"version": 1, "refs": {".zgroup": "x"}}"#
        ));
        assert!(!is_likely_streamable(br#"{"unexpected": 1}"#));
        assert!(!is_likely_streamable(b"not json at all"));
    }

    #[test]
    fn buffered_and_streaming_agree_on_v0() {
        let buffered = parse_buffered_bytes(V0_DOC.as_bytes()).unwrap();
        let streamed = parse_streaming(V0_DOC.as_bytes()).unwrap();
        assert_eq!(buffered.len(), streamed.len());
        assert!(buffered.contains_key("data/0.0"));
        assert!(streamed.contains_key("data/0.0"));
        match streamed.get("data/0.1").unwrap() {
            Entry::Referenced { range, .. } => assert_eq!(*range, None),
            other => panic!("expected referenced entry, got {other:?}"),
        }
        match streamed.get("data/0.2").unwrap() {
            Entry::Inline(bytes) => assert_eq!(bytes, b"hello"),
            other => panic!("expected inline entry, got {other:?}"),
        }
    }

    #[test]
    fn buffered_and_streaming_agree_on_v1() {
        let buffered = parse_buffered_bytes(V1_DOC.as_bytes()).unwrap();
        let streamed = parse_streaming(V1_DOC.as_bytes()).unwrap();
        assert_eq!(buffered.len(), streamed.len());
        assert!(streamed.contains_key("data/0.0"));
    }

    #[test]
    fn v0_without_zgroup_is_rejected() {
        let doc = r#"{"data/0.0": "x"}"#;
        assert!(parse_buffered_bytes(doc.as_bytes()).is_err());
        assert!(parse_streaming(doc.as_bytes()).is_err());
    }

    #[test]
    fn v1_rejects_templated_references() {
        let doc = r#"{"version": 1, "templates": {"a": "b"}, "refs": {".zgroup": "x"}}"#;
        assert!(parse_buffered_bytes(doc.as_bytes()).is_err());
        assert!(parse_streaming(doc.as_bytes()).is_err());
    }

    #[test]
    fn v1_rejects_unsupported_version_number() {
        let doc = r#"{"version": 2, "refs": {}}"#;
        assert!(matches!(
            parse_buffered_bytes(doc.as_bytes()),
            Err(KerchunkError::UnsupportedFeature(_))
        ));
        assert!(matches!(
            parse_streaming(doc.as_bytes()),
            Err(KerchunkError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn bad_ref_array_arity_is_rejected() {
        let doc = r#"{".zgroup": "x", "data/0.0": ["s3://b/f.bin", 1]}"#;
        assert!(matches!(
            parse_streaming(doc.as_bytes()),
            Err(KerchunkError::BadRefArray { .. })
        ));
    }

    #[test]
    fn nested_inline_object_is_minified() {
        let doc = r#"{".zgroup": {"zarr_format": 2, "nested": {"a": [1, 2, true]}}}"#;
        let streamed = parse_streaming(doc.as_bytes()).unwrap();
        match streamed.get(".zgroup").unwrap() {
            Entry::Inline(bytes) => {
                assert_eq!(
                    String::from_utf8(bytes.clone()).unwrap(),
                    r#"{"zarr_format":2,"nested":{"a":[1,2,true]}}"#
                );
            }
            other => panic!("expected inline entry, got {other:?}"),
        }
    }
}
