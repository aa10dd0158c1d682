//! Send files: either a plain text file sent in one write, or a JSON script
//! listing payload items and a replay interval.
//!
//! ```json
//! {
//!     "cycle_ms": 500,
//!     "hexmode": 1,
//!     "datas": [
//!         { "select": 1, "data": "aa 55 01" },
//!         { "select": 0, "data": "aa 55 02" }
//!     ]
//! }
//! ```

use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::codec::{self, TextEncoding, Unencodable};
use crate::error::{FileIoError, ScriptError};

/// Literal data of one script item.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Hex-mode item, already converted to bytes at load time.
    Bytes(Vec<u8>),
    /// Text item, encoded when sent.
    Text(String),
}

impl Payload {
    pub fn is_hex(&self) -> bool {
        matches!(self, Payload::Bytes(_))
    }

    /// Bytes to put on the wire. Unencodable characters are dropped.
    pub fn to_bytes(&self, encoding: TextEncoding) -> Cow<'_, [u8]> {
        match self {
            Payload::Bytes(bytes) => Cow::Borrowed(bytes.as_slice()),
            Payload::Text(text) => {
                Cow::Owned(codec::encode_text_with(text, encoding, Unencodable::Ignore))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScriptItem {
    pub selected: bool,
    pub payload: Payload,
    pub sent: bool,
}

impl ScriptItem {
    pub fn new(selected: bool, payload: Payload) -> Self {
        Self {
            selected,
            payload,
            sent: false,
        }
    }
}

/// An ordered list of items plus the replay interval.
#[derive(Clone, Debug, PartialEq)]
pub struct SendScript {
    /// Milliseconds between two items; 0 sends every selected item at once.
    pub cycle_ms: u64,
    pub items: Vec<ScriptItem>,
}

impl SendScript {
    pub fn new(cycle_ms: u64, items: Vec<ScriptItem>) -> Self {
        Self { cycle_ms, items }
    }

    pub fn is_burst(&self) -> bool {
        self.cycle_ms == 0
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }

    pub fn selected_count(&self) -> usize {
        self.items.iter().filter(|item| item.selected).count()
    }

    /// Index of the first selected item not yet sent.
    pub fn next_unsent(&self) -> Option<usize> {
        self.items.iter().position(|item| item.selected && !item.sent)
    }

    pub fn is_finished(&self) -> bool {
        self.next_unsent().is_none()
    }

    pub fn reset_sent(&mut self) {
        for item in &mut self.items {
            item.sent = false;
        }
    }
}

/// What a send file turned out to contain.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptSource {
    Plain(String),
    Script(SendScript),
}

#[derive(Deserialize)]
struct ScriptFile {
    cycle_ms: u64,
    #[serde(deserialize_with = "flag")]
    hexmode: bool,
    datas: Vec<ScriptEntry>,
}

#[derive(Deserialize)]
struct ScriptEntry {
    #[serde(deserialize_with = "flag")]
    select: bool,
    data: String,
}

/// Accepts `0`/`1` as well as `false`/`true`.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(u64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(n) => Err(D::Error::custom(format!("flag must be 0 or 1, got {}", n))),
    }
}

fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

/// Best-effort guess of a file's character encoding from its content.
pub fn predict_encoding(path: &Path) -> Result<&'static Encoding, FileIoError> {
    let bytes = fs::read(path).map_err(|source| FileIoError::PredictEncoding {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(detect_encoding(&bytes))
}

fn is_structured(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"))
}

/// Loads a send file. `.json` files are parsed as scripts, anything else is
/// returned verbatim.
pub fn load(path: &Path) -> Result<ScriptSource, ScriptError> {
    if !path.is_file() {
        return Err(ScriptError::NotFound(path.to_path_buf()));
    }

    let unreadable = |reason: String| ScriptError::Unreadable {
        path: path.to_path_buf(),
        reason,
    };
    let bytes = fs::read(path).map_err(|e| unreadable(e.to_string()))?;
    let encoding = detect_encoding(&bytes);
    let (text, _, had_errors) = encoding.decode(&bytes);
    if had_errors {
        return Err(unreadable(format!("content is not valid {}", encoding.name())));
    }
    log::info!("Send file {} detected as {}", path.display(), encoding.name());

    if is_structured(path) {
        parse_script(&text).map(ScriptSource::Script)
    } else {
        Ok(ScriptSource::Plain(text.into_owned()))
    }
}

/// Parses the JSON script format. A hex-mode script with any invalid item
/// is rejected as a whole.
pub fn parse_script(text: &str) -> Result<SendScript, ScriptError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ScriptError::Malformed(e.to_string()))?;
    let empty = match &value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(list) => list.is_empty(),
        _ => false,
    };
    if empty {
        return Err(ScriptError::Empty);
    }

    let file: ScriptFile =
        serde_json::from_value(value).map_err(|e| ScriptError::Malformed(e.to_string()))?;

    let mut items = Vec::with_capacity(file.datas.len());
    for (index, entry) in file.datas.into_iter().enumerate() {
        let payload = if file.hexmode {
            let bytes = codec::from_hex_display(&entry.data)
                .map_err(|_| ScriptError::InvalidHexItem { index })?;
            Payload::Bytes(bytes)
        } else {
            Payload::Text(entry.data)
        };
        items.push(ScriptItem::new(entry.select, payload));
    }
    Ok(SendScript::new(file.cycle_ms, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_with(suffix: &str, content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[test]
    fn parse_text_script() {
        let script = parse_script(
            r#"{"cycle_ms": 0, "hexmode": 0, "datas": [
                {"select": 1, "data": "AT\r\n"},
                {"select": 0, "data": "skip"}
            ]}"#,
        )
        .unwrap();
        assert!(script.is_burst());
        assert_eq!(script.items.len(), 2);
        assert_eq!(script.items[0].payload, Payload::Text("AT\r\n".into()));
        assert!(script.items[0].selected);
        assert!(!script.items[1].selected);
        assert_eq!(script.selected_count(), 1);
    }

    #[test]
    fn parse_hex_script_resolves_bytes() {
        let script = parse_script(
            r#"{"cycle_ms": 500, "hexmode": 1, "datas": [{"select": true, "data": "AA 55 0d0A"}]}"#,
        )
        .unwrap();
        assert_eq!(script.interval(), Duration::from_millis(500));
        assert_eq!(script.items[0].payload, Payload::Bytes(vec![0xAA, 0x55, 0x0D, 0x0A]));
        assert!(script.items[0].payload.is_hex());
    }

    #[test]
    fn invalid_hex_item_rejects_whole_script() {
        let err = parse_script(
            r#"{"cycle_ms": 0, "hexmode": 1, "datas": [
                {"select": 1, "data": "01 02"},
                {"select": 1, "data": "zz"}
            ]}"#,
        )
        .unwrap_err();
        assert_eq!(err, ScriptError::InvalidHexItem { index: 1 });
    }

    #[test]
    fn empty_and_malformed_scripts() {
        assert_eq!(parse_script("{}").unwrap_err(), ScriptError::Empty);
        assert!(matches!(parse_script("{not json"), Err(ScriptError::Malformed(_))));
        assert!(matches!(
            parse_script(r#"{"cycle_ms": 10, "datas": []}"#),
            Err(ScriptError::Malformed(_))
        ));
        assert!(matches!(
            parse_script(r#"{"cycle_ms": 10, "hexmode": 2, "datas": []}"#),
            Err(ScriptError::Malformed(_))
        ));
        assert!(matches!(
            parse_script(r#"{"cycle_ms": -1, "hexmode": 0, "datas": []}"#),
            Err(ScriptError::Malformed(_))
        ));
    }

    #[test]
    fn progression_helpers() {
        let mut script = SendScript::new(
            100,
            vec![
                ScriptItem::new(false, Payload::Text("a".into())),
                ScriptItem::new(true, Payload::Text("b".into())),
                ScriptItem::new(true, Payload::Text("c".into())),
            ],
        );
        assert_eq!(script.next_unsent(), Some(1));
        script.items[1].sent = true;
        assert_eq!(script.next_unsent(), Some(2));
        script.items[2].sent = true;
        assert!(script.is_finished());
        script.reset_sent();
        assert_eq!(script.next_unsent(), Some(1));
    }

    #[test]
    fn text_payload_drops_unencodable_characters() {
        let payload = Payload::Text("a中b".into());
        assert_eq!(payload.to_bytes(TextEncoding::Ascii).into_owned(), b"ab".to_vec());
    }

    #[test]
    fn load_json_file() {
        let file = file_with(
            ".json",
            br#"{"cycle_ms": 0, "hexmode": 0, "datas": [{"select": 1, "data": "hi"}]}"#,
        );
        match load(file.path()).unwrap() {
            ScriptSource::Script(script) => assert_eq!(script.items[0].payload, Payload::Text("hi".into())),
            other => panic!("expected a script, got {:?}", other),
        }
    }

    #[test]
    fn load_plain_file_returns_contents_verbatim() {
        let file = file_with(".txt", b"line one\r\nline two\r\n");
        assert_eq!(
            load(file.path()).unwrap(),
            ScriptSource::Plain("line one\r\nline two\r\n".into())
        );
    }

    #[test]
    fn load_detects_utf8_with_bom() {
        let mut content = vec![0xEF, 0xBB, 0xBF];
        content.extend_from_slice("串口调试".as_bytes());
        let file = file_with(".txt", &content);
        assert_eq!(load(file.path()).unwrap(), ScriptSource::Plain("串口调试".into()));
    }

    #[test]
    fn load_detects_gbk_content() {
        let text = "串口调试助手可以发送和接收数据，支持十六进制显示和循环发送功能。这是一个用于测试编码检测的中文句子。";
        let file = file_with(".txt", &codec::encode_text(text, TextEncoding::Gbk));
        assert_eq!(load(file.path()).unwrap(), ScriptSource::Plain(text.into()));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert_eq!(load(&path).unwrap_err(), ScriptError::NotFound(path.clone()));
        assert!(matches!(
            predict_encoding(&path),
            Err(FileIoError::PredictEncoding { .. })
        ));
    }

    #[test]
    fn predict_encoding_of_ascii_file() {
        let file = file_with(".txt", b"plain ascii");
        let encoding = predict_encoding(file.path()).unwrap();
        let (text, _, _) = encoding.decode(b"plain ascii");
        assert_eq!(text, "plain ascii");
    }
}
