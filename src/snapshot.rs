// =============================================================================
// snapshot.rs - THE PHOTO FINISH
// =============================================================================
//
// Writes a snapshot only when its bytes would change. The static site
// rebuilds on every commit of these files, so rewriting an identical file
// costs a deploy for nothing.
//
// The diff is a SHA-256 of the freshly serialized bytes against a SHA-256 of
// whatever is on disk (empty when missing). Same hash, no write, mtime left
// alone.
//
// That only works if `updated_at` holds still when nothing else moved, so
// before hashing we carry the previous stamp forward whenever the bodies
// match. `updated_at` therefore means "last changed", not "last checked".
// =============================================================================

use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::Snapshot;

/// How a snapshot is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationStyle {
    /// Keys sorted at every depth, no whitespace, raw UTF-8. Results and
    /// racecards.
    SortedCompact,
    /// Struct declaration order, 2-space indent, ASCII only (anything
    /// outside printable ASCII becomes a `\uXXXX` escape). The CSV feed.
    InsertionPretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub changed: bool,
    pub path: PathBuf,
    /// Hex SHA-256 of the bytes now on disk.
    pub hash: String,
    pub bytes: usize,
}

pub struct SnapshotWriter {
    style: SerializationStyle,
}

impl SnapshotWriter {
    pub fn new(style: SerializationStyle) -> Self {
        Self { style }
    }

    /// Render `payload` in this writer's style.
    pub fn serialize<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>> {
        let bytes = match self.style {
            // serde_json's Map is ordered by key, so going through Value
            // sorts every nested object.
            SerializationStyle::SortedCompact => serde_json::to_vec(&serde_json::to_value(payload)?)?,
            SerializationStyle::InsertionPretty => {
                let mut out = Vec::new();
                let mut ser = serde_json::Serializer::with_formatter(&mut out, AsciiPretty::new());
                payload.serialize(&mut ser)?;
                out
            }
        };
        Ok(bytes)
    }

    /// Write `snapshot` to `path` unless the file already holds exactly the
    /// bytes it would serialize to. The prior file is read once, for both the
    /// timestamp carry-forward and the hash comparison.
    pub async fn write_if_changed<T: Serialize>(&self, snapshot: &mut Snapshot<T>, path: &Path) -> Result<WriteResult> {
        let prior = read_prior(path).await?;
        carry_forward_timestamp(snapshot, &prior)?;
        self.write_against(&*snapshot, path, &prior).await
    }

    async fn write_against<T: Serialize>(&self, payload: &T, path: &Path, prior: &[u8]) -> Result<WriteResult> {
        let new_bytes = self.serialize(payload)?;
        let new_hash = content_hash(&new_bytes);
        let old_hash = content_hash(prior);

        if new_hash == old_hash {
            info!(path = %path.display(), hash = new_hash.as_str(), "No change, leaving snapshot alone");
            return Ok(WriteResult {
                changed: false,
                path: path.to_path_buf(),
                hash: new_hash,
                bytes: new_bytes.len(),
            });
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &new_bytes).await?;

        info!(
            path = %path.display(),
            bytes = new_bytes.len(),
            old_hash = old_hash.as_str(),
            new_hash = new_hash.as_str(),
            "Snapshot written"
        );
        Ok(WriteResult {
            changed: true,
            path: path.to_path_buf(),
            hash: new_hash,
            bytes: new_bytes.len(),
        })
    }
}

/// `PrettyFormatter` that keeps string output to printable ASCII. Non-ASCII
/// chars (and DEL) are written as lowercase `\uXXXX`, with surrogate pairs
/// above the BMP.
struct AsciiPretty(PrettyFormatter<'static>);

impl AsciiPretty {
    fn new() -> Self {
        Self(PrettyFormatter::new())
    }
}

impl Formatter for AsciiPretty {
    fn begin_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_array(writer)
    }

    fn end_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.0.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_object(writer)
    }

    fn end_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.0.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_object_value(writer)
    }

    fn write_string_fragment<W: ?Sized + Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if ch.is_ascii() && ch != '\u{7f}' {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Adopt the previous file's `updated_at` when nothing else has changed.
///
/// `prior` is the raw bytes of the file on disk. Empty, unparseable or
/// stamp-less prior content leaves the fresh stamp in place.
pub fn carry_forward_timestamp<T: Serialize>(snapshot: &mut Snapshot<T>, prior: &[u8]) -> Result<()> {
    if prior.is_empty() {
        return Ok(());
    }
    let Ok(Value::Object(mut old)) = serde_json::from_slice::<Value>(prior) else {
        debug!("Prior snapshot is not a JSON object, keeping fresh timestamp");
        return Ok(());
    };
    let Some(Value::String(old_stamp)) = old.remove("updated_at") else {
        return Ok(());
    };

    let mut new = match serde_json::to_value(&*snapshot)? {
        Value::Object(map) => map,
        _ => return Ok(()),
    };
    new.remove("updated_at");

    if old == new {
        debug!(updated_at = old_stamp.as_str(), "Body unchanged, carrying timestamp forward");
        snapshot.updated_at = old_stamp;
    }
    Ok(())
}

async fn read_prior(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CsvBody, CsvRace, ResultsBody};
    use serde_json::json;
    use tempfile::TempDir;

    fn results(updated_at: &str) -> Snapshot<ResultsBody> {
        Snapshot {
            updated_at: updated_at.to_string(),
            body: ResultsBody { races: vec![] },
        }
    }

    #[tokio::test]
    async fn test_second_write_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");
        let writer = SnapshotWriter::new(SerializationStyle::SortedCompact);

        let first = writer
            .write_if_changed(&mut results("2025-10-27T09:00:00Z"), &path)
            .await
            .unwrap();
        assert!(first.changed);
        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
        let bytes = std::fs::read(&path).unwrap();

        // A later run with a fresh stamp and the same body.
        let mut again = results("2025-10-27T12:00:00Z");
        let second = writer.write_if_changed(&mut again, &path).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.hash, first.hash);
        assert_eq!(again.updated_at, "2025-10-27T09:00:00Z");
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), mtime);
    }

    #[tokio::test]
    async fn test_changed_body_gets_fresh_stamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, r#"{"races":[{"course":"Ascot"}],"updated_at":"2025-10-27T09:00:00Z"}"#).unwrap();
        let writer = SnapshotWriter::new(SerializationStyle::SortedCompact);

        let result = writer
            .write_if_changed(&mut results("2025-10-27T12:00:00Z"), &path)
            .await
            .unwrap();
        assert!(result.changed);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"{"races":[],"updated_at":"2025-10-27T12:00:00Z"}"#
        );
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("nested").join("results.json");
        let writer = SnapshotWriter::new(SerializationStyle::InsertionPretty);
        let result = writer
            .write_if_changed(&mut results("2025-10-27T09:00:00Z"), &path)
            .await
            .unwrap();
        assert!(result.changed);
        assert_eq!(result.bytes, std::fs::read(&path).unwrap().len());
    }

    #[test]
    fn test_sorted_compact_sorts_nested_keys() {
        let writer = SnapshotWriter::new(SerializationStyle::SortedCompact);
        let bytes = writer
            .serialize(&json!({"b": {"z": 1, "a": "Düsseldorf"}, "a": []}))
            .unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":[],"b":{"a":"Düsseldorf","z":1}}"#
        );
    }

    #[test]
    fn test_insertion_pretty_keeps_declaration_order() {
        let writer = SnapshotWriter::new(SerializationStyle::InsertionPretty);
        let snap = Snapshot {
            updated_at: "2025-10-27T00:00:00Z".to_string(),
            body: CsvBody {
                races: vec![CsvRace {
                    meeting_date: "2025-10-27".into(),
                    course: "Newbury".into(),
                    off_time: "14:10".into(),
                    race_number: "3".into(),
                    race_title: "Handicap".into(),
                    horse: "Sample Runner".into(),
                    position: "1st".into(),
                    sp: "4/1".into(),
                    note: String::new(),
                    handicap: true,
                    replay_links: vec![],
                }],
            },
        };
        let text = String::from_utf8(writer.serialize(&snap).unwrap()).unwrap();
        let updated = text.find("\"updated_at\"").unwrap();
        let meeting = text.find("\"meeting_date\"").unwrap();
        let course = text.find("\"course\"").unwrap();
        let links = text.find("\"replay_links\"").unwrap();
        assert!(updated < meeting && meeting < course && course < links);
        assert!(text.contains("\n  \"races\": ["));
    }

    #[test]
    fn test_insertion_pretty_escapes_non_ascii() {
        let writer = SnapshotWriter::new(SerializationStyle::InsertionPretty);
        let bytes = writer
            .serialize(&CsvBody {
                races: vec![CsvRace {
                    meeting_date: "2025-10-27".into(),
                    course: "Düsseldorf".into(),
                    off_time: "14:10".into(),
                    race_number: "1".into(),
                    race_title: "Preis 🏇 \u{7f}".into(),
                    horse: "Plain \"Quoted\"".into(),
                    position: String::new(),
                    sp: String::new(),
                    note: "tab\there".into(),
                    handicap: false,
                    replay_links: vec![],
                }],
            })
            .unwrap();
        assert!(bytes.is_ascii());

        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(r#""course": "D\u00fcsseldorf","#), "{text}");
        assert!(text.contains(r#""race_title": "Preis \ud83c\udfc7 \u007f","#), "{text}");
        assert!(text.contains(r#""horse": "Plain \"Quoted\"","#), "{text}");
        assert!(text.contains(r#""note": "tab\there","#), "{text}");
        assert!(text.contains(r#""replay_links": []"#), "{text}");

        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back["races"][0]["course"], "Düsseldorf");
    }

    #[test]
    fn test_content_hash_of_empty_input() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_carry_forward_only_when_body_matches() {
        let mut same = results("2025-10-27T12:00:00Z");
        carry_forward_timestamp(&mut same, br#"{"races":[],"updated_at":"2025-10-27T09:00:00Z"}"#).unwrap();
        assert_eq!(same.updated_at, "2025-10-27T09:00:00Z");

        let mut moved = results("2025-10-27T12:00:00Z");
        carry_forward_timestamp(
            &mut moved,
            br#"{"races":[{"course":"Ascot"}],"updated_at":"2025-10-27T09:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(moved.updated_at, "2025-10-27T12:00:00Z");
    }

    #[test]
    fn test_carry_forward_ignores_garbage_and_empty_input() {
        let mut snap = results("2025-10-27T12:00:00Z");
        carry_forward_timestamp(&mut snap, b"").unwrap();
        carry_forward_timestamp(&mut snap, b"<html>oops</html>").unwrap();
        carry_forward_timestamp(&mut snap, br#"{"races":[]}"#).unwrap();
        assert_eq!(snap.updated_at, "2025-10-27T12:00:00Z");
    }
}
