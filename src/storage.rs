//! Whole-file JSON persistence. Readers polling the output path only ever see
//! a complete previous file or a complete new one.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::PersistenceError;

/// Write `value` as indented UTF-8 JSON to `path`.
///
/// The JSON goes to a temporary file in the destination directory, which is
/// synced and then renamed over `path`. If anything fails the previous file
/// at `path` is untouched and the temporary file is removed.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let wrap = |source: io::Error| PersistenceError {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(wrap)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(wrap)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value).map_err(|e| wrap(e.into()))?;
        writer.write_all(b"\n").map_err(wrap)?;
        writer.flush().map_err(wrap)?;
    }
    tmp.as_file().sync_all().map_err(wrap)?;
    tmp.persist(path).map_err(|e| wrap(e.into()))?;

    debug!("Wrote {}", path.display());
    Ok(())
}

/// Read a JSON file written by [`write_json_atomic`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let file = File::open(path).map_err(|source| PersistenceError {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| PersistenceError {
        path: path.to_path_buf(),
        source: e.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::{fixture, DialogGraph};
    use crate::record::normalize;
    use serde_json::json;

    #[test]
    fn test_write_creates_directories_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storages/Chatai/dialog_map.json");
        let graph = fixture::intro_dialog().unwrap();

        write_json_atomic(&path, &graph).unwrap();

        let loaded: DialogGraph = read_json(&path).unwrap();
        assert_eq!(loaded, graph);
    }

    #[test]
    fn test_write_is_indented_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dialog_map.json");
        let record = normalize(&json!({"npc_text": "Купи имплант!", "replies": ["Нет."]}));

        write_json_atomic(&path, &record).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"npc_text\": \"Купи имплант!\""));
        assert!(text.contains("\n  \"replies\""));
    }

    #[test]
    fn test_write_replaces_whole_file_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");

        write_json_atomic(&path, &json!({"npc_text": "a much longer first version of the file"})).unwrap();
        write_json_atomic(&path, &json!({"npc_text": "b"})).unwrap();

        let value: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(value, json!({"npc_text": "b"}));
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_failed_write_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json_atomic(&path, &json!({"ok": true})).unwrap();

        // a directory in the way makes the final rename fail
        let blocked = dir.path().join("blocked.json");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), "x").unwrap();
        let err = write_json_atomic(&blocked, &json!({"ok": false})).unwrap_err();
        assert_eq!(err.path, blocked);

        let value: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(value, json!({"ok": true}));
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_read_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
        assert_eq!(err.path, path);
    }
}
