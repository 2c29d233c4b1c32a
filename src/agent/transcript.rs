//! Streaming transcript persistence.
//!
//! Every agent invocation writes its raw stream-json lines to
//! `<root>/<run_id>/<step>/stream.jsonl` as they arrive, so a crash mid-run
//! still leaves a usable partial transcript. Once the session id is known
//! the file is renamed to `<session_id>.jsonl`.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const PROVISIONAL_NAME: &str = "stream.jsonl";

pub struct TranscriptWriter {
    file: File,
    dir: PathBuf,
    provisional: PathBuf,
}

impl TranscriptWriter {
    pub fn create(root: &Path, run_id: &str, step: &str) -> Result<Self> {
        let dir = root.join(run_id).join(step);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create transcript directory {}", dir.display()))?;
        let provisional = dir.join(PROVISIONAL_NAME);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&provisional)
            .with_context(|| format!("failed to create transcript {}", provisional.display()))?;
        Ok(Self {
            file,
            dir,
            provisional,
        })
    }

    /// Appends one stream line and flushes immediately.
    pub fn append_line(&mut self, line: &str) -> Result<()> {
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.write_all(b"\n"))
            .and_then(|()| self.file.flush())
            .context("failed to write transcript line")
    }

    /// Renames the transcript after its session id, when one was captured.
    /// Without a session id the provisional file stays in place.
    pub fn finalize(self, session_id: Option<&str>) -> Result<PathBuf> {
        drop(self.file);
        let Some(session_id) = session_id.filter(|id| is_safe_file_stem(id)) else {
            return Ok(self.provisional);
        };
        let target = self.dir.join(format!("{session_id}.jsonl"));
        std::fs::rename(&self.provisional, &target).with_context(|| {
            format!(
                "failed to rename transcript {} -> {}",
                self.provisional.display(),
                target.display()
            )
        })?;
        Ok(target)
    }
}

fn is_safe_file_stem(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_arrive_in_order_and_rename_on_finalize() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = TranscriptWriter::create(tmp.path(), "run1", "plan").unwrap();
        writer.append_line(r#"{"type":"system"}"#).unwrap();
        writer.append_line("not json").unwrap();
        writer.append_line(r#"{"type":"result"}"#).unwrap();

        let path = writer.finalize(Some("abc-123")).unwrap();
        assert_eq!(path, tmp.path().join("run1").join("plan").join("abc-123.jsonl"));
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![r#"{"type":"system"}"#, "not json", r#"{"type":"result"}"#]
        );
        assert!(!tmp
            .path()
            .join("run1")
            .join("plan")
            .join("stream.jsonl")
            .exists());
    }

    #[test]
    fn missing_session_id_keeps_provisional_name() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = TranscriptWriter::create(tmp.path(), "run2", "classify").unwrap();
        writer.append_line("partial").unwrap();
        let path = writer.finalize(None).unwrap();
        assert!(path.ends_with("stream.jsonl"));
        assert!(path.exists());
    }

    #[test]
    fn hostile_session_id_keeps_provisional_name() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = TranscriptWriter::create(tmp.path(), "run3", "plan").unwrap();
        let path = writer.finalize(Some("../../escape")).unwrap();
        assert!(path.ends_with("stream.jsonl"));
    }

    #[test]
    fn partial_transcript_is_on_disk_before_finalize() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = TranscriptWriter::create(tmp.path(), "run4", "implement").unwrap();
        writer.append_line("line one").unwrap();
        // Readable while the writer is still live, as a crash would leave it.
        let on_disk = std::fs::read_to_string(
            tmp.path()
                .join("run4")
                .join("implement")
                .join("stream.jsonl"),
        )
        .unwrap();
        assert_eq!(on_disk, "line one\n");
    }
}
