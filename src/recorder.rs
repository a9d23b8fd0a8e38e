use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write as _};
use std::path::Path;

use anyhow::Context as _;

use crate::types::now_ms;

const JSONL_FLUSH_EVERY_LINES: usize = 64;
const JSONL_FLUSH_EVERY_MS: u64 = 5_000;

/// Append-only JSON-lines file with batched flushes.
pub struct JsonlAppender {
    out: BufWriter<File>,
    pending_lines: usize,
    last_flush_ms: u64,
}

impl JsonlAppender {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
            pending_lines: 0,
            last_flush_ms: now_ms(),
        })
    }

    pub fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.pending_lines = self.pending_lines.saturating_add(1);

        let now = now_ms();
        let due = self.pending_lines >= JSONL_FLUSH_EVERY_LINES
            || now.saturating_sub(self.last_flush_ms) >= JSONL_FLUSH_EVERY_MS;
        if due {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush_and_sync(&mut self) -> anyhow::Result<()> {
        self.flush()?;
        self.out.get_ref().sync_all().context("sync jsonl file")?;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.out.flush()?;
        self.pending_lines = 0;
        self.last_flush_ms = now_ms();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_lines_across_reopen() {
        let path = std::env::temp_dir().join(format!(
            "lsr_sync_jsonl_{}_{}.jsonl",
            std::process::id(),
            now_ms()
        ));
        let _ = std::fs::remove_file(&path);

        let mut a = JsonlAppender::open(&path).expect("open");
        a.write_line(r#"{"n":1}"#).expect("write");
        a.flush_and_sync().expect("sync");
        drop(a);

        let mut b = JsonlAppender::open(&path).expect("reopen");
        b.write_line(r#"{"n":2}"#).expect("write");
        b.flush_and_sync().expect("sync");

        let body = std::fs::read_to_string(&path).expect("read");
        assert_eq!(body, "{\"n\":1}\n{\"n\":2}\n");
        let _ = std::fs::remove_file(&path);
    }
}
