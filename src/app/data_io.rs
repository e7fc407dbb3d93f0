use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::describe::{Lookup, LookupSource};
use super::error::{FillError, Result};
use super::types::DataFormat;

/// Snapshot files named `<prefix><page digits>.<extension>`, in filename order.
pub fn list_snapshots(dir: &Path, prefix: &str, extension: &str) -> Result<Vec<PathBuf>> {
    let suffix = format!(".{extension}");
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(FillError::at(dir))? {
        let entry = entry.map_err(FillError::at(dir))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(page) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
        else {
            continue;
        };
        if page.is_empty() || !page.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if entry.file_type().map_err(FillError::at(dir))?.is_file() {
            out.push(entry.path());
        }
    }
    out.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(out)
}

/// Replaces `path` with `contents` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let persist = || -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    persist().map_err(|source| {
        let _ = fs::remove_file(&tmp);
        FillError::Path {
            path: path.to_path_buf(),
            source,
        }
    })
}

const CSV_HEADERS: [&str; 6] = [
    "identifier",
    "url",
    "source",
    "detail",
    "description_chars",
    "recorded_at",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub identifier: String,
    pub url: String,
    pub source: String,
    pub detail: String,
    pub description_chars: usize,
    pub recorded_at: String,
}

impl From<&Lookup> for ReportRecord {
    fn from(lookup: &Lookup) -> Self {
        let (source, detail) = match &lookup.source {
            LookupSource::Cached => ("cached", String::new()),
            LookupSource::Downloaded => ("downloaded", String::new()),
            LookupSource::Unavailable(reason) => ("unavailable", reason.clone()),
        };
        ReportRecord {
            identifier: lookup.identifier.to_string(),
            url: lookup.url.clone(),
            source: source.to_string(),
            detail,
            description_chars: lookup.description_chars,
            recorded_at: lookup.recorded_at.clone(),
        }
    }
}

struct CsvSink {
    writer: csv::Writer<File>,
}

impl CsvSink {
    fn new(output_path: &str) -> Result<Self> {
        let file = File::create(output_path).map_err(FillError::at(output_path))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(CSV_HEADERS)?;
        Ok(Self { writer })
    }

    fn write_record(&mut self, rec: &ReportRecord) -> Result<()> {
        let chars = rec.description_chars.to_string();
        self.writer.write_record([
            rec.identifier.as_str(),
            rec.url.as_str(),
            rec.source.as_str(),
            rec.detail.as_str(),
            chars.as_str(),
            rec.recorded_at.as_str(),
        ])?;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

struct JsonSink {
    file: File,
    first: bool,
    closed: bool,
}

impl JsonSink {
    fn new(output_path: &str) -> Result<Self> {
        let mut file = File::create(output_path).map_err(FillError::at(output_path))?;
        file.write_all(b"[\n")?;
        Ok(Self {
            file,
            first: true,
            closed: false,
        })
    }

    fn write_record(&mut self, rec: &ReportRecord) -> Result<()> {
        if !self.first {
            self.file.write_all(b",\n")?;
        }
        self.first = false;
        serde_json::to_writer(&mut self.file, rec).map_err(io::Error::other)?;
        Ok(())
    }

    fn finalize(&mut self) -> io::Result<()> {
        if !self.closed {
            if self.first {
                self.file.write_all(b"]\n")?;
            } else {
                self.file.write_all(b"\n]\n")?;
            }
            self.closed = true;
        }
        self.file.flush()
    }
}

impl Drop for JsonSink {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}

enum ReportSink {
    Csv(CsvSink),
    Json(JsonSink),
}

impl ReportSink {
    fn new(output_path: &str, format: DataFormat) -> Result<Self> {
        match format {
            DataFormat::Csv => Ok(ReportSink::Csv(CsvSink::new(output_path)?)),
            DataFormat::Json => Ok(ReportSink::Json(JsonSink::new(output_path)?)),
        }
    }

    fn write_record(&mut self, rec: &ReportRecord) -> Result<()> {
        match self {
            ReportSink::Csv(sink) => sink.write_record(rec),
            ReportSink::Json(sink) => sink.write_record(rec),
        }
    }

    fn finalize(&mut self) -> Result<()> {
        match self {
            ReportSink::Csv(sink) => sink.flush()?,
            ReportSink::Json(sink) => sink.finalize()?,
        }
        Ok(())
    }
}

pub fn write_report(output_path: &str, format: DataFormat, lookups: &[Lookup]) -> Result<()> {
    let mut sink = ReportSink::new(output_path, format)?;
    for lookup in lookups {
        sink.write_record(&ReportRecord::from(lookup))?;
    }
    sink.finalize()
}
