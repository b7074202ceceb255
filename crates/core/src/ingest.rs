use crate::chunking::{split_text, ChunkingConfig};
use crate::error::{ConfigError, ExtractionError, IngestError};
use crate::models::{Chunk, RagConfig};
use crate::normalize::normalize_text;
use crate::traits::DocumentExtractor;
use rayon::{ThreadPool, ThreadPoolBuilder};
use regex::Regex;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::any::Any;
use std::io::{BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub fn discover_documents(folder: &Path, extractor: &dyn DocumentExtractor) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if entry.file_type().is_file() && extractor.supports(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn process_document(
    extractor: &dyn DocumentExtractor,
    path: &Path,
    chunking: ChunkingConfig,
) -> Result<Vec<Chunk>, ExtractionError> {
    let raw_text = extractor.extract(path)?;
    let normalized = normalize_text(&raw_text);
    let source_path = path.to_string_lossy().to_string();

    Ok(split_text(&normalized, chunking)
        .into_iter()
        .enumerate()
        .map(|(sequence, text)| Chunk {
            text,
            source_path: source_path.clone(),
            sequence,
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub chunks: Vec<Chunk>,
    pub processed_files: usize,
    pub skipped_files: Vec<SkippedDocument>,
}

pub struct CorpusIngestor {
    extractor: Arc<dyn DocumentExtractor>,
    chunking: ChunkingConfig,
    workers: usize,
}

impl CorpusIngestor {
    pub fn new(extractor: Arc<dyn DocumentExtractor>, config: &RagConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            extractor,
            chunking: ChunkingConfig::try_from(config)?,
            workers: config.ingest_workers,
        })
    }

    pub fn ingest(&self, directory: &Path) -> Result<ChunkStream, IngestError> {
        if !directory.is_dir() {
            return Err(IngestError::NotADirectory(directory.to_path_buf()));
        }

        let files = discover_documents(directory, self.extractor.as_ref());
        if files.is_empty() {
            info!(directory = %directory.display(), "no supported documents found");
            return Ok(ChunkStream::empty());
        }

        info!(
            directory = %directory.display(),
            files = files.len(),
            workers = self.workers,
            "ingesting documents"
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers.min(files.len()))
            .thread_name(|index| format!("ingest-{index}"))
            .build()
            .map_err(|error| IngestError::WorkerPool(error.to_string()))?;

        let (sender, receiver) = mpsc::sync_channel(self.workers);

        for path in files {
            let sender = sender.clone();
            let extractor = Arc::clone(&self.extractor);
            let chunking = self.chunking;
            pool.spawn(move || {
                // rayon aborts the process when a spawned job panics.
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    process_document(extractor.as_ref(), &path, chunking)
                }))
                .unwrap_or_else(|payload| Err(ExtractionError::Panicked(panic_message(payload.as_ref()))));
                // A send error means the stream was dropped; nobody wants the result.
                let _ = sender.send(FileOutcome { path, result });
            });
        }

        Ok(ChunkStream {
            receiver: Some(receiver),
            buffered: VecDeque::new(),
            processed_files: 0,
            skipped_files: Vec::new(),
            _pool: Some(pool),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

struct FileOutcome {
    path: PathBuf,
    result: Result<Vec<Chunk>, ExtractionError>,
}

/// Files are reported in completion order; chunks within a file stay in order.
pub struct ChunkStream {
    receiver: Option<Receiver<FileOutcome>>,
    buffered: VecDeque<Chunk>,
    processed_files: usize,
    skipped_files: Vec<SkippedDocument>,
    _pool: Option<ThreadPool>,
}

impl ChunkStream {
    fn empty() -> Self {
        Self {
            receiver: None,
            buffered: VecDeque::new(),
            processed_files: 0,
            skipped_files: Vec::new(),
            _pool: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.receiver.is_none() && self.buffered.is_empty()
    }

    pub fn processed_files(&self) -> usize {
        self.processed_files
    }

    pub fn skipped_files(&self) -> &[SkippedDocument] {
        &self.skipped_files
    }

    pub fn finish(mut self) -> IngestionReport {
        let chunks = self.by_ref().collect();
        IngestionReport {
            chunks,
            processed_files: self.processed_files,
            skipped_files: std::mem::take(&mut self.skipped_files),
        }
    }

    fn record(&mut self, outcome: FileOutcome) {
        match outcome.result {
            Ok(chunks) => {
                debug!(path = %outcome.path.display(), chunks = chunks.len(), "document chunked");
                self.processed_files += 1;
                self.buffered.extend(chunks);
            }
            Err(error) => {
                warn!(path = %outcome.path.display(), reason = %error, "skipping document");
                self.skipped_files.push(SkippedDocument {
                    path: outcome.path,
                    reason: error.to_string(),
                });
            }
        }
    }
}

impl Iterator for ChunkStream {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = self.buffered.pop_front() {
                return Some(chunk);
            }

            let outcome = match self.receiver.as_ref().map(Receiver::recv) {
                Some(Ok(outcome)) => outcome,
                Some(Err(_)) | None => {
                    self.receiver = None;
                    self._pool = None;
                    return None;
                }
            };
            self.record(outcome);
        }
    }
}

pub fn write_chunk_dump<'a, I>(path: &Path, chunks: I) -> Result<usize, IngestError>
where
    I: IntoIterator<Item = &'a str>,
{
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    let mut written = 0usize;
    for text in chunks {
        written += 1;
        write!(writer, "=== chunk {written} ===\n{text}\n\n")?;
    }
    writer.flush()?;

    Ok(written)
}

pub fn read_chunk_dump(path: &Path) -> Result<Vec<String>, IngestError> {
    let header = Regex::new(r"^=== chunk \d+ ===$")?;
    let content = fs::read_to_string(path)?;

    let mut chunks = Vec::new();
    let mut current = Vec::new();
    for line in content.lines() {
        if header.is_match(line) {
            flush_record(&mut current, &mut chunks);
        } else {
            current.push(line);
        }
    }
    flush_record(&mut current, &mut chunks);

    Ok(chunks)
}

fn flush_record(lines: &mut Vec<&str>, chunks: &mut Vec<String>) {
    let text = lines.join("\n").trim().to_string();
    if !text.is_empty() {
        chunks.push(text);
    }
    lines.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::FileExtractor;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn ingestor(chunk_size: usize, chunk_overlap: usize) -> CorpusIngestor {
        let config = RagConfig {
            chunk_size,
            chunk_overlap,
            ingest_workers: 3,
            ..RagConfig::default()
        };
        CorpusIngestor::new(Arc::new(FileExtractor), &config).expect("valid config")
    }

    #[test]
    fn discover_documents_is_recursive_and_filters_formats() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("a.txt"), "alpha")?;
        fs::write(nested.join("b.pdf"), b"%PDF-1.4\n%fake")?;
        fs::write(nested.join("c.md"), "# ignored")?;

        let files = discover_documents(dir.path(), &FileExtractor);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn empty_directory_yields_an_exhausted_stream() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("readme.md"), "not supported")?;

        let mut stream = ingestor(100, 10).ingest(dir.path())?;
        assert!(stream.is_exhausted());
        assert!(stream.next().is_none());
        Ok(())
    }

    #[test]
    fn missing_directory_is_an_error() {
        let result = ingestor(100, 10).ingest(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(IngestError::NotADirectory(_))));
    }

    #[test]
    fn unreadable_files_are_skipped_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("good.txt"), "West Lake is in Hangzhou.")?;
        fs::write(dir.path().join("broken.pdf"), b"%PDF-1.4\n%broken")?;

        let report = ingestor(100, 10).ingest(dir.path())?.finish();

        assert_eq!(report.processed_files, 1);
        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.chunks[0].text, "West Lake is in Hangzhou");
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("broken.pdf")
        );
        Ok(())
    }

    struct PanickingExtractor;

    impl DocumentExtractor for PanickingExtractor {
        fn supports(&self, path: &Path) -> bool {
            FileExtractor.supports(path)
        }

        fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
            if path.file_name().and_then(|name| name.to_str()) == Some("bad.txt") {
                panic!("malformed object stream");
            }
            FileExtractor.extract(path)
        }
    }

    #[test]
    fn panicking_extractor_only_skips_its_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("good.txt"), "West Lake is in Hangzhou.")?;
        fs::write(dir.path().join("bad.txt"), "never read")?;

        let config = RagConfig {
            chunk_size: 100,
            chunk_overlap: 10,
            ingest_workers: 2,
            ..RagConfig::default()
        };
        let report = CorpusIngestor::new(Arc::new(PanickingExtractor), &config)?
            .ingest(dir.path())?
            .finish();

        assert_eq!(report.processed_files, 1);
        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.skipped_files.len(), 1);
        assert!(report.skipped_files[0].reason.contains("malformed object stream"));
        Ok(())
    }

    #[test]
    fn within_file_order_is_preserved() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for name in ["one.txt", "two.txt", "three.txt"] {
            let body = (0..20)
                .map(|line| format!("{name} line number {line}"))
                .collect::<Vec<_>>()
                .join("\n");
            fs::write(dir.path().join(name), body)?;
        }

        let stream = ingestor(40, 8).ingest(dir.path())?;
        let mut last_seen: HashMap<String, usize> = HashMap::new();
        let mut total = 0;
        for chunk in stream {
            if let Some(previous) = last_seen.get(&chunk.source_path) {
                assert_eq!(chunk.sequence, previous + 1);
            } else {
                assert_eq!(chunk.sequence, 0);
            }
            last_seen.insert(chunk.source_path.clone(), chunk.sequence);
            assert!(chunk.text.chars().count() <= 40);
            total += 1;
        }

        assert_eq!(last_seen.len(), 3);
        assert!(total > 3);
        Ok(())
    }

    #[test]
    fn every_ingest_call_is_a_fresh_pass() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.txt"), "First file. It has two sentences.")?;
        fs::write(dir.path().join("b.txt"), "Second file here.")?;

        let ingestor = ingestor(20, 4);
        let mut first: Vec<Chunk> = ingestor.ingest(dir.path())?.collect();
        let mut second: Vec<Chunk> = ingestor.ingest(dir.path())?.collect();
        first.sort_by(|a, b| (&a.source_path, a.sequence).cmp(&(&b.source_path, b.sequence)));
        second.sort_by(|a, b| (&a.source_path, a.sequence).cmp(&(&b.source_path, b.sequence)));

        assert!(!first.is_empty());
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn chunk_dump_reads_back_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("out").join("processed_chunks.txt");
        let chunks = ["first chunk", "second\nspans lines", "third"];

        let written = write_chunk_dump(&path, chunks.iter().copied())?;
        assert_eq!(written, 3);

        let raw = fs::read_to_string(&path)?;
        assert!(raw.starts_with("=== chunk 1 ===\nfirst chunk\n\n"));

        let read = read_chunk_dump(&path)?;
        assert_eq!(read, vec!["first chunk", "second\nspans lines", "third"]);
        Ok(())
    }
}
