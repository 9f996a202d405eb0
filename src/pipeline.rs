use crate::chunk::chunk_units;
use crate::config::Config;
use crate::document::{write_atomic, Document, DocumentFormat};
use crate::error::{Result, TranslateError};
use crate::keys::KeyPool;
use crate::orchestrator::{ChunkOrchestrator, TranslationStats};
use crate::project::ProjectManager;
use crate::translate::{GeminiTranslator, RequestThrottle, RetryPolicy, Translator};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Upper bound on files translated at the same time.
const MAX_FILE_WORKERS: usize = 8;

/// Everything shared by the files of one run.
pub struct TranslationContext {
    pub translator: Arc<dyn Translator>,
    pub throttle: Arc<RequestThrottle>,
    pub retry: RetryPolicy,
    pub projects: ProjectManager,
    pub cancelled: Arc<AtomicBool>,
}

impl TranslationContext {
    pub fn new(translator: Arc<dyn Translator>, config: &Config, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            translator,
            throttle: Arc::new(RequestThrottle::new(config.min_request_interval())),
            retry: RetryPolicy::from_config(config),
            projects: ProjectManager::new(config.projects_dir.clone()),
            cancelled,
        }
    }

    /// Build the Gemini-backed context from a validated config.
    pub fn from_config(config: &Config, cancelled: Arc<AtomicBool>) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(KeyPool::new(config.api_keys.clone()));
        info!(
            "Using {} API key(s) with model {}",
            pool.len(),
            config.model.name
        );
        let translator = GeminiTranslator::new(pool, config.model.clone())?;
        Ok(Self::new(Arc::new(translator), config, cancelled))
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-run translation settings.
#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub target_lang: String,
    /// Concurrent requests per file, and the cap on concurrent files.
    pub workers: usize,
    pub max_chunk_chars: usize,
    pub output_dir: PathBuf,
    pub keep_original_filename: bool,
    pub show_progress: bool,
}

impl TranslateOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_lang: config.target_lang.clone(),
            workers: config.max_workers,
            max_chunk_chars: config.max_chunk_chars,
            output_dir: config.output_dir.clone(),
            keep_original_filename: config.keep_original_filename,
            show_progress: true,
        }
    }
}

/// One file to translate, and where under the output dir its result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    pub subdir: Option<PathBuf>,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            subdir: None,
        }
    }
}

/// Result of translating one file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub input: PathBuf,
    pub format: DocumentFormat,
    /// Copy placed in the output directory.
    pub output_path: PathBuf,
    pub project_path: PathBuf,
    pub units: usize,
    pub stats: TranslationStats,
    pub total_time: Duration,
}

#[derive(Debug)]
pub struct FileOutcome {
    pub input: PathBuf,
    pub result: std::result::Result<FileReport, String>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: Vec<FileOutcome>,
    pub target_lang: String,
    pub total_time: Duration,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

/// `<stem>_<lang>.<ext>`, or the input's own name when keeping it.
pub fn output_file_name(input: &Path, target_lang: &str, keep_original: bool) -> String {
    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if keep_original {
        return file_name;
    }

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(file_name);
    match input.extension() {
        Some(ext) => format!("{}_{}.{}", stem, target_lang, ext.to_string_lossy()),
        None => format!("{}_{}", stem, target_lang),
    }
}

fn is_supported_file(path: &Path) -> bool {
    path.is_file() && DocumentFormat::is_supported(path)
}

fn scan_dir(dir: &Path, rel: &Path, recursive: bool, out: &mut Vec<(PathBuf, PathBuf)>) -> Result<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            if recursive {
                let name = path.file_name().map(PathBuf::from).unwrap_or_default();
                scan_dir(&path, &rel.join(name), recursive, out)?;
            }
        } else if is_supported_file(&path) {
            out.push((path, rel.to_path_buf()));
        }
    }
    Ok(())
}

/// Expand command line paths into input files.
///
/// Files are taken as given. Directories contribute their supported files in
/// sorted order, with output going to a subdirectory named after the
/// directory (mirroring nested folders when `recursive`).
pub fn collect_inputs(paths: &[PathBuf], recursive: bool) -> Result<Vec<InputFile>> {
    let mut inputs = Vec::new();

    for path in paths {
        if path.is_dir() {
            let dir_name = path
                .canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(PathBuf::from))
                .unwrap_or_default();

            let mut found = Vec::new();
            scan_dir(path, &dir_name, recursive, &mut found)?;
            if found.is_empty() {
                warn!("No supported files in {}", path.display());
            }
            inputs.extend(found.into_iter().map(|(file, rel)| InputFile {
                path: file,
                subdir: Some(rel).filter(|r| !r.as_os_str().is_empty()),
            }));
        } else if path.exists() {
            inputs.push(InputFile::new(path.clone()));
        } else {
            return Err(TranslateError::FileNotFound(path.display().to_string()));
        }
    }

    debug!("Collected {} input file(s)", inputs.len());
    Ok(inputs)
}

/// Translate a single file.
///
/// The original is copied into a new project, its chunks are saved, and the
/// translated document is written both into the project and into
/// `output_dir[/subdir]`.
pub async fn translate_file(
    input: &InputFile,
    ctx: &TranslationContext,
    options: &TranslateOptions,
) -> Result<FileReport> {
    let start_time = Instant::now();
    let path = &input.path;

    if !path.exists() {
        return Err(TranslateError::FileNotFound(path.display().to_string()));
    }
    let format = DocumentFormat::from_path(path)?;

    if ctx.is_cancelled() {
        return Err(TranslateError::Cancelled);
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let project = ctx.projects.create(&stem)?;
    project.copy_original(path)?;

    let file_name = output_file_name(path, &options.target_lang, options.keep_original_filename);
    let display_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| stem.clone());

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 1: Parse and extract
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 1/3: Parsing {} as {}", path.display(), format);
    let document = Document::load(path)?;
    let units = document.extract_texts();
    let unit_count = units.len();

    let (rendered, stats) = if units.is_empty() {
        warn!("{}: nothing to translate, copying original", display_name);
        let original = std::fs::read_to_string(path)?;
        (original, TranslationStats::default())
    } else {
        // ═══════════════════════════════════════════════════════════════════
        // Stage 2: Chunk and translate
        // ═══════════════════════════════════════════════════════════════════
        let chunks = chunk_units(units, options.max_chunk_chars);
        info!(
            "Stage 2/3: Translating {} units in {} chunks to {}",
            unit_count,
            chunks.len(),
            options.target_lang
        );
        project.save_chunks(&chunks)?;

        let orchestrator = ChunkOrchestrator::new(ctx.translator.clone(), options.workers)
            .with_progress(options.show_progress)
            .with_throttle(ctx.throttle.clone())
            .with_retry(ctx.retry.clone())
            .with_cancel(ctx.cancelled.clone())
            .with_label(display_name.clone());

        let (translations, stats) = orchestrator
            .translate_chunks(chunks, &options.target_lang)
            .await?;

        if stats.failed_chunks > 0 {
            warn!(
                "{}: {} of {} chunks kept their original text",
                display_name, stats.failed_chunks, stats.total_chunks
            );
        }

        (document.apply_translations(&translations).render()?, stats)
    };

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 3: Write output
    // ═══════════════════════════════════════════════════════════════════════
    let project_output = project.translated_path(&file_name);
    write_atomic(&project_output, rendered.as_bytes())?;

    let mut output_dir = options.output_dir.clone();
    if let Some(subdir) = &input.subdir {
        output_dir.push(subdir);
    }
    let output_path = output_dir.join(&file_name);
    write_atomic(&output_path, rendered.as_bytes())?;
    info!("Stage 3/3: Wrote {}", output_path.display());

    Ok(FileReport {
        input: path.clone(),
        format,
        output_path,
        project_path: project.path,
        units: unit_count,
        stats,
        total_time: start_time.elapsed(),
    })
}

/// Translate many files concurrently.
///
/// Up to `min(files, workers, 8)` files run at once. A file that fails is
/// recorded in the report and does not stop the others.
pub async fn translate_batch(
    inputs: Vec<InputFile>,
    ctx: &TranslationContext,
    options: &TranslateOptions,
) -> BatchReport {
    let start_time = Instant::now();
    let total = inputs.len();
    let file_workers = total.min(options.workers).min(MAX_FILE_WORKERS).max(1);

    info!(
        "Translating {} file(s) to {} with {} file worker(s)",
        total, options.target_lang, file_workers
    );

    // A lone file keeps its chunk bar; batches show one bar per file count
    let multi = MultiProgress::new();
    let overall = if options.show_progress && total > 1 {
        let pb = multi.add(ProgressBar::new(total as u64));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let file_options = TranslateOptions {
        show_progress: options.show_progress && total == 1,
        ..options.clone()
    };

    let semaphore = Arc::new(Semaphore::new(file_workers));
    let mut futures = FuturesUnordered::new();

    for (position, input) in inputs.into_iter().enumerate() {
        let sem = semaphore.clone();
        let pb = overall.clone();
        let file_options = &file_options;

        futures.push(async move {
            let result = match sem.acquire().await {
                Ok(_permit) => translate_file(&input, ctx, file_options).await,
                Err(_) => Err(TranslateError::Cancelled),
            };

            if let Err(ref e) = result {
                if !matches!(e, TranslateError::Cancelled) {
                    warn!("Failed to translate {}: {}", input.path.display(), e);
                }
            }
            if let Some(ref pb) = pb {
                if let Some(name) = input.path.file_name() {
                    pb.set_message(name.to_string_lossy().into_owned());
                }
                pb.inc(1);
            }

            (
                position,
                FileOutcome {
                    input: input.path,
                    result: result.map_err(|e| e.to_string()),
                },
            )
        });
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(outcome) = futures.next().await {
        outcomes.push(outcome);
    }
    outcomes.sort_by_key(|(position, _)| *position);

    if let Some(pb) = overall {
        pb.finish_and_clear();
    }

    let report = BatchReport {
        files: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
        target_lang: options.target_lang.clone(),
        total_time: start_time.elapsed(),
    };

    info!(
        "Batch complete: {}/{} files translated in {:.2}s",
        report.succeeded(),
        total,
        report.total_time.as_secs_f64()
    );
    report
}

/// Print a summary of the batch results.
pub fn print_summary(report: &BatchReport) {
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                      Translation Complete                     ");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Language:   {}", report.target_lang);
    println!(
        "  Files:      {} translated, {} failed",
        report.succeeded(),
        report.failed()
    );
    println!("  Total:      {:.2}s", report.total_time.as_secs_f64());
    println!();

    for file in &report.files {
        match &file.result {
            Ok(r) => {
                let partial = if r.stats.failed_chunks > 0 {
                    format!(" ({} chunk(s) untranslated)", r.stats.failed_chunks)
                } else {
                    String::new()
                };
                println!(
                    "  ✓ {} -> {}{}",
                    file.input.display(),
                    r.output_path.display(),
                    partial
                );
                println!(
                    "      {} units, {} chunks, {:.2}s",
                    r.units,
                    r.stats.total_chunks,
                    r.total_time.as_secs_f64()
                );
            }
            Err(e) => println!("  ✗ {}: {}", file.input.display(), e),
        }
    }

    println!();
    println!("═══════════════════════════════════════════════════════════════");
}
