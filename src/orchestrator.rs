use crate::chunk::Chunk;
use crate::error::{Result, TranslateError};
use crate::translate::{RequestThrottle, RetryPolicy, Translator};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Result of translating a single chunk.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub index: usize,
    /// Translated text, or the source text when the chunk failed.
    pub translations: HashMap<String, String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ChunkOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Statistics from translating one file's chunks.
#[derive(Debug, Clone, Default)]
pub struct TranslationStats {
    pub total_chunks: usize,
    pub successful_chunks: usize,
    pub failed_chunks: usize,
    pub total_units: usize,
    pub total_time: Duration,
    pub avg_chunk_time: Duration,
    pub errors: Vec<String>,
}

/// Orchestrates concurrent translation of chunks.
pub struct ChunkOrchestrator {
    translator: Arc<dyn Translator>,
    concurrency: usize,
    show_progress: bool,
    multi_progress: Option<MultiProgress>,
    throttle: Option<Arc<RequestThrottle>>,
    retry: RetryPolicy,
    cancel: Option<Arc<AtomicBool>>,
    label: String,
}

impl ChunkOrchestrator {
    pub fn new(translator: Arc<dyn Translator>, concurrency: usize) -> Self {
        Self {
            translator,
            concurrency: concurrency.max(1),
            show_progress: true,
            multi_progress: None,
            throttle: None,
            retry: RetryPolicy::default(),
            cancel: None,
            label: String::from("chunks"),
        }
    }

    /// Enable or disable progress bar display.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Draw the progress bar inside a shared multi-bar display.
    pub fn with_multi_progress(mut self, multi: MultiProgress) -> Self {
        self.multi_progress = Some(multi);
        self
    }

    pub fn with_throttle(mut self, throttle: Arc<RequestThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stop scheduling chunks once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Name shown on the progress bar, usually the file name.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(self.label.clone());
        Some(match &self.multi_progress {
            Some(multi) => multi.add(pb),
            None => pb,
        })
    }

    /// Translate one chunk with throttling and retries, falling back to the
    /// source text if every attempt fails.
    async fn run_chunk(&self, chunk: Chunk, target_lang: &str) -> ChunkOutcome {
        let chunk_start = Instant::now();
        let index = chunk.index;
        let label = format!("Chunk {}", index);

        debug!("Starting translation of chunk {}", index);

        let chunk_ref = &chunk;
        let result = self
            .retry
            .run(&label, |_attempt| async move {
                if self.is_cancelled() {
                    return Err(TranslateError::Cancelled);
                }
                if let Some(throttle) = &self.throttle {
                    throttle.wait().await;
                }
                self.translator.translate_chunk(chunk_ref, target_lang).await
            })
            .await;

        let duration_ms = chunk_start.elapsed().as_millis() as u64;

        match result {
            Ok(translations) => {
                debug!("Chunk {} completed in {}ms", index, duration_ms);
                ChunkOutcome {
                    index,
                    translations,
                    error: None,
                    duration_ms,
                }
            }
            Err(e) => {
                if !matches!(e, TranslateError::Cancelled) {
                    warn!("Chunk {} failed, keeping source text: {}", index, e);
                }
                ChunkOutcome {
                    index,
                    translations: chunk.source_map(),
                    error: Some(e.to_string()),
                    duration_ms,
                }
            }
        }
    }

    /// Translate all chunks concurrently and merge the results.
    ///
    /// Results are merged in chunk order whatever order they complete in.
    /// Failed chunks contribute their source text. Errors only when every
    /// chunk failed or the run was cancelled.
    pub async fn translate_chunks(
        &self,
        chunks: Vec<Chunk>,
        target_lang: &str,
    ) -> Result<(HashMap<String, String>, TranslationStats)> {
        if chunks.is_empty() {
            return Ok((HashMap::new(), TranslationStats::default()));
        }

        let total_chunks = chunks.len();
        let total_units: usize = chunks.iter().map(|c| c.units.len()).sum();
        let start_time = Instant::now();

        info!(
            "Translating {} chunks ({} units) with {} concurrent requests using {}",
            total_chunks,
            total_units,
            self.concurrency,
            self.translator.name()
        );

        let progress_bar = self.progress_bar(total_chunks);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut futures = FuturesUnordered::new();

        for chunk in chunks {
            let sem = semaphore.clone();
            let pb = progress_bar.clone();

            futures.push(async move {
                let outcome = match sem.acquire().await {
                    Ok(_permit) if !self.is_cancelled() => {
                        self.run_chunk(chunk, target_lang).await
                    }
                    _ => ChunkOutcome {
                        index: chunk.index,
                        translations: chunk.source_map(),
                        error: Some(TranslateError::Cancelled.to_string()),
                        duration_ms: 0,
                    },
                };
                if let Some(ref pb) = pb {
                    pb.inc(1);
                }
                outcome
            });
        }

        let mut outcomes: Vec<ChunkOutcome> = Vec::with_capacity(total_chunks);
        while let Some(outcome) = futures.next().await {
            outcomes.push(outcome);
        }

        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        if self.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }

        outcomes.sort_by_key(|o| o.index);

        let mut merged = HashMap::with_capacity(total_units);
        let mut stats = TranslationStats {
            total_chunks,
            total_units,
            ..TranslationStats::default()
        };
        let mut total_chunk_time_ms: u64 = 0;

        for outcome in outcomes {
            total_chunk_time_ms += outcome.duration_ms;
            match outcome.error {
                None => stats.successful_chunks += 1,
                Some(e) => {
                    stats.failed_chunks += 1;
                    stats.errors.push(format!("chunk {}: {}", outcome.index, e));
                }
            }
            merged.extend(outcome.translations);
        }

        stats.total_time = start_time.elapsed();
        stats.avg_chunk_time = Duration::from_millis(total_chunk_time_ms / total_chunks as u64);

        info!(
            "Translation complete: {}/{} chunks successful in {:.2}s (avg {:.2}s/chunk)",
            stats.successful_chunks,
            total_chunks,
            stats.total_time.as_secs_f64(),
            stats.avg_chunk_time.as_secs_f64()
        );

        if stats.successful_chunks == 0 {
            return Err(TranslateError::Translation(format!(
                "All {} chunks failed. Errors: {}",
                total_chunks,
                stats.errors.join("; ")
            )));
        }

        Ok((merged, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TextUnit;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Mock translator that upper-cases text.
    struct MockTranslator {
        call_count: AtomicUsize,
        fail_on_index: Option<usize>,
        /// Fail this many times per chunk before succeeding.
        flaky_failures: usize,
    }

    impl MockTranslator {
        fn new() -> Self {
            Self {
                call_count: AtomicUsize::new(0),
                fail_on_index: None,
                flaky_failures: 0,
            }
        }

        fn failing_on(index: usize) -> Self {
            Self {
                fail_on_index: Some(index),
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl Translator for MockTranslator {
        async fn translate_chunk(
            &self,
            chunk: &Chunk,
            _target_lang: &str,
        ) -> Result<HashMap<String, String>> {
            let call = self.call_count.fetch_add(1, Ordering::SeqCst);

            // Later chunks finish first
            tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(chunk.index as u64 * 2)))
                .await;

            if self.fail_on_index == Some(chunk.index) {
                return Err(TranslateError::Api {
                    status: 500,
                    message: "Mock error".to_string(),
                });
            }
            if call < self.flaky_failures {
                return Err(TranslateError::RateLimited { retry_after: None });
            }

            Ok(chunk
                .units
                .iter()
                .map(|u| (u.key.clone(), u.text.to_uppercase()))
                .collect())
        }

        fn name(&self) -> &'static str {
            "Mock"
        }
    }

    fn create_test_chunks(count: usize) -> Vec<Chunk> {
        (0..count)
            .map(|i| Chunk {
                index: i,
                units: vec![TextUnit::new(format!("k{}", i), format!("text {}", i))],
            })
            .collect()
    }

    fn orchestrator(translator: MockTranslator, concurrency: usize) -> ChunkOrchestrator {
        ChunkOrchestrator::new(Arc::new(translator), concurrency)
            .with_progress(false)
            .with_retry(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_translate_empty_chunks() {
        let (merged, stats) = orchestrator(MockTranslator::new(), 4)
            .translate_chunks(Vec::new(), "vi")
            .await
            .unwrap();

        assert!(merged.is_empty());
        assert_eq!(stats.total_chunks, 0);
    }

    #[tokio::test]
    async fn test_translate_multiple_chunks() {
        let (merged, stats) = orchestrator(MockTranslator::new(), 4)
            .translate_chunks(create_test_chunks(10), "vi")
            .await
            .unwrap();

        assert_eq!(merged.len(), 10);
        assert_eq!(merged["k7"], "TEXT 7");
        assert_eq!(stats.successful_chunks, 10);
        assert_eq!(stats.total_units, 10);
    }

    #[tokio::test]
    async fn test_handles_partial_failure() {
        let (merged, stats) = orchestrator(MockTranslator::failing_on(2), 4)
            .translate_chunks(create_test_chunks(5), "vi")
            .await
            .unwrap();

        assert_eq!(stats.successful_chunks, 4);
        assert_eq!(stats.failed_chunks, 1);
        assert_eq!(merged["k2"], "text 2");
        assert_eq!(merged["k3"], "TEXT 3");
        assert!(stats.errors[0].starts_with("chunk 2:"));
    }

    #[tokio::test]
    async fn test_all_chunks_failed_is_error() {
        let err = orchestrator(MockTranslator::failing_on(0), 2)
            .translate_chunks(create_test_chunks(1), "vi")
            .await
            .unwrap_err();

        assert!(matches!(err, TranslateError::Translation(ref m) if m.contains("All 1 chunks failed")));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let translator = MockTranslator {
            flaky_failures: 2,
            ..MockTranslator::new()
        };
        let (merged, stats) = orchestrator(translator, 1)
            .translate_chunks(create_test_chunks(1), "vi")
            .await
            .unwrap();

        assert_eq!(merged["k0"], "TEXT 0");
        assert_eq!(stats.failed_chunks, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let flag = Arc::new(AtomicBool::new(true));
        let err = orchestrator(MockTranslator::new(), 2)
            .with_cancel(flag)
            .translate_chunks(create_test_chunks(3), "vi")
            .await
            .unwrap_err();

        assert!(matches!(err, TranslateError::Cancelled));
    }
}
