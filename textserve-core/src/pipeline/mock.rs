//! Deterministic in-process pipelines.
//!
//! Useful for offline runs and for tests: the factory counts builds per model,
//! can delay, fail or panic builds, and the pipelines react to marker substrings in
//! the input text:
//!
//! - `[fail]` makes the pipeline return an error
//! - `[panic]` makes the pipeline panic
//! - `[empty]` makes the pipeline return no candidates

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{
    ClassificationOutput, ClassificationPipeline, GenerationOutput, GenerationPipeline,
    PipelineFactory, SummarizationPipeline, SummaryOutput,
};
use crate::error::PipelineError;
use crate::types::{ModelDescriptor, Parameters};

pub const FAIL_MARKER: &str = "[fail]";
pub const PANIC_MARKER: &str = "[panic]";
pub const EMPTY_MARKER: &str = "[empty]";

const POSITIVE_WORDS: &[&str] = &[
    "love", "great", "good", "excellent", "happy", "wonderful", "amazing", "like",
];
const NEGATIVE_WORDS: &[&str] = &[
    "hate", "bad", "terrible", "awful", "sad", "horrible", "worst", "dislike",
];

/// How the mock generator responds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeneratorMode {
    /// Append a fixed continuation to the prompt.
    #[default]
    Continue,
    /// Echo the prompt unless `do_sample` is set, then continue.
    EchoUnlessSampling,
    /// Always echo the prompt.
    AlwaysEcho,
}

/// Factory for mock pipelines with build instrumentation.
#[derive(Debug, Default)]
pub struct MockPipelineFactory {
    build_delay: Option<Duration>,
    failing_references: HashSet<String>,
    panicking_references: HashSet<String>,
    generator_mode: GeneratorMode,
    builds: Mutex<HashMap<String, usize>>,
    generator_calls: Arc<Mutex<Vec<Parameters>>>,
}

impl MockPipelineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every build.
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// Builds for descriptors with this backend reference fail.
    pub fn fail_builds_for(mut self, backend_reference: impl Into<String>) -> Self {
        self.failing_references.insert(backend_reference.into());
        self
    }

    /// Builds for descriptors with this backend reference panic.
    pub fn panic_builds_for(mut self, backend_reference: impl Into<String>) -> Self {
        self.panicking_references.insert(backend_reference.into());
        self
    }

    pub fn with_generator_mode(mut self, mode: GeneratorMode) -> Self {
        self.generator_mode = mode;
        self
    }

    /// Number of builds started for `name:version`.
    pub fn build_count(&self, key: &str) -> usize {
        self.builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Number of builds started across all models.
    pub fn total_builds(&self) -> usize {
        self.builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    /// Parameters passed to every generator invocation, in call order.
    pub fn generator_calls(&self) -> Vec<Parameters> {
        self.generator_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn begin_build(&self, descriptor: &ModelDescriptor) -> Result<(), PipelineError> {
        *self
            .builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(descriptor.key().to_string())
            .or_insert(0) += 1;

        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }

        if self.panicking_references.contains(&descriptor.backend_reference) {
            panic!("mock build panicked for {}", descriptor.backend_reference);
        }
        if self.failing_references.contains(&descriptor.backend_reference) {
            return Err(PipelineError::Execution {
                message: format!("cannot load weights for {}", descriptor.backend_reference),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineFactory for MockPipelineFactory {
    fn name(&self) -> &str {
        "mock"
    }

    async fn build_summarizer(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn SummarizationPipeline>, PipelineError> {
        self.begin_build(descriptor).await?;
        Ok(Arc::new(MockSummarizer))
    }

    async fn build_classifier(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn ClassificationPipeline>, PipelineError> {
        self.begin_build(descriptor).await?;
        Ok(Arc::new(MockClassifier))
    }

    async fn build_generator(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn GenerationPipeline>, PipelineError> {
        self.begin_build(descriptor).await?;
        Ok(Arc::new(MockGenerator {
            mode: self.generator_mode,
            calls: Arc::clone(&self.generator_calls),
        }))
    }
}

fn check_markers(text: &str) -> Result<bool, PipelineError> {
    if text.contains(PANIC_MARKER) {
        panic!("mock pipeline panicked on marker input");
    }
    if text.contains(FAIL_MARKER) {
        return Err(PipelineError::Execution {
            message: "mock pipeline failure".to_string(),
        });
    }
    Ok(text.contains(EMPTY_MARKER))
}

/// Returns the first sentence, capped at `max_length` words.
#[derive(Debug, Default)]
pub struct MockSummarizer;

#[async_trait]
impl SummarizationPipeline for MockSummarizer {
    async fn summarize(
        &self,
        text: &str,
        params: &Parameters,
    ) -> Result<Vec<SummaryOutput>, PipelineError> {
        if check_markers(text)? {
            return Ok(Vec::new());
        }
        let max_words = params
            .get("max_length")
            .and_then(|v| v.as_u64())
            .unwrap_or(150) as usize;
        let first = text
            .split_inclusive(['.', '!', '?'])
            .next()
            .unwrap_or(text)
            .trim();
        let summary = first
            .split_whitespace()
            .take(max_words)
            .collect::<Vec<_>>()
            .join(" ");
        Ok(vec![SummaryOutput {
            summary_text: summary,
        }])
    }
}

/// Lexicon-based sentiment labels.
#[derive(Debug, Default)]
pub struct MockClassifier;

#[async_trait]
impl ClassificationPipeline for MockClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<ClassificationOutput>, PipelineError> {
        if check_markers(text)? {
            return Ok(Vec::new());
        }
        let lower = text.to_lowercase();
        let count = |words: &[&str]| {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| words.contains(w))
                .count()
        };
        let positive = count(POSITIVE_WORDS);
        let negative = count(NEGATIVE_WORDS);
        let margin = positive.abs_diff(negative) as f64;
        let score = (0.6 + 0.15 * margin).min(0.999);
        let (label, score) = match positive.cmp(&negative) {
            std::cmp::Ordering::Greater => ("positive", score),
            std::cmp::Ordering::Less => ("negative", score),
            std::cmp::Ordering::Equal => ("neutral", 0.5),
        };
        Ok(vec![ClassificationOutput {
            label: label.to_string(),
            score,
        }])
    }
}

/// Continues or echoes the prompt, recording the parameters of every call.
#[derive(Debug, Default)]
pub struct MockGenerator {
    mode: GeneratorMode,
    calls: Arc<Mutex<Vec<Parameters>>>,
}

#[async_trait]
impl GenerationPipeline for MockGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &Parameters,
    ) -> Result<Vec<GenerationOutput>, PipelineError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(params.clone());

        if check_markers(prompt)? {
            return Ok(Vec::new());
        }
        let sampling = params
            .get("do_sample")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let echo = match self.mode {
            GeneratorMode::Continue => false,
            GeneratorMode::EchoUnlessSampling => !sampling,
            GeneratorMode::AlwaysEcho => true,
        };
        let generated_text = if echo {
            prompt.to_string()
        } else {
            format!("{prompt} And so the story went on, one sentence at a time.")
        };
        Ok(vec![GenerationOutput { generated_text }])
    }
}
