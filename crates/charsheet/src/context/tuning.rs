//! Threshold recommendations from corpus statistics.
//!
//! Both calculators look at the whole visible history (non-system, non-empty
//! messages), derive a tokens-per-word ratio with the active backend's
//! measurer, estimate how many messages fit one summarization request, and
//! round the result to a coarse step. They are advisory and never run on the
//! live trigger path.

use tracing::debug;

use crate::context::budget::TextMeasure;
use crate::history::{History, count_words};

/// Step for word-threshold recommendations.
pub const FORCE_WORDS_ROUNDING: usize = 100;

/// Step for message-interval recommendations.
pub const INTERVAL_ROUNDING: usize = 5;

/// Inputs that come from settings and the active backend.
#[derive(Debug, Clone, Copy)]
pub struct TuningParams<'a> {
    /// Generation budget of the active backend.
    pub budget: usize,
    /// Summarization prompt template (unrendered).
    pub prompt: &'a str,
    /// Target summary length in words.
    pub prompt_words: usize,
    /// Max messages per request; 0 means uncapped.
    pub max_messages: usize,
}

/// A recommendation plus the intermediates that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningReport {
    /// Recommended setting value, at least 1.
    pub value: usize,
    pub tokens_per_word: f64,
    /// Messages that fit one request on average (may be negative when the
    /// budget is smaller than the fixed overhead).
    pub average_messages_per_prompt: f64,
    /// Messages per request after applying the cap.
    pub target_messages: f64,
    /// Unrounded target.
    pub raw_target: f64,
}

struct CorpusStats {
    messages: f64,
    words: f64,
    tokens: f64,
}

impl CorpusStats {
    async fn collect(history: &History, measure: &dyn TextMeasure) -> Option<Self> {
        let texts = history.visible_texts();
        let words: usize = texts.iter().map(|t| count_words(t)).sum();
        if texts.is_empty() || words == 0 {
            return None;
        }
        let tokens = measure.measure(&texts.join("\n"), 0).await;
        if tokens == 0 {
            return None;
        }
        Some(Self {
            messages: texts.len() as f64,
            words: words as f64,
            tokens: tokens as f64,
        })
    }

    fn tokens_per_word(&self) -> f64 {
        self.tokens / self.words
    }
}

fn target_messages(average: f64, max_messages: usize) -> f64 {
    if max_messages > 0 {
        max_messages as f64
    } else {
        average.max(0.0)
    }
}

fn round_down(value: f64, step: usize) -> usize {
    let rounded = (value / step as f64).floor() * step as f64;
    rounded.max(1.0) as usize
}

/// Recommend `force_word_threshold`.
///
/// Returns `None` when the history has no visible words to learn from.
pub async fn recommend_force_words(
    history: &History,
    measure: &dyn TextMeasure,
    params: TuningParams<'_>,
) -> Option<TuningReport> {
    let stats = CorpusStats::collect(history, measure).await?;
    let average_message_words = stats.words / stats.messages;
    let tokens_per_word = stats.tokens_per_word();

    let budget_words = (params.budget as f64 / tokens_per_word).round();
    let prompt_words = count_words(params.prompt) as f64;
    let allowance_words = budget_words - params.prompt_words as f64 - prompt_words;
    let average = (allowance_words / average_message_words).floor();
    let target = target_messages(average, params.max_messages);
    let raw_target = target * average_message_words + allowance_words / 4.0;

    debug!(
        "Force-words tuning: budget={}, budget_words={budget_words}, allowance_words={allowance_words}, \
         average_messages={average}, target_messages={target}, target_words={raw_target:.1}, \
         tokens_per_word={tokens_per_word:.3}",
        params.budget
    );

    Some(TuningReport {
        value: round_down(raw_target, FORCE_WORDS_ROUNDING),
        tokens_per_word,
        average_messages_per_prompt: average,
        target_messages: target,
        raw_target,
    })
}

/// Recommend `message_interval`.
///
/// Returns `None` when the history has no visible words to learn from.
pub async fn recommend_interval(
    history: &History,
    measure: &dyn TextMeasure,
    params: TuningParams<'_>,
) -> Option<TuningReport> {
    let stats = CorpusStats::collect(history, measure).await?;
    let tokens_per_word = stats.tokens_per_word();
    let average_message_tokens = stats.tokens / stats.messages;

    let summary_tokens = (params.prompt_words as f64 * tokens_per_word).round();
    let prompt_tokens = measure.measure(params.prompt, 0).await as f64;
    let allowance = params.budget as f64 - prompt_tokens - summary_tokens;
    let average = (allowance / average_message_tokens).floor();
    let target = target_messages(average, params.max_messages);
    let raw_target = target + (average - target) / 4.0;

    debug!(
        "Interval tuning: budget={}, allowance={allowance}, summary_tokens={summary_tokens}, \
         prompt_tokens={prompt_tokens}, average_message_tokens={average_message_tokens:.1}, \
         average_messages={average}, target_messages={target}, adjusted={raw_target:.2}",
        params.budget
    );

    Some(TuningReport {
        value: round_down(raw_target, INTERVAL_ROUNDING),
        tokens_per_word,
        average_messages_per_prompt: average,
        target_messages: target,
        raw_target,
    })
}
