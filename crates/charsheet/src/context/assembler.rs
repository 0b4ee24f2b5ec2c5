//! Budget-bounded payload assembly.
//!
//! The assembler greedily takes messages after the current checkpoint, in
//! conversation order, until the next one would push the measured payload
//! over budget. Each trial renders the *complete* payload exactly as it will
//! be sent, so the final payload always measures within budget.

use tracing::{debug, trace};

use crate::context::budget::TextMeasure;
use crate::context::checkpoint::find_checkpoint;
use crate::context::template::substitute;
use crate::history::History;

/// Placeholder replaced with the previous checkpoint content.
pub const PREVIOUS_SUMMARY_PLACEHOLDER: &str = "previous_summary";

/// Placeholder replaced with the accumulated new messages.
pub const NEW_CONTENT_PLACEHOLDER: &str = "new_content";

/// Substituted for [`PREVIOUS_SUMMARY_PLACEHOLDER`] when there is no checkpoint.
pub const NO_PREVIOUS_SUMMARY: &str = "(No previous summary)";

/// Fixed safety margin added to every trial measurement.
pub const MEASURE_PADDING: usize = 64;

const SEPARATOR: &str = "\n\n";

/// Result of one assembly pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    /// Flattened payload: rendered template, previous summary, new content.
    pub payload: String,
    /// Accumulated `speaker: text` entries, joined by blank lines.
    pub body: String,
    /// Template with both placeholders substituted. Backends that split
    /// system and user roles send this as the system message.
    pub system_prompt: String,
    /// Previous summary and new content without the template; the user
    /// message of a split-role request.
    pub user_content: String,
    /// Index in the original history of the last message that fit.
    /// `None` means nothing fit and there is nothing to summarize.
    pub last_included_index: Option<usize>,
    /// Number of messages included.
    pub included: usize,
    /// Measured size of `payload` (with padding); 0 when nothing fit.
    pub measured: usize,
}

/// Builds the next summarization payload under a measured budget.
pub struct PromptAssembler<'a> {
    measure: &'a dyn TextMeasure,
    budget: usize,
    max_messages: usize,
}

impl<'a> PromptAssembler<'a> {
    pub fn new(measure: &'a dyn TextMeasure, budget: usize) -> Self {
        Self {
            measure,
            budget,
            max_messages: 0,
        }
    }

    /// Stop after `max` messages even if budget remains. 0 means no cap.
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    pub async fn assemble(&self, history: &History, template: &str) -> Assembly {
        let checkpoint = find_checkpoint(history);
        let previous = checkpoint.as_ref().map(|c| c.content.as_str());
        let start = checkpoint.as_ref().map_or(0, |c| c.index + 1);

        let template = substitute(
            template,
            &[(PREVIOUS_SUMMARY_PLACEHOLDER, previous.unwrap_or(NO_PREVIOUS_SUMMARY))],
        );

        let mut buffer: Vec<String> = Vec::new();
        let mut last_included_index = None;
        let mut measured = 0;

        for (index, message) in history
            .snapshot_excluding_last()
            .iter()
            .enumerate()
            .skip(start)
        {
            if !message.is_summarizable() {
                continue;
            }

            buffer.push(message.entry());
            let trial = render(&template, previous, &buffer).payload;
            let size = self.measure.measure(&trial, MEASURE_PADDING).await;
            trace!("Trial payload with {} entries: {size}/{}", buffer.len(), self.budget);

            if size > self.budget {
                buffer.pop();
                debug!(
                    "Budget exceeded ({size} > {}), stopping before index {index}",
                    self.budget
                );
                break;
            }

            last_included_index = Some(index);
            measured = size;

            if self.max_messages > 0 && buffer.len() >= self.max_messages {
                debug!("Max messages per request reached ({})", buffer.len());
                break;
            }
        }

        let rendered = render(&template, previous, &buffer);
        debug!(
            "Assembled {} messages, last_included_index={last_included_index:?}, payload {} chars",
            buffer.len(),
            rendered.payload.len()
        );

        Assembly {
            payload: rendered.payload,
            body: rendered.body,
            system_prompt: rendered.system_prompt,
            user_content: rendered.user_content,
            last_included_index,
            included: buffer.len(),
            measured,
        }
    }
}

struct Rendered {
    body: String,
    system_prompt: String,
    user_content: String,
    payload: String,
}

fn join_segments(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// Render every output form for the given entries. Trials and the final
/// result go through here so that what is measured is what is sent.
fn render(template: &str, previous: Option<&str>, entries: &[String]) -> Rendered {
    let body = entries.join(SEPARATOR);
    let system_prompt = substitute(template, &[(NEW_CONTENT_PLACEHOLDER, &body)]);
    let previous = previous.unwrap_or("");
    let user_content = join_segments(&[previous, body.as_str()]);
    let payload = join_segments(&[system_prompt.as_str(), previous, body.as_str()]);
    Rendered {
        body,
        system_prompt,
        user_content,
        payload,
    }
}
