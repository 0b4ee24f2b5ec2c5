//! `{{placeholder}}` substitution and reasoning-block stripping.

/// Replace every `{{key}}` in `template` with its value.
///
/// Unknown placeholders are left untouched so that later stages (the
/// assembler's `{{new_content}}`) can fill them in.
pub fn substitute(template: &str, params: &[(&str, &str)]) -> String {
    params.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{key}}}}}"), value)
    })
}

/// Remove `<think>…</think>` reasoning blocks some models prepend to their
/// answer, then trim. An unterminated block swallows the rest of the text.
pub fn strip_reasoning(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some((before, after_open)) = rest.split_once(OPEN) {
        out.push_str(before);
        rest = after_open.split_once(CLOSE).map_or("", |(_, tail)| tail);
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_placeholders() {
        let out = substitute("Write {{words}} words about {{name}}.", &[("words", "300")]);
        assert_eq!(out, "Write 300 words about {{name}}.");
    }

    #[test]
    fn substitutes_every_occurrence() {
        assert_eq!(substitute("{{a}}-{{a}}", &[("a", "x")]), "x-x");
    }

    #[test]
    fn strips_reasoning_blocks() {
        assert_eq!(strip_reasoning("<think>hmm</think>\nSheet"), "Sheet");
        assert_eq!(strip_reasoning("A <think>x</think>B<think>y</think> C"), "A B C");
        assert_eq!(strip_reasoning("plain"), "plain");
        assert_eq!(strip_reasoning("keep <think>never closed"), "keep");
    }
}
