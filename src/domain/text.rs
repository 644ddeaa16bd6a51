use once_cell::sync::Lazy;
use regex::Regex;

/// Markup tags such as `<b>` or `</speak>`.
static MARKUP_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>]*>").expect("valid regex"));

/// Punctuation that speech engines pronounce or use for prosody.
const SPEAKABLE_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '\'', '"', '-', '(', ')', '%'];

/// Reduce a response to text that is safe to hand to a speech backend.
///
/// Markup tags are removed, then every character outside letters, digits,
/// whitespace and [`SPEAKABLE_PUNCTUATION`] is dropped (emoji, markdown
/// emphasis, code fences), and whitespace runs collapse to a single space.
/// Applying it twice gives the same result as applying it once.
pub fn sanitize_for_speech(text: &str) -> String {
    let without_tags = MARKUP_TAG.replace_all(text, " ");

    let filtered: String = without_tags
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || SPEAKABLE_PUNCTUATION.contains(c))
        .collect();

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}
