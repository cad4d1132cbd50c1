use unicode_segmentation::UnicodeSegmentation;

pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// First `max_graphemes` user-perceived characters of `input`, with an
/// ellipsis when anything was cut. Used for log previews of Hangul text.
pub fn preview(input: &str, max_graphemes: usize) -> String {
    let mut graphemes = input.graphemes(true);
    let head = graphemes
        .by_ref()
        .take(max_graphemes)
        .collect::<String>();
    if graphemes.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
