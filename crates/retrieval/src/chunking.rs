/// Packs paragraphs into chunks of at most `max_chunk_chars` characters.
/// A single paragraph longer than the limit is split on sentence ends.
pub fn chunk_document(body: &str, max_chunk_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    let pieces = body
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .flat_map(|paragraph| split_long(paragraph, max_chunk_chars));

    for piece in pieces {
        let current_len = current.chars().count();
        if current_len + piece.chars().count() + 2 > max_chunk_chars && !current.is_empty() {
            chunks.push(current.trim().to_string());
            current.clear();
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&piece);
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

fn split_long(paragraph: &str, max_chunk_chars: usize) -> Vec<String> {
    if paragraph.chars().count() <= max_chunk_chars {
        return vec![paragraph.to_string()];
    }

    let mut sentences = Vec::new();
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
        let sentence_end = word.ends_with('.') || word.ends_with('?') || word.ends_with('!');
        if sentence_end || current.chars().count() >= max_chunk_chars {
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}
