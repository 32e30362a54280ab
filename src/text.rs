use regex::Regex;

/// Split narration text into bounded chunks along sentence boundaries.
///
/// `max_chunks == -1` means unlimited; otherwise the result is truncated to
/// the first `max_chunks` entries. `word_limit` bounds the words per chunk
/// (characters for CJK text, with a `word_limit * 3` budget, since CJK words
/// are not space-delimited). A single sentence longer than the budget becomes
/// its own oversized chunk rather than being truncated mid-sentence.
pub fn chunk(text: &str, max_chunks: i32, word_limit: usize) -> Vec<String> {
    let cleaned = normalize_whitespace(text);
    if cleaned.is_empty() {
        return Vec::new();
    }

    let chunks = if contains_cjk(&cleaned) {
        chunk_cjk(&cleaned, word_limit * 3)
    } else {
        chunk_words(&cleaned, word_limit)
    };

    if max_chunks < 0 {
        chunks
    } else {
        chunks.into_iter().take(max_chunks as usize).collect()
    }
}

/// Collapse runs of whitespace (including literal `\n` sequences emitted by
/// some models) into single spaces.
fn normalize_whitespace(text: &str) -> String {
    let unescaped = text.replace("\\n", "\n");
    let collapse = Regex::new(r"\s+").unwrap();
    collapse.replace_all(&unescaped, " ").trim().to_string()
}

fn contains_cjk(text: &str) -> bool {
    let cjk = Regex::new(r"[\u{4e00}-\u{9fff}\u{3400}-\u{4dbf}\u{3040}-\u{309f}\u{30a0}-\u{30ff}]")
        .unwrap();
    cjk.is_match(text)
}

/// Word-count chunking for space-delimited scripts.
fn chunk_words(cleaned: &str, word_limit: usize) -> Vec<String> {
    let sentences = split_sentences(cleaned);

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for sentence in &sentences {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        if current.len() + words.len() <= word_limit {
            current.extend(words);
        } else {
            if !current.is_empty() {
                chunks.push(current.join(" "));
            }
            current = words;
        }
    }
    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// Character-count chunking along CJK sentence-ending punctuation.
fn chunk_cjk(cleaned: &str, char_limit: usize) -> Vec<String> {
    let sentence_re = Regex::new(r"[^。！？…；，]+[。！？…；，]*").unwrap();
    let mut sentences: Vec<String> = sentence_re
        .find_iter(cleaned)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        sentences.push(cleaned.to_string());
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in &sentences {
        let current_len = current.chars().count();
        let sentence_len = sentence.chars().count();
        if current_len + sentence_len > char_limit && !current.is_empty() {
            chunks.push(current.trim().to_string());
            current = sentence.clone();
        } else {
            current.push_str(sentence);
        }
    }
    if !current.is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

/// Sentence split on `.`/`!`/`?`, with line-break and whole-input fallbacks
/// for text that carries no terminal punctuation.
fn split_sentences(cleaned: &str) -> Vec<String> {
    let sentence_re = Regex::new(r"[^.!?]+[.!?]+(\s|$)").unwrap();
    let sentences: Vec<String> = sentence_re
        .find_iter(cleaned)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !sentences.is_empty() {
        return sentences;
    }

    let lines: Vec<String> = cleaned
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if !lines.is_empty() {
        return lines;
    }

    vec![cleaned.to_string()]
}

/// Normalize typographic punctuation the model likes to emit into plain
/// equivalents that are safe inside subtitle files and encoder arguments.
pub fn sanitize_script(text: &str) -> String {
    text.replace('\u{2018}', "'")
        .replace('\u{2019}', "'")
        .replace('\u{201C}', "\"")
        .replace('\u{201D}', "\"")
        .replace('\u{2013}', "-")
        .replace('\u{2014}', "-")
        .replace('\u{2026}', "...")
        .replace('\u{00a0}', " ")
        .replace('\t', " ")
        .trim()
        .to_string()
}

/// First non-empty paragraph of a script, used as the video description seed.
pub fn first_paragraph(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or("")
        .to_string()
}

/// Convert a display title into a name safe for a directory on any platform.
///
/// Reserved characters become their full-width lookalikes so the folder still
/// reads like the title. A title that sanitizes to nothing falls back to a
/// hash-derived name.
pub fn safe_folder_name(title: &str) -> String {
    let mut safe = String::with_capacity(title.len());
    for c in title.trim().chars() {
        match c {
            '<' => safe.push('＜'),
            '>' => safe.push('＞'),
            ':' => safe.push('：'),
            '"' => safe.push('＂'),
            '|' => safe.push('｜'),
            '?' => safe.push('？'),
            '*' => safe.push('＊'),
            '/' => safe.push('／'),
            '\\' => safe.push('＼'),
            '\0' => {}
            '\n' | '\r' | '\t' => safe.push(' '),
            '\u{2018}' | '\u{2019}' => safe.push('\''),
            '\u{201C}' | '\u{201D}' => safe.push('＂'),
            '\u{2013}' | '\u{2014}' => safe.push('－'),
            other => safe.push(other),
        }
    }

    let collapse = Regex::new(r"\s+").unwrap();
    let mut safe = collapse.replace_all(&safe, " ").trim().to_string();

    if safe.is_empty() {
        let digest = md5::compute(title.as_bytes());
        safe = format!("video_{:.8}", format!("{:x}", digest));
    }

    if safe.chars().count() > 100 {
        safe = safe.chars().take(100).collect::<String>().trim_end().to_string();
    }
    safe
}

/// Convert a display title into a name safe for file stems (thumbnail,
/// script, final video).
pub fn safe_file_name(title: &str) -> String {
    let normalized = title
        .replace('\u{2018}', "'")
        .replace('\u{2019}', "'")
        .replace('\u{201C}', "\"")
        .replace('\u{201D}', "\"")
        .replace('\u{2013}', "-")
        .replace('\u{2014}', "-");
    normalized.trim().chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_respect_word_limit() {
        let text = "One two three. Four five. Six seven eight nine. Ten.";
        let chunks = chunk(text, -1, 5);
        for c in &chunks {
            assert!(
                c.split_whitespace().count() <= 5,
                "chunk over limit: {}",
                c
            );
        }
    }

    #[test]
    fn test_oversized_sentence_becomes_own_chunk() {
        let text = "Short one. This single sentence has far too many words to fit the limit at all.";
        let chunks = chunk(text, -1, 4);
        assert!(chunks.iter().any(|c| c.split_whitespace().count() > 4));
        // Nothing is dropped or truncated mid-sentence.
        let rejoined = chunks.join(" ");
        assert!(rejoined.contains("far too many words"));
    }

    #[test]
    fn test_round_trip_preserves_words() {
        let text = "Alpha beta gamma. Delta epsilon! Zeta eta theta iota? Kappa.";
        let chunks = chunk(text, -1, 4);
        let rejoined = chunks.join(" ");
        let original: Vec<&str> = text.split_whitespace().collect();
        let recovered: Vec<&str> = rejoined.split_whitespace().collect();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_max_chunks_is_a_prefix() {
        let text = "A b c. D e f. G h i. J k l. M n o.";
        let unlimited = chunk(text, -1, 3);
        let limited = chunk(text, 2, 3);
        assert!(limited.len() <= 2);
        assert_eq!(limited[..], unlimited[..limited.len()]);
    }

    #[test]
    fn test_cjk_uses_character_budget() {
        let text = "これは短い文です。こちらも短い文です。最後の文はこれです。";
        let chunks = chunk(text, -1, 5);
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            // Budget is word_limit * 3 characters.
            assert!(c.chars().count() <= 15);
        }
    }

    #[test]
    fn test_no_punctuation_falls_back_to_whole_input() {
        let chunks = chunk("just a trailing fragment with no ending", -1, 3);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk("", -1, 10).is_empty());
        assert!(chunk("   \n  ", -1, 10).is_empty());
    }

    #[test]
    fn test_sanitize_script() {
        let dirty = "\u{201C}Hello\u{201D} \u{2014} it\u{2019}s fine\u{2026}\tok\u{00a0}now";
        assert_eq!(sanitize_script(dirty), "\"Hello\" - it's fine... ok now");
    }

    #[test]
    fn test_first_paragraph() {
        let text = "\n\nFirst paragraph here.\n\nSecond paragraph.";
        assert_eq!(first_paragraph(text), "First paragraph here.");
        assert_eq!(first_paragraph(""), "");
    }

    #[test]
    fn test_safe_folder_name_replaces_reserved_chars() {
        let name = safe_folder_name("What: is <this>? A/B\\C");
        assert!(!name.contains(':'));
        assert!(!name.contains('<'));
        assert!(!name.contains('/'));
        assert!(!name.contains('\\'));
        assert!(name.contains('：'));
    }

    #[test]
    fn test_safe_folder_name_empty_falls_back_to_hash() {
        let name = safe_folder_name("\0\0 ");
        assert!(name.starts_with("video_"));
    }

    #[test]
    fn test_safe_file_name_caps_length() {
        let long = "x".repeat(200);
        assert_eq!(safe_file_name(&long).chars().count(), 80);
    }
}
