use unicode_segmentation::UnicodeSegmentation;

/// Average characters per token for mixed prose
const CHARS_PER_TOKEN: usize = 4;

/// Role marker and separators around each history message
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate tokens from text as ceil(graphemes / 4).
/// Cheap, deterministic and monotonic in text length.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let graphemes = text.graphemes(true).count();
    graphemes.div_ceil(CHARS_PER_TOKEN)
}

/// Estimate tokens for one history message including its overhead
pub fn estimate_message_tokens(content: &str) -> usize {
    estimate_tokens(content) + MESSAGE_OVERHEAD_TOKENS
}
