use futures::StreamExt;

use super::providers::TokenStream;

const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

/// Removes `<think>...</think>` sections from streamed text.
/// Tags may be split across chunks; a possible partial tag is held back
/// until the next chunk decides it.
#[derive(Debug, Default)]
pub struct ThinkFilter {
    buffer: String,
    inside: bool,
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, get back the visible text it completes
    pub fn push(&mut self, chunk: &str) -> String {
        self.buffer.push_str(chunk);
        let mut visible = String::new();

        loop {
            let tag = if self.inside { CLOSE } else { OPEN };

            if let Some(pos) = self.buffer.find(tag) {
                if !self.inside {
                    visible.push_str(&self.buffer[..pos]);
                }
                self.buffer.drain(..pos + tag.len());
                self.inside = !self.inside;
                continue;
            }

            let emit_to = self.buffer.len() - partial_tag_len(&self.buffer, tag);
            if !self.inside {
                visible.push_str(&self.buffer[..emit_to]);
            }
            self.buffer.drain(..emit_to);
            return visible;
        }
    }

    /// Flush what is left at end of stream. An unclosed section is dropped.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.buffer);
        if self.inside {
            String::new()
        } else {
            rest
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&len| text.ends_with(&tag[..len]))
        .unwrap_or(0)
}

/// Wrap a token stream so thinking sections never reach the caller
pub fn strip_think(mut inner: TokenStream) -> TokenStream {
    Box::pin(async_stream::stream! {
        let mut filter = ThinkFilter::new();
        let mut failed = false;

        while let Some(item) = inner.next().await {
            match item {
                Ok(chunk) => {
                    let visible = filter.push(&chunk);
                    if !visible.is_empty() {
                        yield Ok(visible);
                    }
                }
                Err(e) => {
                    failed = true;
                    yield Err(e);
                    break;
                }
            }
        }

        if !failed {
            let rest = filter.finish();
            if !rest.is_empty() {
                yield Ok(rest);
            }
        }
    })
}
