use crate::data_models::SearchResult;
use crate::text::truncate_chars;

pub const NO_RESULTS: &str = "No relevant search results were found.";
pub const PER_RESULT_CHARS: usize = 1000;

/// System instruction for turns without search context.
pub const FORMATTING_PROMPT: &str = "You are a helpful assistant that uses markdown formatting effectively. Always format your responses using:
- Headers with # for sections
- **Bold** for emphasis
- `code` for inline code
- ```language for code blocks
- * or - for bullet points
- 1. 2. 3. for numbered lists
- > for blockquotes
- [text](url) for links
- | tables | when | appropriate |

Make your responses visually structured and easy to read.";

/// Shapes search results into the bounded context block handed to the model.
#[derive(Debug, Clone, Copy)]
pub struct ContextComposer {
    per_result_chars: usize,
}

impl Default for ContextComposer {
    fn default() -> Self {
        ContextComposer {
            per_result_chars: PER_RESULT_CHARS,
        }
    }
}

impl ContextComposer {
    pub fn with_per_result_chars(per_result_chars: usize) -> ContextComposer {
        ContextComposer { per_result_chars }
    }

    /// One citation block per result, in input order.
    pub fn compose_context(&self, results: &[SearchResult]) -> String {
        if results.is_empty() {
            return NO_RESULTS.to_string();
        }
        results
            .iter()
            .map(|r| {
                format!(
                    "Source: [{}]({})\n{}",
                    r.title(),
                    r.source(),
                    truncate_chars(r.content(), self.per_result_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn search_system_prompt(&self, query: &str, results: &[SearchResult]) -> String {
        format!(
            "You are a helpful assistant with access to current web search results.

The user asked: \"{query}\"

Here are the relevant search results:

{context}

Answer the user's question using the search results above. Cite your sources as markdown links, e.g. [title](url). If the search results do not contain enough information to answer the question, say so clearly.",
            context = self.compose_context(results),
        )
    }
}
