//! System prompt construction

use crate::rag::DocumentMetadata;
use std::fmt::Write;

/// Build the system prompt for a thread.
///
/// The thread id is spelled out so the model can pass it to `rag_tool`.
pub fn build_system_prompt(thread_id: &str, document: Option<&DocumentMetadata>) -> String {
    let mut prompt = format!(
        "You are a helpful assistant. For questions about the uploaded PDF, call the `rag_tool` \
         and include the thread_id `{thread_id}`. You can also use the web search, stock price, \
         and calculator tools when helpful."
    );

    if let Some(doc) = document {
        let _ = write!(
            prompt,
            "\n\nThe document uploaded to this chat is `{}` ({} pages, {} indexed chunks).",
            doc.filename, doc.number_of_documents, doc.number_of_chunks
        );
    }

    prompt
}
