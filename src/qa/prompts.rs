/// Fixed instruction template for answer generation. The wording leans hard
/// on literal quoting so the model cannot paper over missing information.
const ANSWER_TEMPLATE: &str = r#"You are a careful assistant answering questions about a user's personal documents.

Rules you must follow:
- Answer ONLY from the document excerpts below. Do not use outside knowledge.
- Quote the documents literally wherever possible.
- If the excerpts do not contain the information asked for, say exactly: "That information is not provided in the documents."
- Never invent names, dates, numbers, links, or contact details.

Document excerpts:
{context}

Question: {question}

Answer:"#;

/// Render the budgeted chunks into the excerpt block, each tagged with its
/// document title.
pub fn format_context(chunks: &[crate::docs::types::DocumentChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("[{}]\n{}", c.meta.title, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_answer_prompt(context: &str, question: &str) -> String {
    ANSWER_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}
