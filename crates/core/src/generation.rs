use std::fmt::Write;

pub fn build_prompt(query: &str, contexts: &[String]) -> String {
    let mut references = String::new();
    for (position, context) in contexts.iter().enumerate() {
        let _ = writeln!(references, "Reference {}: {}", position + 1, context);
    }

    format!(
        "Answer the user's question using the reference material below. \
         If the references do not contain the information, say that you cannot answer.\n\n\
         References:\n{references}\n\
         Question: {query}\n\
         Answer:"
    )
}

#[cfg(test)]
mod tests {
    use super::build_prompt;

    #[test]
    fn references_are_numbered_in_order() {
        let prompt = build_prompt(
            "Where is West Lake?",
            &["West Lake is in Hangzhou".to_string(), "It has causeways".to_string()],
        );

        let first = prompt.find("Reference 1: West Lake is in Hangzhou");
        let second = prompt.find("Reference 2: It has causeways");
        assert!(first.is_some() && second.is_some());
        assert!(first < second);
        assert!(prompt.ends_with("Question: Where is West Lake?\nAnswer:"));
    }

    #[test]
    fn prompt_without_references_still_carries_the_question() {
        let prompt = build_prompt("anything?", &[]);
        assert!(prompt.contains("cannot answer"));
        assert!(prompt.contains("Question: anything?"));
    }
}
