//! Generators for flow documents used across tests.

/// A document with only an empty `main` flow.
pub fn minimal_flow_document() -> String {
    r#"
dsl_version: "1.0"
flows:
  - name: main
    elements: []
"#
    .to_string()
}

/// Greets on "hi", answers twice on "how are you", then finishes.
pub fn scripted_exchange_document() -> String {
    r#"
dsl_version: "1.0"
flows:
  - name: main
    elements:
      - match:
          event: UtteranceUserActionFinished
          arguments:
            final_transcript: hi
      - await:
          action: UtteranceBotAction
          arguments:
            script: Hello world!
      - match:
          event: UtteranceUserActionFinished
          arguments:
            final_transcript: how are you
      - await:
          action: UtteranceBotAction
          arguments:
            script: Great!
      - await:
          action: UtteranceBotAction
          arguments:
            script: And you?
"#
    .to_string()
}

/// A `main` flow activating one flow per `(user text, bot answer)` pair.
///
/// Every pair gets a flow named `answer <index>` that keeps answering.
pub fn answering_document(pairs: &[(&str, &str)]) -> String {
    let mut document = String::from("dsl_version: \"1.0\"\nflows:\n  - name: main\n    elements:\n");
    if pairs.is_empty() {
        document.push_str("      - log: nothing to answer\n");
    }
    for index in 0..pairs.len() {
        document.push_str(&format!(
            "      - activate:\n          flow: answer {}\n",
            index
        ));
    }
    document.push_str("      - match:\n          event: ConversationClosed\n");

    for (index, (question, answer)) in pairs.iter().enumerate() {
        document.push_str(&format!(
            r#"  - name: answer {index}
    elements:
      - match:
          event: UtteranceUserActionFinished
          arguments:
            final_transcript: "{question}"
      - await:
          action: UtteranceBotAction
          arguments:
            script: "{answer}"
"#,
            index = index,
            question = question,
            answer = answer,
        ));
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documents_load() {
        for document in [
            minimal_flow_document(),
            scripted_exchange_document(),
            answering_document(&[("hi", "Hello!"), ("bye", "Goodbye!")]),
        ] {
            let configs = parley_dsl::load_flow_configs(&document).unwrap();
            assert!(configs.contains_key("main"));
        }
    }
}
