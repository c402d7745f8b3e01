use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use docsight::{
    action::{self, Action},
    assembler::{assemble, AssembledMessage, Assembler, MessageState},
    client::{Invocation, StreamingClient},
    errors::{GenerationError, StreamError, ValidationError},
    pipeline::Analyzer,
    prompt,
    providers::{
        configs::{MockProviderConfig, ProviderConfig},
        factory::get_provider,
        mock::{MockProvider, Step},
    },
    transport::{self, GENERIC_ERROR},
    validator::{validate, RawRequest},
};
use futures::StreamExt;

/// Push an invocation through the wire encoding and back into an assembler,
/// the way a remote consumer sees it.
async fn over_the_wire(invocation: Invocation) -> (Result<AssembledMessage, StreamError>, Vec<String>) {
    let wire = transport::encode(invocation).map(|line| Ok::<_, Infallible>(Bytes::from(line)));
    let parts = transport::decode(wire);

    let mut assembler = Assembler::new();
    let mut snapshots = Vec::new();
    let result = assemble(parts, &mut assembler, |m| snapshots.push(m.text().to_string())).await;

    let message = match result {
        Ok(id) => Ok(assembler.take(id).expect("completed message is retained")),
        Err(e) => Err(e),
    };
    (message, snapshots)
}

fn canned_analyzer() -> Analyzer {
    let provider = get_provider(ProviderConfig::Mock(MockProviderConfig::default())).unwrap();
    Analyzer::new(StreamingClient::new(provider))
}

#[tokio::test]
async fn risk_scan_reports_severity() {
    let invocation = canned_analyzer()
        .analyze(RawRequest::new(
            "Contract renews annually unless terminated 30 days prior.",
            "riskScan",
        ))
        .unwrap();

    let (message, snapshots) = over_the_wire(invocation).await;
    let message = message.unwrap();

    assert_eq!(message.state(), MessageState::Completed);
    assert!(message.text().starts_with("## Risk Analysis Report"));
    assert!(message.text().lines().any(|line| {
        line.trim_start().starts_with("- ")
            && ["Low", "Medium", "High"].iter().any(|s| line.contains(s))
    }));
    // the text grew one fragment at a time
    assert!(snapshots.len() > 2);
    assert!(snapshots.windows(2).all(|w| w[1].starts_with(&w[0])));
}

#[tokio::test]
async fn extract_tags_is_a_keyword_list() {
    let invocation = canned_analyzer()
        .analyze(RawRequest::new("Apollo program overview.", "extractTags"))
        .unwrap();

    let (message, _) = over_the_wire(invocation).await;
    let text = message.unwrap().text().to_string();

    assert!(text.contains(", "));
    assert!(!text.lines().any(|line| line.starts_with("## ")));
}

#[tokio::test]
async fn empty_document_never_calls_the_model() {
    let provider = MockProvider::fragments(["unused"]);
    let analyzer = Analyzer::new(StreamingClient::new(Arc::new(provider.clone())));

    let result = analyzer.analyze(RawRequest::new("", "summarize"));
    assert!(matches!(result, Err(ValidationError::EmptyDocument)));
    assert_eq!(provider.calls(), 0);
}

#[test]
fn validator_rejects_regardless_of_other_field() {
    for id in ["summarize", "extractTags", "riskScan", "bogus", ""] {
        assert_eq!(
            validate(RawRequest::new("", id)).unwrap_err(),
            ValidationError::EmptyDocument
        );
    }
    for text in ["x", "A long document.", "   "] {
        assert!(matches!(
            validate(RawRequest::new(text, "translate")),
            Err(ValidationError::UnknownAction(_))
        ));
    }
}

#[test]
fn prompts_are_deterministic_for_every_action() {
    for definition in action::all() {
        let request = validate(RawRequest::new("Same text.", definition.id.as_ref())).unwrap();
        let first = prompt::build(&request);
        let second = prompt::build(&request);
        assert_eq!(first, second);
        assert!(first.instruction.starts_with(definition.instruction_template.trim_end()));
        assert_eq!(action::lookup(definition.id.as_ref()).unwrap(), definition);
    }
    assert_eq!(action::all().count(), 3);
    assert_eq!(action::lookup("riskScan").unwrap().id, Action::RiskScan);
}

#[tokio::test]
async fn fragments_survive_the_wire_unchanged() {
    let fragments = [
        "line with \"quotes\"\n",
        "tab\tand unicode: résumé ✓",
        "\n\n",
        "0:\"looks like a frame\"",
    ];
    let client = StreamingClient::new(Arc::new(MockProvider::fragments(fragments)));
    let invocation = client.invoke(prompt::ComposedPrompt {
        system_directive: "system".to_string(),
        instruction: "instruction".to_string(),
    });

    let (message, _) = over_the_wire(invocation).await;
    assert_eq!(message.unwrap().text(), fragments.concat());
}

#[tokio::test]
async fn failure_reaches_consumer_as_generic_error() {
    let provider = MockProvider::steps([
        Step::Text("Partial ".to_string()),
        Step::Text("answer".to_string()),
        Step::Fail(GenerationError::Upstream {
            status: 500,
            body: "stack trace".to_string(),
        }),
    ]);
    let analyzer = Analyzer::new(StreamingClient::new(Arc::new(provider)));
    let invocation = analyzer
        .analyze(RawRequest::new("Some text.", "summarize"))
        .unwrap();

    let wire = transport::encode(invocation).map(|line| Ok::<_, Infallible>(Bytes::from(line)));
    let parts = transport::decode(wire);
    let mut assembler = Assembler::new();
    let mut last = None;
    let result = assemble(parts, &mut assembler, |m| last = Some(m.clone())).await;

    assert_eq!(
        result,
        Err(StreamError::Generation(GenerationError::Remote(
            GENERIC_ERROR.to_string()
        )))
    );
    let last = last.unwrap();
    assert_eq!(last.state(), MessageState::Failed);
    assert_eq!(last.text(), "Partial answer");
}

#[tokio::test(start_paused = true)]
async fn timeout_keeps_partial_text() {
    let provider = MockProvider::steps([
        Step::Text("started".to_string()),
        Step::Pause(Duration::from_secs(600)),
        Step::Text("never".to_string()),
    ]);
    let client =
        StreamingClient::new(Arc::new(provider)).with_timeout(Duration::from_secs(60));
    let analyzer = Analyzer::new(client);
    let invocation = analyzer
        .analyze(RawRequest::new("Some text.", "summarize"))
        .unwrap();

    let (message, snapshots) = over_the_wire(invocation).await;
    assert!(message.is_err());
    assert_eq!(snapshots.last().map(String::as_str), Some("started"));
}
