// End-to-end pipeline tests: detection, substitution and every artifact a run writes
// WHY: These exercise the full orchestrator against scripted detectors so no service is needed

mod integration;

use integration::{read, test_config, ScriptedDetector, TestFixture, STORY};
use pseudonymize::artifacts::{read_mapping, write_mapping};
use pseudonymize::{
    pseudonymize_file, Category, KnownTermsDetector, Orchestrator, PseudonymMapping, RedactError, RunOutcome,
    RunRequest, RunSummary, Term,
};
use std::collections::BTreeMap;

const STORY_REDACTED: &str = "[Name1] met [Name2] at the [Place1] gate. [Name1]'s bike was old. \
[Name2] laughed at it. They walked to [Business1] where [Name4] worked. \
[Name4]'s office faced [Place1]. [Name1] called [Contact1] but nobody answered! \
Was [Name3] there? [Name2] said [Name3] was her cousin. The Toms' house was empty. \
Tommy and Tomcat were the neighbours' cats. [Business1] closed at six. \
[Name1], [Name2] and [Name4] left together. [Place1] was quiet again.";

/// Four one-sentence chunks with these settings
const SHORT_TEXT: &str = "Tom lives here. Mary Jane visits Tom. ACME Corp pays Tom. Elm Park is green.";

fn short_terms() -> Vec<Term> {
    vec![
        Term::new("Tom", Category::Name),
        Term::new("Mary Jane", Category::Name),
        Term::new("ACME Corp", Category::Business),
        Term::new("Elm Park", Category::Place),
    ]
}

fn short_config() -> pseudonymize::RedactConfig {
    let mut config = test_config(25);
    config.chunking.lookback_chars = 24;
    config
}

fn completed(result: pseudonymize::Result<RunOutcome>) -> RunSummary {
    match result {
        Ok(RunOutcome::Completed(summary)) => summary,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_run_writes_all_artifacts() {
    let fixture = TestFixture::new();
    let input = fixture.create_input("story.txt", STORY);
    let output_dir = fixture.output_dir("out");

    let detector = ScriptedDetector::story();
    let orchestrator = Orchestrator::new(test_config(2_000), detector.clone()).unwrap();
    let summary = completed(orchestrator.run(&RunRequest::new(&input).output_dir(&output_dir)).await);

    assert_eq!(summary.total_chunks, 1);
    assert_eq!(detector.calls(), 1);
    assert_eq!(summary.terms_registered, 7);
    assert!(summary.failed_chunks.is_empty());

    let paths = &summary.paths;
    assert_eq!(read(paths.redacted()), STORY_REDACTED);
    assert!(!paths.partial_redacted().exists());
    assert!(paths.progress().exists());
    assert!(paths.detailed_report().exists());
    assert!(!paths.failed_chunks_summary().exists());

    let mapping = read_mapping(&paths.mapping()).await.unwrap().unwrap();
    assert_eq!(mapping["names"]["Tom"], "[Name1]");
    assert_eq!(mapping["names"]["Mary Jane"], "[Name2]");
    assert_eq!(mapping["names"]["Mary"], "[Name3]");
    assert_eq!(mapping["names"]["Dr. Lee"], "[Name4]");
    assert_eq!(mapping["places"]["Elm Park"], "[Place1]");
    assert_eq!(mapping["contacts"]["555-0100"], "[Contact1]");
    assert_eq!(mapping["businesses"]["ACME Corp"], "[Business1]");
    assert!(mapping["dates"].is_empty());
}

#[tokio::test]
async fn test_statistics_count_every_replacement() {
    let fixture = TestFixture::new();
    let input = fixture.create_input("story.txt", STORY);

    let summary = completed(pseudonymize_file(test_config(2_000), ScriptedDetector::story(), &input).await);

    assert_eq!(summary.paths.output_dir(), fixture.root_path.join("pseudonymized_output"));
    let stats = &summary.statistics;
    assert_eq!(stats.count_for(&Term::new("Tom", Category::Name)), Some(4));
    assert_eq!(stats.count_for(&Term::new("Mary Jane", Category::Name)), Some(4));
    assert_eq!(stats.count_for(&Term::new("Mary", Category::Name)), Some(2));
    assert_eq!(stats.count_for(&Term::new("Dr. Lee", Category::Name)), Some(3));
    assert_eq!(stats.count_for(&Term::new("Elm Park", Category::Place)), Some(3));
    assert_eq!(stats.count_for(&Term::new("ACME Corp", Category::Business)), Some(2));
    assert_eq!(stats.count_for(&Term::new("555-0100", Category::Contact)), Some(1));
    assert_eq!(summary.total_replacements(), 19);

    let report = read(summary.paths.stats());
    assert!(report.starts_with("Replacement Statistics:\n"));
    assert!(report.contains("\nNAMES:\n"));
    assert!(report.contains("Tom -> [Name1]: 4 replacements\n"));
    assert!(!report.contains("NOT FOUND"));
}

#[tokio::test]
async fn test_failed_chunk_does_not_abort_run() {
    let fixture = TestFixture::new();
    let input = fixture.create_input("short.txt", SHORT_TEXT);
    let output_dir = fixture.output_dir("out");

    let detector = ScriptedDetector::new(short_terms()).failing_on("ACME");
    let orchestrator = Orchestrator::new(short_config(), detector.clone()).unwrap();
    let summary = completed(orchestrator.run(&RunRequest::new(&input).output_dir(&output_dir)).await);

    assert_eq!(summary.total_chunks, 4);
    // The failing chunk is retried once under the test retry policy
    assert_eq!(detector.calls(), 5);
    assert_eq!(summary.failed_chunks.len(), 1);
    assert_eq!(summary.failed_chunks[0].index, 2);

    // Terms found elsewhere are still replaced inside the failed chunk
    assert_eq!(
        read(summary.paths.redacted()),
        "[Name1] lives here. [Name2] visits [Name1]. ACME Corp pays [Name1]. [Place1] is green."
    );

    let error_log = read(summary.paths.chunk_error_log(2));
    assert!(error_log.starts_with("CHUNK: 3\nERROR: "));
    assert!(error_log.contains("service unavailable"));
    assert!(error_log.contains("CHUNK CONTENT:\n ACME Corp pays Tom."));

    let failed_summary = read(summary.paths.failed_chunks_summary());
    assert!(failed_summary.starts_with("Total failed chunks: 1\n\n"));
    assert!(failed_summary.contains("Chunk 3:  ACME Corp pays Tom....\nError: "));
}

#[tokio::test]
async fn test_malformed_response_is_logged_with_raw_text() {
    let fixture = TestFixture::new();
    let input = fixture.create_input("short.txt", SHORT_TEXT);

    let detector = ScriptedDetector::new(short_terms()).malformed_on("Mary Jane");
    let orchestrator = Orchestrator::new(short_config(), detector.clone()).unwrap();
    let summary = completed(orchestrator.run(&RunRequest::new(&input)).await);

    // Malformed output is not retried
    assert_eq!(detector.calls(), 4);
    assert_eq!(summary.failed_chunks.len(), 1);
    assert_eq!(summary.failed_chunks[0].index, 1);

    let error_log = read(summary.paths.chunk_error_log(1));
    assert!(error_log.contains("RAW RESPONSE:\nI cannot help with that."));
    assert!(read(summary.paths.redacted()).contains("Mary Jane visits [Name1]."));
}

#[tokio::test]
async fn test_schema_deviation_writes_structure_log() {
    let fixture = TestFixture::new();
    let input = fixture.create_input("short.txt", SHORT_TEXT);

    let mut config = short_config();
    config
        .schema
        .categories
        .insert("relationships".to_string(), vec!["family".to_string()]);
    let orchestrator = Orchestrator::new(config, ScriptedDetector::new(short_terms())).unwrap();
    let summary = completed(orchestrator.run(&RunRequest::new(&input)).await);

    // Deviations are warnings, terms are still used
    assert!(summary.failed_chunks.is_empty());
    assert_eq!(summary.terms_registered, 4);

    let log = read(summary.paths.structure_log(0));
    assert!(log.starts_with("CHUNK: 1\n\nSTRUCTURE ISSUES:\n"));
    assert!(log.contains("- Missing category: relationships\n"));
    assert!(log.contains("\nRAW RESPONSE:\n{"));
}

#[tokio::test]
async fn test_seed_mapping_reuses_pseudonyms() {
    let fixture = TestFixture::new();
    let input = fixture.create_input("story.txt", STORY);
    let seed_path = fixture.root_path.join("earlier_mapping.json");

    let mut mapping = PseudonymMapping::new();
    mapping.insert(
        "names".to_string(),
        BTreeMap::from([("Tom".to_string(), "[Name9]".to_string())]),
    );
    mapping.insert(
        "places".to_string(),
        BTreeMap::from([("Oslo".to_string(), "[Place7]".to_string())]),
    );
    write_mapping(&seed_path, &mapping).await.unwrap();

    let orchestrator = Orchestrator::new(test_config(2_000), ScriptedDetector::story()).unwrap();
    let request = RunRequest::new(&input).seed_mapping(&seed_path);
    let summary = completed(orchestrator.run(&request).await);

    let redacted = read(summary.paths.redacted());
    assert!(redacted.starts_with("[Name9] met [Name10] at the [Place8] gate."));
    assert_eq!(summary.terms_registered, 8);
    assert_eq!(summary.terms_discovered, 7);

    let stats = read(summary.paths.stats());
    assert!(stats.contains("Oslo -> [Place7]: NOT FOUND\n"));

    let report = read(summary.paths.detailed_report());
    assert!(report.contains("Reused Substitutions:\n------------------\nOslo -> [Place7] (places)\nTom -> [Name9] (names)\n"));
    assert!(report.contains("Reused substitutions: 2\n"));
    assert!(report.contains("New substitutions: 6\n"));
}

#[tokio::test]
async fn test_missing_seed_mapping_is_an_error() {
    let fixture = TestFixture::new();
    let input = fixture.create_input("story.txt", STORY);

    let orchestrator = Orchestrator::new(test_config(2_000), ScriptedDetector::story()).unwrap();
    let request = RunRequest::new(&input).seed_mapping(fixture.root_path.join("missing.json"));
    let err = orchestrator.run(&request).await.unwrap_err();
    assert!(matches!(err, RedactError::Input { .. }));
}

#[tokio::test]
async fn test_offline_run_from_mapping() {
    let fixture = TestFixture::new();
    let first_input = fixture.create_input("first.txt", STORY);
    let first = completed(pseudonymize_file(test_config(2_000), ScriptedDetector::story(), &first_input).await);
    let mapping = read_mapping(&first.paths.mapping()).await.unwrap().unwrap();

    // A second document redacted with only the known terms
    let second_input = fixture.create_input("second.txt", "Mary Jane wrote to Tom from Elm Park.");
    let offline = KnownTermsDetector::from_mapping(&mapping);
    let summary = completed(
        Orchestrator::new(test_config(2_000), offline)
            .unwrap()
            .run(&RunRequest::new(&second_input).seed_mapping(first.paths.mapping()))
            .await,
    );

    assert_eq!(read(summary.paths.redacted()), "[Name2] wrote to [Name1] from [Place1].");
    let second_mapping = read_mapping(&summary.paths.mapping()).await.unwrap().unwrap();
    assert_eq!(second_mapping, mapping);
}

#[tokio::test]
async fn test_ignored_terms_are_never_registered() {
    let fixture = TestFixture::new();
    let input = fixture.create_input("short.txt", SHORT_TEXT);

    let mut config = short_config();
    config.ignored_terms = vec!["elm park".to_string()];
    let summary = completed(
        Orchestrator::new(config, ScriptedDetector::new(short_terms()))
            .unwrap()
            .run(&RunRequest::new(&input))
            .await,
    );

    assert_eq!(summary.terms_registered, 3);
    assert!(read(summary.paths.redacted()).ends_with("Elm Park is green."));
}

#[tokio::test]
async fn test_mmap_and_buffered_runs_agree() {
    let fixture = TestFixture::new();
    let input = fixture.create_input("story.txt", STORY);

    let buffered = completed(
        Orchestrator::new(test_config(60), ScriptedDetector::story())
            .unwrap()
            .run(&RunRequest::new(&input).output_dir(fixture.output_dir("buffered")))
            .await,
    );

    let mut config = test_config(60);
    config.use_mmap = true;
    let mapped = completed(
        Orchestrator::new(config, ScriptedDetector::story())
            .unwrap()
            .run(&RunRequest::new(&input).output_dir(fixture.output_dir("mapped")))
            .await,
    );

    assert!(buffered.total_chunks > 1);
    assert_eq!(read(buffered.paths.redacted()), read(mapped.paths.redacted()));
    assert_eq!(read(buffered.paths.mapping()), read(mapped.paths.mapping()));
}

#[tokio::test]
async fn test_empty_document_completes() {
    let fixture = TestFixture::new();
    let input = fixture.create_input("empty.txt", "");

    let detector = ScriptedDetector::story();
    let summary = completed(pseudonymize_file(test_config(100), detector.clone(), &input).await);

    assert_eq!(summary.total_chunks, 0);
    assert_eq!(detector.calls(), 0);
    assert_eq!(read(summary.paths.redacted()), "");
}
