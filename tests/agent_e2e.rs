//! End-to-end agent runs over real filesystem drivers.

use std::path::Path;

use creel::{Agent, FetchOptions, PredicateType, Query, ResourceDescriptor};

const STATEMENT: &str = r#"{"_type":"https://in-toto.io/Statement/v1","subject":[{"name":"artifact.tgz","digest":{"sha256":"8c61b87a505474105dd251fe05ab43c8278675f4667bde245ad89992b926f8f9","sha1":"e67eddfacbd2e8eefec191410bcce469079bc186"}}],"predicateType":"https://slsa.dev/provenance/v0.2","predicate":{"builder":{"id":"https://github.com/actions/runner"},"buildType":"https://example.com/build@v1"}}"#;

fn write_attestation(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), STATEMENT).unwrap();
}

#[tokio::test]
async fn two_fs_drivers_merge_their_envelopes() -> anyhow::Result<()> {
    let dir_a = tempfile::tempdir()?;
    let dir_b = tempfile::tempdir()?;
    write_attestation(dir_a.path(), "one.json");
    write_attestation(dir_b.path(), "two.json");

    let mut agent = Agent::new();
    agent.add_repository_from_string(&format!("fs:{}", dir_a.path().display()))?;
    agent.add_repository_from_string(&format!("fs:{}", dir_b.path().display()))?;

    let envelopes = agent.fetch(&FetchOptions::default()).await?;
    assert_eq!(envelopes.len(), 2);
    Ok(())
}

#[tokio::test]
async fn driver_failure_fails_the_whole_fetch() {
    let dir = tempfile::tempdir().unwrap();
    write_attestation(dir.path(), "good.json");

    let broken = tempfile::tempdir().unwrap();
    std::fs::write(broken.path().join("bad.json"), "not json").unwrap();

    let mut agent = Agent::new();
    agent
        .add_repository_from_string(&format!("fs:{}", dir.path().display()))
        .unwrap();
    agent
        .add_repository_from_string(&format!("fs:{}", broken.path().display()))
        .unwrap();

    assert!(agent.fetch(&FetchOptions::default()).await.is_err());
}

#[tokio::test]
async fn subject_query_requires_all_overlapping_algorithms() {
    let dir = tempfile::tempdir().unwrap();
    write_attestation(dir.path(), "att.json");

    let mut agent = Agent::new();
    agent
        .add_repository_from_string(&format!("fs:{}", dir.path().display()))
        .unwrap();

    // sha256 matches and the filter carries no sha1: hit.
    let sha256_only = ResourceDescriptor::new().with_digest(
        "sha256",
        "8c61b87a505474105dd251fe05ab43c8278675f4667bde245ad89992b926f8f9",
    );
    let hits = agent
        .fetch_by_subject(&FetchOptions::default(), std::slice::from_ref(&sha256_only))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    // Same sha256 but a mismatching sha1: every overlapping algorithm
    // must agree, so no hit.
    let with_wrong_sha1 = ResourceDescriptor::new()
        .with_digest(
            "sha256",
            "8c61b87a505474105dd251fe05ab43c8278675f4667bde245ad89992b926f8f9",
        )
        .with_digest("sha1", "0000000000000000000000000000000000000000");
    let misses = agent
        .fetch_by_subject(&FetchOptions::default(), &[with_wrong_sha1])
        .await
        .unwrap();
    assert!(misses.is_empty());
}

#[tokio::test]
async fn predicate_type_query_and_limit() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.json", "b.json", "c.json"] {
        write_attestation(dir.path(), name);
    }

    let mut agent = Agent::new();
    agent
        .add_repository_from_string(&format!("fs:{}", dir.path().display()))
        .unwrap();

    let types: Vec<PredicateType> = vec!["https://slsa.dev/provenance/v0.2".into()];
    let all = agent
        .fetch_by_predicate_type(&FetchOptions::default(), &types)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);

    let limited = agent
        .fetch_by_predicate_type(&FetchOptions::default().with_limit(2), &types)
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);

    let none = agent
        .fetch_by_predicate_type(&FetchOptions::default(), &["https://other/type".into()])
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn queries_are_idempotent_over_their_own_output() {
    let dir = tempfile::tempdir().unwrap();
    write_attestation(dir.path(), "att.json");

    let mut agent = Agent::new();
    agent
        .add_repository_from_string(&format!("fs:{}", dir.path().display()))
        .unwrap();

    let query = Query::new().with_limit(1);
    let opts = FetchOptions::default().with_query(query.clone());
    let first = agent.fetch(&opts).await.unwrap();
    let second = query.run(first.clone());
    assert_eq!(first.len(), second.len());
}

#[tokio::test]
async fn unknown_repository_tag_is_rejected() {
    let mut agent = Agent::new();
    let err = agent.add_repository_from_string("warp:foo").unwrap_err();
    assert!(err.to_string().contains("repository type unknown"));
}
