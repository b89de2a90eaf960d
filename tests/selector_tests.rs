use anyhow::{anyhow, Result};
use keralacare::selector::{
    resolve, DirShardSource, HttpShardSource, OrgSelector, ShardResponse, ShardSource, ShardState,
};
use keralacare::CacheEntry;
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::sync::Mutex;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GRID_URL: &str = "https://grid.keralacare.example";

fn entry(id: &str, has_children: bool) -> CacheEntry {
    CacheEntry {
        id: id.to_string(),
        name: format!("Org {}", id),
        has_children,
        org_type: Some("district".to_string()),
        children_type: None,
    }
}

/// In-memory shards that remember which ones were asked for.
struct RecordingSource {
    shards: HashMap<String, Vec<CacheEntry>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingSource {
    fn new(shards: Vec<(&str, Vec<CacheEntry>)>) -> Self {
        Self {
            shards: shards
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ShardSource for RecordingSource {
    fn fetch(&self, shard: &str) -> impl Future<Output = Result<Vec<CacheEntry>>> + Send {
        self.calls.lock().unwrap().push(shard.to_string());
        let result = self
            .shards
            .get(shard)
            .cloned()
            .ok_or_else(|| anyhow!("404 {}", shard));
        async move { result }
    }
}

fn hierarchy() -> RecordingSource {
    RecordingSource::new(vec![
        ("index", vec![entry("A", true), entry("B", false)]),
        ("A", vec![entry("C", false)]),
    ])
}

#[tokio::test]
async fn test_selecting_parent_fetches_its_shard() {
    let source = hierarchy();
    let (mut selector, request) = OrgSelector::new(GRID_URL);
    assert_eq!(request.shard, "index");
    assert!(selector.load(&source, request).await);

    let next = selector.select(entry("A", true)).expect("A has children");
    assert_eq!(next.shard, "A");
    assert_eq!(selector.path().len(), 1);
    assert!(!selector.is_open());

    selector.load(&source, next).await;
    assert_eq!(source.calls(), vec!["index", "A"]);
    assert_eq!(
        selector.candidates(),
        &ShardState::Loaded(vec![entry("C", false)])
    );
}

#[tokio::test]
async fn test_selecting_leaf_issues_no_fetch() {
    let source = hierarchy();
    let (mut selector, request) = OrgSelector::new(GRID_URL);
    selector.load(&source, request).await;

    assert!(selector.select(entry("B", false)).is_none());
    assert_eq!(selector.path()[0].id, "B");
    assert!(!selector.accepts_more());
    assert_eq!(source.calls(), vec!["index"]);
    assert_eq!(
        selector.continue_url().as_deref(),
        Some("https://grid.keralacare.example/facilities?organization=B")
    );
}

#[tokio::test]
async fn test_edit_truncates_path_and_reopens() {
    let source = hierarchy();
    let (mut selector, request) = OrgSelector::new(GRID_URL);
    selector.load(&source, request).await;
    let next = selector.select(entry("A", true)).unwrap();
    selector.load(&source, next).await;
    selector.select(entry("C", false));
    assert_eq!(selector.path().len(), 2);

    let request = selector.edit(1, "Or");
    assert_eq!(selector.path().len(), 1);
    assert_eq!(selector.path()[0].id, "A");
    assert!(selector.is_open());
    assert_eq!(selector.search(), "Or");
    assert_eq!(request.shard, "A");

    let request = selector.edit(0, "Org B");
    assert!(selector.path().is_empty());
    assert_eq!(request.shard, "index");
    assert!(selector.continue_url().is_none());

    selector.load(&source, request).await;
    let visible: Vec<&str> = selector
        .visible_candidates()
        .into_iter()
        .map(|o| o.id.as_str())
        .collect();
    assert_eq!(visible, vec!["B"]);
}

#[test]
fn test_stale_response_is_dropped() {
    let (mut selector, first) = OrgSelector::new(GRID_URL);
    let second = selector.edit(0, "");

    let applied = selector.apply(ShardResponse {
        request_id: second.id,
        result: Ok(vec![entry("fresh", false)]),
    });
    assert!(applied);

    let applied = selector.apply(ShardResponse {
        request_id: first.id,
        result: Ok(vec![entry("stale", false)]),
    });
    assert!(!applied);
    assert_eq!(
        selector.candidates(),
        &ShardState::Loaded(vec![entry("fresh", false)])
    );
}

#[tokio::test]
async fn test_missing_shard_is_failed_not_empty() {
    let source = RecordingSource::new(vec![]);
    let (mut selector, request) = OrgSelector::new(GRID_URL);
    assert_eq!(selector.candidates(), &ShardState::Loading);

    selector.load(&source, request).await;

    assert!(matches!(selector.candidates(), ShardState::Failed(e) if e.contains("404")));
    assert!(selector.visible_candidates().is_empty());
}

#[tokio::test]
async fn test_resolve_from_directory() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("index.json"),
        r#"[{"id":"d1","name":"Ernakulam","has_children":true,"type":"district","children_type":"local_body"}]"#,
    )
    .unwrap();
    fs::write(
        temp_dir.path().join("d1.json"),
        r#"[{"id":"lb-7","name":"Kochi Corporation","has_children":false,"type":"local_body"}]"#,
    )
    .unwrap();

    let source = DirShardSource::new(temp_dir.path());
    let names = vec!["ernakulam".to_string(), "Kochi Corporation".to_string()];
    let url = assert_ok!(resolve(&source, GRID_URL, &names).await);
    assert_eq!(
        url,
        "https://grid.keralacare.example/facilities?organization=lb-7"
    );

    let too_deep = vec![
        "Ernakulam".to_string(),
        "Kochi Corporation".to_string(),
        "Ward 1".to_string(),
    ];
    assert_err!(resolve(&source, GRID_URL, &too_deep).await);

    let unknown = vec!["Wayanad".to_string()];
    assert_err!(resolve(&source, GRID_URL, &unknown).await);
}

#[tokio::test]
async fn test_resolve_over_http() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/organizations/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": "d2", "name": "Kollam", "has_children": false, "type": "district"}
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = HttpShardSource::new(&mock_server.uri(), 5).unwrap();
    let url = resolve(&source, GRID_URL, &["Kollam".to_string()])
        .await
        .unwrap();
    assert!(url.ends_with("organization=d2"));
}

#[tokio::test]
async fn test_http_source_surfaces_missing_shard() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/organizations/index.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let source = HttpShardSource::new(&mock_server.uri(), 5).unwrap();
    let (mut selector, request) = OrgSelector::new(GRID_URL);
    selector.load(&source, request).await;

    assert!(matches!(selector.candidates(), ShardState::Failed(_)));
}

#[tokio::test]
async fn test_directory_source_rejects_path_like_shards() {
    let temp_dir = TempDir::new().unwrap();
    let shard_dir = temp_dir.path().join("organizations");
    fs::create_dir_all(&shard_dir).unwrap();
    fs::write(temp_dir.path().join("secret.json"), "[]").unwrap();

    let source = DirShardSource::new(&shard_dir);
    assert_err!(source.fetch("../secret").await);
    assert_err!(source.fetch("..").await);

    let (mut selector, _) = OrgSelector::new(GRID_URL);
    let request = selector.select(entry("../secret", true)).unwrap();
    selector.load(&source, request).await;
    assert!(matches!(selector.candidates(), ShardState::Failed(_)));
}
