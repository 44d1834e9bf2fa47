use super::*;
use tempfile::TempDir;

fn chunk(id: &str, file: &str, text: &str) -> (String, String, String) {
    (id.to_string(), file.to_string(), text.to_string())
}

fn seeded() -> BM25Search {
    let index = BM25Search::in_memory();
    index
        .add_chunks(vec![
            chunk("c1", "policy", "Vacation policy: employees get twenty vacation days."),
            chunk("c2", "mission", "Our mission is to serve customers."),
            chunk("c3", "handbook", "The handbook covers dress code and parking policy."),
        ])
        .unwrap();
    index
}

#[test]
fn test_token_coverage() {
    let query: HashSet<String> = tokenize("vacation policy").collect();
    assert_eq!(token_coverage(&query, "Vacation policy details"), 1.0);
    assert_eq!(token_coverage(&query, "parking policy"), 0.5);
    assert_eq!(token_coverage(&query, "unrelated"), 0.0);
    assert_eq!(token_coverage(&HashSet::new(), "anything"), 0.0);
}

#[test]
fn test_search_ranks_by_coverage() {
    let index = seeded();
    let hits = index.search("What is the vacation policy?", 10).unwrap();

    assert_eq!(hits[0].chunk_id, "c1");
    assert_eq!(hits[0].score, 1.0);
    assert_eq!(hits[1].chunk_id, "c3");
    assert_eq!(hits[1].score, 0.5);
    assert!(hits.iter().all(|h| h.chunk_id != "c2"));
}

#[test]
fn test_search_respects_limit() {
    let index = seeded();
    assert_eq!(index.search("policy", 1).unwrap().len(), 1);
    assert!(index.search("policy", 0).unwrap().is_empty());
}

#[test]
fn test_stopword_only_query_has_no_hits() {
    let index = seeded();
    assert!(index.search("what is the", 10).unwrap().is_empty());
}

#[test]
fn test_delete_file() {
    let index = seeded();
    index.delete_file("policy").unwrap();

    let hits = index.search("vacation policy", 10).unwrap();
    assert!(hits.iter().all(|h| h.file_id != "policy"));
    assert_eq!(index.num_docs().unwrap(), 2);
}

#[test]
fn test_clear() {
    let index = seeded();
    index.clear().unwrap();
    assert_eq!(index.num_docs().unwrap(), 0);
}

#[test]
fn test_on_disk_index_reopens() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bm25");
    {
        let index = BM25Search::new(&path).unwrap();
        index
            .add_chunks(vec![chunk("c1", "f1", "persistent keyword data")])
            .unwrap();
    }

    let reopened = BM25Search::new(&path).unwrap();
    let hits = reopened.search("keyword", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "c1");
}

#[test]
fn test_registry_isolates_tenants() {
    let registry = KeywordIndexes::new(None);
    let acme = TenantId::parse("acme").unwrap();
    let globex = TenantId::parse("globex").unwrap();

    registry
        .for_tenant(&acme)
        .unwrap()
        .add_chunks(vec![chunk("a1", "fa", "acme vacation policy")])
        .unwrap();

    assert!(
        registry
            .for_tenant(&globex)
            .unwrap()
            .search("vacation", 10)
            .unwrap()
            .is_empty()
    );
    assert!(Arc::ptr_eq(
        &registry.for_tenant(&acme).unwrap(),
        &registry.for_tenant(&acme).unwrap()
    ));
}

#[test]
fn test_registry_drop_tenant_removes_directory() {
    let temp_dir = TempDir::new().unwrap();
    let registry = KeywordIndexes::new(Some(temp_dir.path().to_path_buf()));
    let acme = TenantId::parse("acme").unwrap();

    registry
        .for_tenant(&acme)
        .unwrap()
        .add_chunks(vec![chunk("a1", "fa", "some words")])
        .unwrap();
    assert!(temp_dir.path().join("acme").join("bm25").exists());

    registry.drop_tenant(&acme).unwrap();
    assert!(!temp_dir.path().join("acme").join("bm25").exists());
    assert_eq!(
        registry.for_tenant(&acme).unwrap().num_docs().unwrap(),
        0
    );
}
