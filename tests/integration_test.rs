//! End-to-end tests over a real store: restricted visibility, backup
//! semantics, corpus materialization, and the worker protocol. Nothing
//! here shells out to the external toolkit.

use oldb::core::types::Role;
use oldb::model::{CorpusWrite, FormWrite, Translation};
use oldb::store::{HistoryKey, Paginator};
use oldb::{OldbError, Settings, Store, WorkerPool};

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempfile::TempDir::new().unwrap();
    let settings = Settings::for_root(tmp.path());
    let store = Store::open(&settings).unwrap();
    (tmp, store)
}

fn form_write(transcription: &str) -> FormWrite {
    FormWrite {
        transcription: transcription.to_string(),
        translations: vec![Translation {
            id: 0,
            transcription: format!("{} (tr)", transcription),
            grammaticality: String::new(),
        }],
        ..Default::default()
    }
}

fn sentential_form(transcription: &str) -> FormWrite {
    FormWrite {
        syntax: "(S (NP (N foo)) (VP (V bar)))".to_string(),
        ..form_write(transcription)
    }
}

#[test]
fn restricted_resources_are_invisible_and_unwritable() {
    let (_tmp, mut store) = test_store();
    let admin = store.create_user("admin", Role::Administrator).unwrap();
    let viewer = store.create_user("viewer", Role::Viewer).unwrap();
    let restricted = store.get_or_create_tag("restricted").unwrap();

    let mut secret = form_write("secret");
    secret.tags = vec![restricted.id];
    let secret = store.create_form(&admin, secret).unwrap();
    store.create_form(&admin, form_write("public")).unwrap();

    // Read paths filter.
    let page = store.index_forms(&viewer, &Paginator::default()).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].transcription, "public");

    // Direct reads are 403 and leave the resource unchanged.
    let before = store.get_form_raw(secret.id).unwrap();
    let err = store.get_form(&viewer, secret.id).unwrap_err();
    assert_eq!(err.status_code(), 403);

    // Mutations against the restricted resource also fail with 403.
    let err = store
        .update_form(&viewer, secret.id, form_write("defaced"))
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
    let err = store.delete_form(&viewer, secret.id).unwrap_err();
    assert_eq!(err.status_code(), 403);
    let after = store.get_form_raw(secret.id).unwrap();
    assert_eq!(before.transcription, after.transcription);
    assert_eq!(before.datetime_modified, after.datetime_modified);

    // Unrestricted-set membership opens the gate without a role change.
    let mut settings = store.app_settings().unwrap();
    settings.unrestricted_users = vec![viewer.id];
    store.save_app_settings(&settings).unwrap();
    assert!(store.get_form(&viewer, secret.id).is_ok());
}

#[test]
fn every_accepted_mutation_writes_exactly_one_backup() {
    let (_tmp, mut store) = test_store();
    let user = store.create_user("ann", Role::Contributor).unwrap();
    let form = store.create_form(&user, form_write("v0")).unwrap();

    // A rejected (vacuous) update writes no backup.
    assert!(matches!(
        store.update_form(&user, form.id, form_write("v0")),
        Err(OldbError::NotNew)
    ));
    let history = store.form_history(&HistoryKey::Id(form.id)).unwrap();
    assert!(history.previous_versions.is_empty());

    store.update_form(&user, form.id, form_write("v1")).unwrap();
    let history = store.form_history(&HistoryKey::Id(form.id)).unwrap();
    assert_eq!(history.previous_versions.len(), 1);

    store.update_form(&user, form.id, form_write("v2")).unwrap();
    store.delete_form(&user, form.id).unwrap();
    let history = store.form_history(&HistoryKey::Uuid(form.uuid.clone())).unwrap();
    assert_eq!(history.previous_versions.len(), 3);

    // Snapshots are ordered newest-first and datetimes never decrease
    // across the history.
    let datetimes: Vec<_> = history
        .previous_versions
        .iter()
        .map(|b| b.datetime_modified)
        .collect();
    let mut sorted = datetimes.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(datetimes, sorted);
}

#[test]
fn history_after_delete_by_uuid_is_newest_first() {
    // Create, update twice, delete; history by UUID returns null plus
    // three snapshots, newest first.
    let (_tmp, mut store) = test_store();
    let user = store.create_user("ann", Role::Contributor).unwrap();
    let form = store.create_form(&user, form_write("v0")).unwrap();
    store.update_form(&user, form.id, form_write("v1")).unwrap();
    store.update_form(&user, form.id, form_write("v2")).unwrap();
    store.delete_form(&user, form.id).unwrap();

    let history = store.form_history(&HistoryKey::Uuid(form.uuid.clone())).unwrap();
    assert!(history.resource.is_none());
    let transcriptions: Vec<_> = history
        .previous_versions
        .iter()
        .map(|b| b.snapshot["transcription"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(transcriptions, vec!["v2", "v1", "v0"]);
}

#[test]
fn backup_rows_are_read_only() {
    // The API layer maps any write against a backup collection to the
    // read-only error; the store-side contract is the error itself.
    let err = OldbError::ReadOnlyResource;
    assert_eq!(err.status_code(), 404);
    assert_eq!(err.json_body()["error"], "This resource is read-only.");
}

#[test]
fn corpus_membership_tracks_its_source() {
    let (_tmp, mut store) = test_store();
    let user = store.create_user("ann", Role::Contributor).unwrap();
    let a = store.create_form(&user, form_write("chien")).unwrap();
    let b = store.create_form(&user, form_write("chienne")).unwrap();
    let c = store.create_form(&user, form_write("chat")).unwrap();

    // Explicit content membership.
    let corpus = store
        .create_corpus(
            &user,
            CorpusWrite {
                name: "by-content".to_string(),
                content: format!("{},{}", c.id, a.id),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(corpus.forms, vec![c.id, a.id]);

    // Search membership: recomputed on save from the saved query.
    let search = store
        .create_form_search(
            &user,
            "chien-initial",
            &serde_json::json!({"filter": ["Form", "transcription", "like", "chien%"]}),
            "",
        )
        .unwrap();
    let corpus = store
        .update_corpus(
            &user,
            corpus.id,
            CorpusWrite {
                name: "by-search".to_string(),
                form_search_id: Some(search.id),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(corpus.forms, vec![a.id, b.id]);
}

#[test]
fn treebank_writetofile_round_trip() {
    let (_tmp, mut store) = test_store();
    let user = store.create_user("ann", Role::Contributor).unwrap();
    let mut ids = Vec::new();
    for i in 0..10 {
        ids.push(
            store
                .create_form(&user, sentential_form(&format!("sentence {}", i)))
                .unwrap()
                .id,
        );
    }
    let search = store
        .create_form_search(
            &user,
            "sentences",
            &serde_json::json!({"filter": ["Form", "syntax", "like", "(S %"]}),
            "",
        )
        .unwrap();
    let corpus = store
        .create_corpus(
            &user,
            CorpusWrite {
                name: "treebank".to_string(),
                form_search_id: Some(search.id),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(corpus.forms.len(), 10);

    let records = store
        .write_corpus_to_file(&user, corpus.id, "treebank")
        .unwrap();
    let gz = records.iter().find(|r| r.filename.ends_with(".gz")).unwrap();
    let (path, media_type) = store.serve_corpus_file(&user, corpus.id, gz.id).unwrap();
    assert_eq!(media_type, "application/x-gzip");

    use std::io::Read;
    let mut decoded = String::new();
    flate2::read::GzDecoder::new(std::fs::File::open(path).unwrap())
        .read_to_string(&mut decoded)
        .unwrap();
    let lines: Vec<&str> = decoded.lines().collect();
    assert_eq!(lines.len(), 10);
    for (line, id) in lines.iter().zip(&ids) {
        assert_eq!(
            *line,
            format!("(TOP-{} (S (NP (N foo)) (VP (V bar))))", id)
        );
    }
}

#[test]
fn search_compiles_and_is_idempotent_under_boolean_wrapping() {
    let (_tmp, mut store) = test_store();
    let user = store.create_user("ann", Role::Contributor).unwrap();
    store.create_form(&user, form_write("chiens")).unwrap();
    store.create_form(&user, form_write("chats")).unwrap();

    let plain = serde_json::json!({"filter": ["Form", "transcription", "like", "chien%"]});
    let anded = serde_json::json!({"filter": ["and", [["Form", "transcription", "like", "chien%"]]]});
    let ored = serde_json::json!({"filter": ["or", [["Form", "transcription", "like", "chien%"]]]});

    let baseline: Vec<i64> = store
        .search_forms(&user, &plain, &Paginator::default())
        .unwrap()
        .items
        .iter()
        .map(|f| f.id)
        .collect();
    for query in [anded, ored] {
        let ids: Vec<i64> = store
            .search_forms(&user, &query, &Paginator::default())
            .unwrap()
            .items
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, baseline);
    }
    assert_eq!(baseline.len(), 1);
}

#[test]
fn search_errors_surface_the_full_map() {
    let (_tmp, mut store) = test_store();
    let user = store.create_user("ann", Role::Contributor).unwrap();
    let query = serde_json::json!({"filter": ["and", [
        ["Form", "colour", "=", "red"],
        ["Source", "author", "like", "%x%"],
    ]]});
    let err = store
        .search_forms(&user, &query, &Paginator::default())
        .unwrap_err();
    match err {
        OldbError::SearchParse(parse) => {
            assert!(parse.errors.contains_key("Form.colour"));
            assert!(parse.errors.contains_key("Source"));
        }
        other => panic!("expected SearchParse, got {:?}", other),
    }
}

#[test]
fn at_most_one_pending_build_per_resource() {
    let tmp = tempfile::TempDir::new().unwrap();
    let settings = Settings::for_root(tmp.path());
    let mut store = Store::open(&settings).unwrap();
    let admin = store.create_user("admin", Role::Administrator).unwrap();
    let corpus = store
        .create_corpus(&admin, CorpusWrite { name: "c".to_string(), ..Default::default() })
        .unwrap();
    let lm = store
        .create_lm(
            &admin,
            oldb::lm::LmWrite { name: "lm".to_string(), corpus_id: corpus.id, ..Default::default() },
        )
        .unwrap();

    let pool = WorkerPool::start(settings);
    let first = pool.enqueue_generate_lm(&mut store, &admin, lm.id).unwrap();
    let second = pool.enqueue_generate_lm(&mut store, &admin, lm.id).unwrap();
    assert_ne!(first, second);
    // The last-enqueued nonce is the one on the resource; the first
    // build's results, whenever they land, are not current.
    assert_eq!(store.get_lm(lm.id).unwrap().generate_attempt, second);
    pool.shutdown();
    assert_eq!(store.get_lm(lm.id).unwrap().generate_attempt, second);
}

#[test]
fn readonly_mode_rejects_every_mutation() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut settings = Settings::for_root(tmp.path());
    // Seed a user while writable.
    let user = {
        let mut store = Store::open(&settings).unwrap();
        store.create_user("ann", Role::Contributor).unwrap()
    };
    settings.readonly = true;
    let mut store = Store::open(&settings).unwrap();

    let err = store.create_form(&user, form_write("x")).unwrap_err();
    assert_eq!(err.status_code(), 403);
    assert!(err.to_string().contains("read-only mode"));
    let err = store
        .create_corpus(&user, CorpusWrite { name: "c".to_string(), ..Default::default() })
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}
