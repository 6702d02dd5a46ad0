//! The full derived-resource pipeline, exercised against a real foma
//! installation: compile a phonology through the worker queue and poll
//! for it, then compose phonology ⊕ morphology ⊕ LM into a parser and
//! let the LM break the tie between competing analyses.
//!
//! Every test bails out silently when foma/flookup are not on the PATH,
//! the same guard the endpoints apply.

use std::time::{Duration, Instant};

use oldb::core::types::Role;
use oldb::lm::NgramTrie;
use oldb::model::{CorpusWrite, FormWrite, Translation, User};
use oldb::morphology::MorphologyWrite;
use oldb::parser::CacheRegistry;
use oldb::phonology::PhonologyWrite;
use oldb::toolkit;
use oldb::{Settings, Store, WorkerPool};

const RARE: char = '\u{2980}';

fn test_store() -> (tempfile::TempDir, Settings, Store) {
    let tmp = tempfile::TempDir::new().unwrap();
    let settings = Settings::for_root(tmp.path());
    let store = Store::open(&settings).unwrap();
    (tmp, settings, store)
}

fn lexical_form(store: &mut Store, user: &User, shape: &str, gloss: &str, category: i64) -> i64 {
    store
        .create_form(
            user,
            FormWrite {
                transcription: shape.to_string(),
                morpheme_break: shape.to_string(),
                morpheme_gloss: gloss.to_string(),
                syntactic_category_id: Some(category),
                translations: vec![Translation {
                    id: 0,
                    transcription: gloss.to_string(),
                    grammaticality: String::new(),
                }],
                ..Default::default()
            },
        )
        .unwrap()
        .id
}

#[test]
fn phonology_compile_applydown_runtests() {
    if !toolkit::foma_installed() {
        return;
    }
    let (_tmp, settings, mut store) = test_store();
    let admin = store.create_user("admin", Role::Administrator).unwrap();
    let phonology = store
        .create_phonology(
            &admin,
            PhonologyWrite {
                name: "ab".to_string(),
                description: String::new(),
                script: "define phonology a -> b;\n#test aaa -> bbb\n".to_string(),
            },
        )
        .unwrap();

    // Enqueue and poll, the way a client does.
    let pool = WorkerPool::start(settings);
    let attempt = pool
        .enqueue_compile_phonology(&mut store, &admin, phonology.id)
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(60);
    let compiled = loop {
        let current = store.get_phonology(phonology.id).unwrap();
        if current.compile_attempt == attempt && !current.compile_message.is_empty() {
            break current;
        }
        assert!(Instant::now() < deadline, "compile did not finish in time");
        std::thread::sleep(Duration::from_millis(100));
    };
    pool.shutdown();
    assert!(compiled.compile_succeeded, "{}", compiled.compile_message);
    assert_eq!(
        compiled.compile_message,
        "Compilation process terminated successfully."
    );
    assert!(compiled.datetime_compiled.is_some());

    let outputs = store
        .phonology_applydown(phonology.id, &["aaa".to_string()])
        .unwrap();
    assert_eq!(outputs["aaa"], vec!["bbb".to_string()]);

    let tests = store.run_phonology_tests(phonology.id).unwrap();
    assert_eq!(tests["aaa"].expected, vec!["bbb".to_string()]);
    assert_eq!(tests["aaa"].actual, vec!["bbb".to_string()]);
}

#[test]
fn parser_ranks_candidates_with_the_lm() {
    if !toolkit::foma_installed() {
        return;
    }
    let (_tmp, _settings, mut store) = test_store();
    let admin = store.create_user("admin", Role::Administrator).unwrap();
    store.create_syntactic_category("N", "lexical").unwrap();
    store.create_syntactic_category("Num", "lexical").unwrap();

    // Lexicon: one noun, two competing glosses for the -s suffix.
    let mut ids = vec![
        lexical_form(&mut store, &admin, "chien", "dog", 1),
        lexical_form(&mut store, &admin, "s", "PL", 2),
        lexical_form(&mut store, &admin, "s", "DIM", 2),
    ];
    ids.sort();
    let lexicon_corpus = store
        .create_corpus(
            &admin,
            CorpusWrite {
                name: "lexicon".to_string(),
                content: ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(","),
                ..Default::default()
            },
        )
        .unwrap();

    // Phonology: delete the morpheme delimiter to reach the surface.
    let phonology = store
        .create_phonology(
            &admin,
            PhonologyWrite {
                name: "p".to_string(),
                description: String::new(),
                script: "define phonology \"-\" -> 0;\n".to_string(),
            },
        )
        .unwrap();
    let phonology = store
        .compile_phonology_now(phonology.id, admin.id, Duration::from_secs(30))
        .unwrap();
    assert!(phonology.compile_succeeded, "{}", phonology.compile_message);

    // Morphology: rich analyses upstairs, bare shapes downstairs.
    let morphology = store
        .create_morphology(
            &admin,
            MorphologyWrite {
                name: "m".to_string(),
                rules: "N-Num".to_string(),
                script_type: "regex".to_string(),
                lexicon_corpus_id: Some(lexicon_corpus.id),
                ..Default::default()
            },
        )
        .unwrap();
    store.generate_morphology_now(morphology.id, admin.id).unwrap();
    let morphology = store
        .compile_morphology_now(morphology.id, admin.id, Duration::from_secs(60))
        .unwrap();
    assert!(morphology.compile_succeeded, "{}", morphology.compile_message);

    // The bare morphology maps segmented shapes to rich analyses.
    let analyses = store
        .morphology_apply(
            morphology.id,
            oldb::morphology::ApplyDirection::Up,
            &["chien-s".to_string()],
        )
        .unwrap();
    assert!(analyses["chien-s"]
        .contains(&format!("chien{RARE}dog{RARE}N-s{RARE}PL{RARE}Num")));

    // LM: hand-written unigram ARPA preferring the PL analysis.
    let lm = store
        .create_lm(
            &admin,
            oldb::lm::LmWrite {
                name: "lm".to_string(),
                corpus_id: lexicon_corpus.id,
                ..Default::default()
            },
        )
        .unwrap();
    let arpa = format!(
        "\\data\\\nngram 1=5\n\n\\1-grams:\n\
         -0.5\t<s>\t0.0\n\
         -0.4\tchien{RARE}dog\t0.0\n\
         -0.6\ts{RARE}PL\t0.0\n\
         -2.5\ts{RARE}DIM\t0.0\n\
         -0.3\t</s>\n\n\\end\\\n"
    );
    NgramTrie::parse_arpa(&arpa)
        .unwrap()
        .save(&store.lm_file(lm.id, "trie.bin"))
        .unwrap();

    // Parser: compose and compile.
    let parser = store
        .create_parser(
            &admin,
            oldb::parser::ParserWrite {
                name: "parser".to_string(),
                description: String::new(),
                phonology_id: phonology.id,
                morphology_id: morphology.id,
                language_model_id: lm.id,
            },
        )
        .unwrap();
    let registry = CacheRegistry::new();
    let parser = store
        .generate_parser_now(parser.id, admin.id, &registry)
        .unwrap();
    assert_eq!(
        parser.generate_message,
        "Morphophonology script generated successfully."
    );
    let parser = store
        .compile_parser_now(parser.id, admin.id, Duration::from_secs(60))
        .unwrap();
    assert!(parser.compile_succeeded, "{}", parser.compile_message);

    // Apply up yields both candidate analyses.
    let candidates = store
        .parser_applyup(parser.id, &["chiens".to_string()])
        .unwrap();
    let expected_pl = format!("chien{RARE}dog{RARE}N-s{RARE}PL{RARE}Num");
    let expected_dim = format!("chien{RARE}dog{RARE}N-s{RARE}DIM{RARE}Num");
    assert!(candidates["chiens"].contains(&expected_pl));
    assert!(candidates["chiens"].contains(&expected_dim));

    // Parse: the LM prefers the plural analysis; both candidates are
    // ranked.
    let parses = store
        .parse_transcriptions(parser.id, &["chiens".to_string()], &registry)
        .unwrap();
    let parse = &parses["chiens"];
    assert_eq!(parse.parse.as_deref(), Some(expected_pl.as_str()));
    assert_eq!(parse.candidates.len(), 2);
    assert!(parse.candidates[0].1 > parse.candidates[1].1);

    // A second parse of the same input is a cache hit: remove the
    // binary and parse again.
    std::fs::remove_file(store.parser_binary_path(parser.id).unwrap()).unwrap();
    let parses = store
        .parse_transcriptions(parser.id, &["chiens".to_string()], &registry)
        .unwrap();
    assert_eq!(parses["chiens"].parse.as_deref(), Some(expected_pl.as_str()));

    // Apply down maps the winning analysis back to the surface.
    // (The binary is gone; recompile first.)
    let parser = store
        .compile_parser_now(parser.id, admin.id, Duration::from_secs(60))
        .unwrap();
    assert!(parser.compile_succeeded);
    let surfaces = store
        .parser_applydown(parser.id, &[expected_pl.clone()])
        .unwrap();
    assert_eq!(surfaces[&expected_pl], vec!["chiens".to_string()]);
}
