mod util;

use std::sync::Arc;

use proptest::prelude::*;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, PhraseQuery, TermQuery};
use tantivy::{Index, Term};
use yaml_query_dsl::dsl::clause::{BoolClause, TermClause};
use yaml_query_dsl::dsl::{CompileError, ErrorKind, QueryClause, QueryCompiler};
use yaml_query_dsl::search::tantivy::build_schema;

use util::StubEmbedder;

fn compiler_with(embedder: Arc<StubEmbedder>) -> QueryCompiler {
    QueryCompiler::new(Index::create_in_ram(build_schema()), embedder)
}

fn compile(yaml: &str) -> Result<yaml_query_dsl::dsl::CompiledQuery, CompileError> {
    let clause = QueryClause::from_yaml(yaml).expect("clause decodes");
    compiler_with(Arc::new(StubEmbedder::new())).compile(&clause)
}

fn term(value: &str) -> QueryClause {
    QueryClause::Term(TermClause {
        field: "status".into(),
        value: value.into(),
        boost: None,
    })
}

/// `depth` levels in total: `depth - 1` nested bools around one term.
fn nested(depth: usize) -> QueryClause {
    let mut clause = term("published");
    for _ in 1..depth {
        clause = QueryClause::Bool(BoolClause {
            must: vec![clause],
            ..Default::default()
        });
    }
    clause
}

#[test]
fn match_phrase_with_slop_becomes_phrase_query() {
    let compiled =
        compile("match_phrase: {field: content, value: quick brown fox, slop: 1}").unwrap();
    assert!(compiled.knn.is_empty());
    let query = compiled.query.expect("lexical query");
    let phrase = query
        .downcast_ref::<PhraseQuery>()
        .expect("phrase query");
    assert_eq!(phrase.slop(), 1);
    assert_eq!(phrase.phrase_terms().len(), 3);
}

#[test]
fn vector_text_is_embedded_once_and_hoisted() {
    let embedder = Arc::new(StubEmbedder::new());
    let clause =
        QueryClause::from_yaml("vector: {field: vector, text: life, model: toy, k: 5}").unwrap();
    let compiled = compiler_with(embedder.clone()).compile(&clause).unwrap();

    assert_eq!(embedder.calls(), 1);
    assert!(compiled.query.is_none());
    assert_eq!(compiled.knn.len(), 1);
    assert_eq!(compiled.knn[0].field, "vector");
    assert_eq!(compiled.knn[0].k, 5);
    assert_eq!(compiled.knn[0].boost, 1.0);
}

#[test]
fn embedding_failure_aborts_compilation() {
    let embedder = Arc::new(StubEmbedder::failing());
    let clause =
        QueryClause::from_yaml("vector: {field: vector, text: life, model: toy, k: 5}").unwrap();
    let err = compiler_with(embedder.clone()).compile(&clause).unwrap_err();

    assert_eq!(embedder.calls(), 1);
    assert!(matches!(err, CompileError::EmbeddingFailed(_)));
    assert_eq!(err.kind(), ErrorKind::EmbeddingFailed);
}

#[test]
fn boosted_single_token_match_wraps_a_term_query() {
    let content = build_schema().get_field("content").unwrap();

    let query = compile("match: {field: content, value: fox, boost: 2.0}")
        .unwrap()
        .query
        .unwrap();
    let boosted = query.downcast_ref::<BoostQuery>().expect("boost query");
    let rendered = format!("{boosted:?}");
    assert!(rendered.contains("TermQuery"), "{rendered}");
    assert!(rendered.contains("\"fox\""), "{rendered}");
    assert!(rendered.ends_with("boost=2)"), "{rendered}");

    let query = compile("match: {field: content, value: fox, boost: 0}")
        .unwrap()
        .query
        .unwrap();
    assert!(query.downcast_ref::<BoostQuery>().is_none());
    let term = query.downcast_ref::<TermQuery>().expect("bare term query");
    assert_eq!(term.term(), &Term::from_field_text(content, "fox"));
}

#[test]
fn hoisted_should_vectors_leave_the_quorum() {
    let compiled = compile(
        r#"
bool:
  should:
    - {match: {field: content, value: quick}}
    - {vector: {field: vector, vector: [0.0, 1.0, 0.0], model: toy, k: 1}}
  minimum_should_match: 2
"#,
    )
    .unwrap();
    assert_eq!(compiled.knn.len(), 1);
    let query = compiled.query.unwrap();
    let boolean = query.downcast_ref::<BooleanQuery>().expect("boolean query");
    assert_eq!(boolean.clauses().len(), 1);
    assert_eq!(boolean.get_minimum_number_should_match(), 1);
}

#[test]
fn lexical_quorum_is_kept_without_hoisting() {
    let compiled = compile(
        r#"
bool:
  should:
    - {term: {field: status, value: draft}}
    - {term: {field: status, value: published}}
  minimum_should_match: 2
"#,
    )
    .unwrap();
    let query = compiled.query.unwrap();
    let boolean = query.downcast_ref::<BooleanQuery>().expect("boolean query");
    assert_eq!(boolean.get_minimum_number_should_match(), 2);
}

#[test]
fn vector_clause_needs_a_vector_field() {
    for field in ["rating", "content"] {
        let err = compile(&format!(
            "vector: {{field: {field}, vector: [1.0], model: custom, k: 1}}"
        ))
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidParameter(_)), "{field}: {err}");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}

#[test]
fn bool_groups_keep_their_occurrence() {
    let compiled = compile(
        r#"
bool:
  must: [{term: {field: status, value: draft}}]
  must_not: [{term: {field: status, value: archived}}]
  minimum_should_match: 0
"#,
    )
    .unwrap();
    let query = compiled.query.unwrap();
    let boolean = query.downcast_ref::<BooleanQuery>().expect("boolean query");
    let count = |occur: Occur| {
        boolean
            .clauses()
            .iter()
            .filter(|(o, _)| *o == occur)
            .count()
    };
    assert_eq!(count(Occur::Must), 1);
    assert_eq!(count(Occur::MustNot), 1);
    assert_eq!(count(Occur::Should), 0);
}

#[test]
fn child_errors_carry_their_position() {
    let err = compile(
        r#"
bool:
  should:
    - {term: {field: status, value: draft}}
    - {doc_id: {ids: []}}
"#,
    )
    .unwrap_err();
    assert!(
        err.to_string().starts_with("should[1] (doc_id)"),
        "unexpected message: {err}"
    );
    assert!(matches!(err.root_cause(), CompileError::EmptyIdList));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn vector_under_must_not_is_rejected_at_any_depth() {
    let err = compile(
        r#"
bool:
  must_not:
    - bool:
        should:
          - {vector: {field: vector, vector: [1.0, 0.0, 0.0], model: toy, k: 3}}
"#,
    )
    .unwrap_err();
    assert!(matches!(err.root_cause(), CompileError::VectorInMustNot));
}

#[test]
fn text_for_a_different_model_is_a_mismatch() {
    let err = compile("vector: {field: vector, text: life, model: all-minilm, k: 5}").unwrap_err();
    assert!(matches!(err, CompileError::ModelMismatch { .. }));
}

#[test]
fn registered_model_dimension_is_enforced_for_raw_vectors() {
    let err = compile("vector: {field: vector, vector: [0.1, 0.2], model: all-minilm, k: 5}")
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::VectorDimensionMismatch {
            expected: 384,
            actual: 2,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::VectorDimensionMismatch);
}

#[test]
fn both_or_neither_vector_inputs_are_ambiguous() {
    for yaml in [
        "vector: {field: vector, text: life, vector: [1.0], model: toy, k: 5}",
        "vector: {field: vector, text: '', model: toy, k: 5}",
    ] {
        let err = compile(yaml).unwrap_err();
        assert!(matches!(err, CompileError::AmbiguousVectorInput), "{yaml}");
    }
}

#[test]
fn non_positive_k_is_rejected() {
    let err = compile("vector: {field: vector, vector: [1.0, 0.0, 0.0], model: toy, k: 0}")
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidK(0)));
}

#[test]
fn malformed_shapes_are_rejected_before_compilation() {
    let empty = QueryClause::from_yaml("{}").unwrap_err();
    assert!(empty.to_string().contains("no query clause given"));

    let ambiguous = QueryClause::from_yaml(
        "term: {field: status, value: a}\nprefix: {field: status, value: b}",
    )
    .unwrap_err();
    assert!(ambiguous.to_string().contains("ambiguous clause"));

    let unknown = QueryClause::from_yaml("term: {field: status, value: a, colour: red}").unwrap_err();
    assert!(unknown.to_string().contains("colour"));
}

#[test]
fn unknown_fields_and_bad_parameters_are_validation_errors() {
    for yaml in [
        "term: {field: nope, value: x}",
        "match: {field: content, value: fox, operator: xor}",
        "fuzzy: {field: content, value: fox, fuzziness: 3}",
        "numeric_range: {field: rating}",
        "date_range: {field: created_at, start: yesterday}",
        "regexp: {field: content, value: '(unclosed'}",
        "match_phrase: {field: content, value: fox, slop: -1}",
        "term: {field: status, value: x, boost: -2.0}",
    ] {
        let err = compile(yaml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{yaml}: {err}");
    }
}

#[test]
fn empty_bool_matches_everything() {
    let compiled = compile("bool: {}").unwrap();
    assert!(compiled.query.is_some());
    assert!(compiled.knn.is_empty());
}

#[test]
fn depth_limit_is_configurable() {
    let compiler = compiler_with(Arc::new(StubEmbedder::new())).with_max_depth(3);
    assert!(compiler.compile(&nested(3)).is_ok());
    let err = compiler.compile(&nested(4)).unwrap_err();
    assert!(matches!(err.root_cause(), CompileError::MaxDepthExceeded(3)));
}

proptest! {
    #[test]
    fn nesting_beyond_default_depth_fails(depth in 1usize..48) {
        let compiler = compiler_with(Arc::new(StubEmbedder::new()));
        let result = compiler.compile(&nested(depth));
        prop_assert_eq!(result.is_ok(), depth <= compiler.max_depth());
    }

    #[test]
    fn finite_non_negative_boosts_compile(boost in 0.0f32..1000.0) {
        let clause = QueryClause::Term(TermClause {
            field: "status".into(),
            value: "draft".into(),
            boost: Some(boost),
        });
        let compiler = compiler_with(Arc::new(StubEmbedder::new()));
        prop_assert!(compiler.compile(&clause).is_ok());
    }

    #[test]
    fn negative_boosts_are_rejected(boost in -1000.0f32..-0.001) {
        let clause = QueryClause::Term(TermClause {
            field: "status".into(),
            value: "draft".into(),
            boost: Some(boost),
        });
        let compiler = compiler_with(Arc::new(StubEmbedder::new()));
        prop_assert!(matches!(
            compiler.compile(&clause),
            Err(CompileError::InvalidParameter(_))
        ));
    }
}
