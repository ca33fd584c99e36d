use super::*;
use serde_json::json;

type Node = (Vec<PathSegment>, Value);

fn key(name: &str) -> PathSegment {
    PathSegment::Key(name.to_string())
}

fn collect_chunks(chunks: &[&[u8]]) -> Result<Vec<Node>, StreamParseError> {
    let mut parser = JsonStreamParser::new();
    let mut nodes = Vec::new();
    let mut sink = |path: &[PathSegment], value: &Value| nodes.push((path.to_vec(), value.clone()));
    for chunk in chunks {
        parser.feed(chunk, &mut sink)?;
    }
    parser.finish(&mut sink)?;
    Ok(nodes)
}

fn collect(input: &str) -> Result<Vec<Node>, StreamParseError> {
    collect_chunks(&[input.as_bytes()])
}

#[test]
fn reports_children_before_parents_with_paths() {
    let nodes = collect(r#"{"items":[{"a":1},true],"n":null}"#).expect("parse");

    let paths: Vec<Vec<PathSegment>> = nodes.iter().map(|(path, _)| path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            vec![key("items"), PathSegment::Index(0), key("a")],
            vec![key("items"), PathSegment::Index(0)],
            vec![key("items"), PathSegment::Index(1)],
            vec![key("items")],
            vec![key("n")],
            vec![],
        ]
    );
    assert_eq!(nodes[1].1, json!({"a": 1}));
    assert_eq!(nodes[3].1, json!([{"a": 1}, true]));
    assert_eq!(nodes[5].1, json!({"items": [{"a": 1}, true], "n": null}));
}

#[test]
fn parses_docker_progress_frames_as_separate_roots() {
    let input = concat!(
        "{\"status\":\"Pulling from library/alpine\",\"id\":\"latest\"}\r\n",
        "{\"status\":\"Downloading\",\"progressDetail\":{\"current\":10,\"total\":20},\"id\":\"a1\"}\r\n",
        "{\"status\":\"Digest: sha256:abc\"}\n",
    );
    let roots: Vec<Value> = collect(input)
        .expect("parse")
        .into_iter()
        .filter(|(path, _)| path.is_empty())
        .map(|(_, value)| value)
        .collect();

    assert_eq!(roots.len(), 3);
    assert_eq!(roots[1]["progressDetail"]["total"], json!(20));
    assert_eq!(roots[2]["status"], json!("Digest: sha256:abc"));
}

#[test]
fn result_does_not_depend_on_chunk_boundaries() {
    let input = r#"{"name":"café \"quoted\" ü","n":[-1.5e3,0,12],"ok":false,"emoji":"😀"} 42 "tail""#;
    let whole = collect(input).expect("parse whole");

    let bytes = input.as_bytes();
    for split in 1..bytes.len() {
        let (left, right) = bytes.split_at(split);
        let nodes = collect_chunks(&[left, right]).expect("parse split");
        assert_eq!(nodes, whole, "split at byte {split}");
    }

    let single_bytes: Vec<&[u8]> = bytes.chunks(1).collect();
    assert_eq!(collect_chunks(&single_bytes).expect("parse bytewise"), whole);

    let root = &whole
        .iter()
        .find(|(path, value)| path.is_empty() && value.is_object())
        .expect("object root")
        .1;
    assert_eq!(root["name"], json!("café \"quoted\" ü"));
    assert_eq!(root["emoji"], json!("😀"));
    assert_eq!(root["n"], json!([-1500.0, 0, 12]));
}

#[test]
fn trailing_top_level_number_is_completed_on_finish() {
    let nodes = collect("1 2\n3").expect("parse");
    let values: Vec<Value> = nodes.into_iter().map(|(_, value)| value).collect();
    assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn nodes_are_reported_as_soon_as_they_close() {
    let mut parser = JsonStreamParser::new();
    let mut seen = Vec::new();
    let mut sink = |_: &[PathSegment], value: &Value| seen.push(value.clone());

    parser
        .feed(br#"{"items":[{"a":1},"#, &mut sink)
        .expect("first chunk");
    assert!(!parser.is_idle());
    drop(sink);
    assert_eq!(seen, vec![json!(1), json!({"a": 1})]);
}

#[test]
fn truncated_input_is_reported_by_finish() {
    for input in [r#"{"a":1"#, r#"["x","#, r#""unterminated"#, "tru", r#"{"a""#] {
        assert_eq!(
            collect(input),
            Err(StreamParseError::Truncated),
            "input {input:?}"
        );
    }
}

#[test]
fn malformed_input_is_rejected_with_offset() {
    assert!(matches!(
        collect(r#"{"a" 1}"#),
        Err(StreamParseError::Unexpected { offset: 5, .. })
    ));
    assert!(matches!(
        collect("[1,]"),
        Err(StreamParseError::Unexpected { offset: 3, .. })
    ));
    assert!(matches!(
        collect("nul!"),
        Err(StreamParseError::InvalidLiteral { .. })
    ));
    assert!(matches!(
        collect("[1.2.3]"),
        Err(StreamParseError::InvalidNumber { .. })
    ));
    assert!(matches!(
        collect(r#"["\q"]"#),
        Err(StreamParseError::InvalidString { .. })
    ));
}

#[test]
fn parser_stays_failed_after_an_error() {
    let mut parser = JsonStreamParser::new();
    let mut sink = |_: &[PathSegment], _: &Value| {};
    assert!(parser.feed(b"}", &mut sink).is_err());
    assert!(parser.feed(b"{}", &mut sink).is_err());
    assert!(parser.finish(&mut sink).is_err());
}
