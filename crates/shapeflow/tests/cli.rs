use assert_cmd::Command;
use predicates::prelude::*;
use shapeflow_core::ir::{Attribute, AttributeKind, ElementKind, FunctionDef, Graph, Model, Node, Shape, Type};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn float(dims: &[u64]) -> Type {
    Type::tensor(ElementKind::Float, Shape::known(dims))
}

fn write_model(dir: &Path, model: &Model) -> PathBuf {
    let path = dir.join("model.json");
    fs::write(&path, serde_json::to_string(model).unwrap()).unwrap();
    path
}

fn read_model(path: &Path) -> Model {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn add_model(rhs: &[u64]) -> Model {
    let graph = Graph::new("main")
        .with_input("a", float(&[3, 4, 5]))
        .with_input("b", float(rhs))
        .with_output("c", None)
        .with_node(Node::new("Add").named("add").with_inputs(["a", "b"]).with_output("c"));
    Model::new(graph).with_opset("", 18)
}

fn shapeflow() -> Command {
    Command::cargo_bin("shapeflow").unwrap()
}

#[test]
fn test_infer_writes_refined_model() {
    let dir = TempDir::new().unwrap();
    let input = write_model(dir.path(), &add_model(&[5]));
    let output = dir.path().join("out.json");

    shapeflow()
        .arg("infer")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let model = read_model(&output);
    assert_eq!(model.graph.outputs[0].ty, Some(float(&[3, 4, 5])));
}

#[test]
fn test_infer_prints_to_stdout_and_summary_to_stderr() {
    let dir = TempDir::new().unwrap();
    let input = write_model(dir.path(), &add_model(&[5]));

    shapeflow()
        .arg("infer")
        .arg(&input)
        .arg("--summary")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"graph\""))
        .stderr(predicate::str::contains("\"values_typed\": 3"));
}

#[test]
fn test_infer_failure_names_the_node() {
    let dir = TempDir::new().unwrap();
    let input = write_model(dir.path(), &add_model(&[4]));

    shapeflow()
        .arg("infer")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Shape inference failed"))
        .stderr(predicate::str::contains("node 'add'"))
        .stderr(predicate::str::contains("cannot be broadcast"));
}

#[test]
fn test_strict_flag_and_config_file() {
    let dir = TempDir::new().unwrap();
    let graph = Graph::new("main")
        .with_input("x", float(&[2]))
        .with_output("y", None)
        .with_node(Node::new("Mystery").in_domain("vendor").with_input("x").with_output("y"));
    let input = write_model(dir.path(), &Model::new(graph));

    shapeflow().arg("infer").arg(&input).assert().success();
    shapeflow()
        .arg("infer")
        .arg(&input)
        .arg("--strict")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no inference rule for operator 'Mystery'"));

    let config = dir.path().join("shapeflow.toml");
    fs::write(&config, "strict_mode = true\nmax_recursion_depth = 8\n").unwrap();
    shapeflow()
        .arg("infer")
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure();
}

#[test]
fn test_inline_replaces_calls() {
    let dir = TempDir::new().unwrap();
    let function = FunctionDef::new("local", "CastTo")
        .with_inputs(["x"])
        .with_outputs(["y"])
        .with_attributes(["to"])
        .with_node(
            Node::new("Cast")
                .with_input("x")
                .with_output("y")
                .with_attr(Attribute::reference("to", "to", AttributeKind::Int)),
        );
    let graph = Graph::new("main")
        .with_input("x", float(&[2]))
        .with_output("y", None)
        .with_node(
            Node::new("CastTo")
                .in_domain("local")
                .with_input("x")
                .with_output("y")
                .with_attr(Attribute::int("to", 7)),
        );
    let input = write_model(dir.path(), &Model::new(graph).with_function(function));
    let output = dir.path().join("inlined.json");

    shapeflow()
        .arg("inline")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    let model = read_model(&output);
    assert!(model.functions.is_empty());
    assert_eq!(model.graph.nodes.len(), 1);
    assert_eq!(model.graph.nodes[0].op_type, "Cast");
    assert_eq!(model.graph.nodes[0].attr_int("to").unwrap(), Some(7));
}

#[test]
fn test_missing_input_file() {
    shapeflow()
        .arg("infer")
        .arg("does-not-exist.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}
