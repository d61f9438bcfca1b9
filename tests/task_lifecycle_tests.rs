//! # Task Lifecycle Tests
//!
//! `POST /tasks` extract and archive jobs driven over HTTP, polled to
//! completion and checked against the files they produce.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{Read, Write};

use channel_gateway::dispatch::ServiceRegistry;
use common::{bearer, harness, token, wait_finished};

fn write_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
}

#[tokio::test]
async fn test_extract_task_over_http() {
    let h = harness(&[], ServiceRegistry::with_builtins());
    let big = vec![7u8; 64 * 1024];
    write_zip(
        &h.workspace().join("in.zip"),
        &[("a.txt", b"alpha"), ("deep/b.bin", big.as_slice())],
    );

    let user = token("u1", &[], 600);
    let (name, value) = bearer(&user);
    let response = h
        .server
        .post("/tasks")
        .add_header(name, value)
        .json(&json!({ "type": "extract", "zipfile": "in.zip", "output": "out" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let ticket = response.json::<Value>()["data"].clone();
    assert_eq!(ticket["type"], "extract");
    let pid = ticket["pid"].as_str().unwrap();

    let node = wait_finished(&h.server, pid, &user).await;
    assert!(node.get("error").map_or(true, Value::is_null));
    assert_eq!(node["results"]["progress"].as_f64(), Some(100.0));
    assert_eq!(node["results"]["total"].as_u64(), Some(5 + 64 * 1024));
    assert!(node["lastTime"].is_string());

    let out = h.workspace().join("out");
    assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(out.join("deep/b.bin")).unwrap(), big);

    let log = fs::read_to_string(h.tasks_dir().join(pid).join("task.log")).unwrap();
    assert_eq!(log.matches("lastTime:").count(), 1);
    assert_eq!(log.lines().filter(|l| l.starts_with("finish ")).count(), 1);
}

#[tokio::test]
async fn test_extract_failure_is_recorded_on_the_task() {
    let h = harness(&[], ServiceRegistry::with_builtins());
    fs::write(h.workspace().join("broken.zip"), b"this is not an archive").unwrap();

    let user = token("u1", &[], 600);
    let (name, value) = bearer(&user);
    let response = h
        .server
        .post("/tasks")
        .add_header(name, value)
        .json(&json!({ "type": "extract", "zipfile": "broken.zip", "output": "out" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let pid = response.json::<Value>()["data"]["pid"].as_str().unwrap().to_string();

    let node = wait_finished(&h.server, &pid, &user).await;
    assert_eq!(node["status"], "finish");
    assert!(node["error"].as_str().unwrap().contains("Not a zip file"));

    let log = fs::read_to_string(h.tasks_dir().join(&pid).join("task.log")).unwrap();
    assert!(log.contains("\nerror "));
}

#[tokio::test]
async fn test_archive_task_round_trip() {
    let h = harness(&[], ServiceRegistry::with_builtins());
    let src = h.workspace().join("docs");
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("readme.txt"), b"read me").unwrap();
    fs::write(src.join("sub/data.bin"), [1u8, 2, 3, 0, 255]).unwrap();

    let user = token("u2", &[], 600);
    let (name, value) = bearer(&user);
    let response = h
        .server
        .post("/tasks")
        .add_header(name, value)
        .json(&json!({
            "type": "archive",
            "filename": "bundles/docs",
            "input": {
                "type": "zip",
                "comment": "nightly",
                "level": 6,
                "content": [
                    { "type": "directory", "name": "docs" },
                    { "type": "string", "name": "manifest.json", "content": "{\"v\":1}" }
                ]
            }
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let ticket = response.json::<Value>()["data"].clone();
    assert_eq!(ticket["type"], "archive");

    let node = wait_finished(&h.server, ticket["pid"].as_str().unwrap(), &user).await;
    assert!(node.get("error").map_or(true, Value::is_null));
    assert_eq!(node["results"]["name"], "docs.zip");

    let mut archive = zip::ZipArchive::new(File::open(h.workspace().join("bundles/docs.zip")).unwrap()).unwrap();
    assert_eq!(archive.comment(), b"nightly");

    let mut read = |name: &str| {
        let mut content = Vec::new();
        archive.by_name(name).unwrap().read_to_end(&mut content).unwrap();
        content
    };
    assert_eq!(read("readme.txt"), b"read me");
    assert_eq!(read("sub/data.bin"), vec![1u8, 2, 3, 0, 255]);
    assert_eq!(read("manifest.json"), b"{\"v\":1}");
}

#[tokio::test]
async fn test_task_requests_are_validated() {
    let h = harness(&[], ServiceRegistry::with_builtins());

    let response = h
        .server
        .post("/tasks")
        .json(&json!({ "type": "extract", "zipfile": "in.zip", "output": "out" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let (name, value) = bearer(&token("u3", &[], 600));
    let response = h
        .server
        .post("/tasks")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "type": "extract", "zipfile": "../../etc/passwd.zip", "output": "out" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = h
        .server
        .get("/tasks/not-a-task-id")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}
