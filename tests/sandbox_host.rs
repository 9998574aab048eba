// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Sandbox host behaviour over the message protocol

use polyforge::config::SandboxConfig;
use polyforge::sandbox::{decode_binary_stl, CodeUnit, ContextState};
use polyforge::{Error, HostMessage, InboundMessage, Kernel, SandboxHost};
use std::io::Cursor;

fn host_with_timeout(timeout_ms: u64) -> SandboxHost {
    let config = SandboxConfig {
        timeout_ms,
        ..SandboxConfig::default()
    };
    SandboxHost::new(config, Kernel::default())
}

fn terminal_messages(messages: &[HostMessage]) -> Vec<&HostMessage> {
    messages.iter().filter(|m| m.is_terminal()).collect()
}

#[tokio::test]
async fn test_thrown_error_yields_single_error_message() {
    let host = host_with_timeout(5_000);
    let report = host
        .execute(InboundMessage::execute("export_stl(cube(1, 1, 1)); throw \"boom\";"))
        .await
        .unwrap();

    assert!(!report.result.is_completed());
    let terminal = terminal_messages(&report.messages);
    assert_eq!(terminal.len(), 1);
    match terminal[0] {
        HostMessage::Error { error, .. } => assert_eq!(error, "boom"),
        other => panic!("expected an error message, got {other:?}"),
    }
    assert!(!report
        .messages
        .iter()
        .any(|m| matches!(m, HostMessage::StlData { .. })));
}

fn single_error(messages: &[HostMessage]) -> &str {
    let terminal = terminal_messages(messages);
    assert_eq!(terminal.len(), 1, "{messages:?}");
    assert!(!messages.iter().any(|m| matches!(m, HostMessage::StlData { .. })));
    match terminal[0] {
        HostMessage::Error { error, .. } => error.as_str(),
        other => panic!("expected an error message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_huge_segment_count_yields_single_error_message() {
    let host = host_with_timeout(5_000);
    let report = host
        .execute(InboundMessage::execute("export_stl(sphere(1, 4000000000, 3));"))
        .await
        .unwrap();

    assert!(!report.result.is_completed());
    let error = single_error(&report.messages);
    assert!(error.contains("widthSegments"), "{error}");
    assert!(host.is_idle());
}

#[tokio::test]
async fn test_deep_boolean_chain_yields_single_error_message() {
    let host = host_with_timeout(10_000);
    let report = host
        .execute(InboundMessage::execute(
            "let a = cube(1,1,1); for i in 0..30000 { a = a.union(cube(1,1,1)); } export_stl(a);",
        ))
        .await
        .unwrap();

    assert!(!report.result.is_completed());
    let error = single_error(&report.messages);
    assert!(error.contains("nesting"), "{error}");

    // The host survives and serves the next request
    let next = host.execute(InboundMessage::execute("cube(1, 1, 1)")).await.unwrap();
    assert!(next.result.is_completed());
}

#[tokio::test]
async fn test_scene_export_over_json() {
    let host = host_with_timeout(5_000);
    let request = r#"{"type":"executeCode","code":[{"object":"let s = scene(); s.add(cube(2, 2, 2)); s.add(sphere(1).translate(3, 0, 0)); export_stl(s);"}]}"#;
    let report = host.submit_json(request).unwrap().wait().await;

    assert!(report.result.is_completed());
    assert_eq!(report.messages.first(), Some(&HostMessage::IframeLoaded));
    let HostMessage::StlData { stl } = &report.messages[1] else {
        panic!("expected stlData");
    };
    assert!(stl.starts_with("solid"));
    assert_eq!(stl.matches("endfacet").count(), 12 + 2 * 32 * 15);
}

#[tokio::test]
async fn test_binary_request_is_base64() {
    let host = host_with_timeout(5_000);
    let message = InboundMessage::ExecuteCode {
        code: vec![CodeUnit::new("cube(1, 1, 1)")],
        binary: Some(true),
    };
    let report = host.execute(message).await.unwrap();

    let Some(HostMessage::StlData { stl }) = report.messages.last() else {
        panic!("expected stlData");
    };
    let bytes = decode_binary_stl(stl).unwrap();
    let parsed = stl_io::read_stl(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(parsed.faces.len(), 12);
}

#[tokio::test]
async fn test_modules_are_importable() {
    let host = host_with_timeout(5_000);
    let message = InboundMessage::ExecuteCode {
        code: vec![
            CodeUnit::module("parts", "fn plate(w) { cube(w, w, 0.5) }"),
            CodeUnit::new("fn peg() { cylinder(0.25, 2) }"),
            CodeUnit::new(
                "import \"parts\" as parts;\n\
                 import \"module1\" as pegs;\n\
                 export_stl(parts::plate(4).union(pegs::peg().translate(2, 2, 0)));",
            ),
        ],
        binary: None,
    };
    let report = host.execute(message).await.unwrap();
    assert!(report.result.is_completed(), "{:?}", report.result.error());
}

#[tokio::test]
async fn test_console_is_a_side_channel() {
    let host = host_with_timeout(5_000);
    let report = host
        .execute(InboundMessage::execute(
            "print(\"building\"); eprint(\"careful\"); cube(1, 1, 1)",
        ))
        .await
        .unwrap();

    assert_eq!(
        report.console,
        vec![
            HostMessage::console("building", false),
            HostMessage::console("careful", true),
        ]
    );
    assert!(report
        .messages
        .iter()
        .all(|m| !matches!(m, HostMessage::Console { .. })));
}

#[tokio::test]
async fn test_timeout_destroys_context() {
    let host = host_with_timeout(100);
    let context = host.submit(InboundMessage::execute("loop { }")).unwrap();
    let monitor = context.monitor();
    let report = context.wait().await;

    assert!(matches!(report.result.error(), Some(Error::SandboxTimeout(_))));
    assert!(report.result.stl().is_none());
    assert!(!report
        .messages
        .iter()
        .any(|m| matches!(m, HostMessage::StlData { .. })));
    assert_eq!(monitor.state(), ContextState::Destroyed);
    assert!(host.is_idle());
}

#[tokio::test]
async fn test_busy_host_rejects_second_request() {
    let host = host_with_timeout(10_000);
    let first = host.submit(InboundMessage::execute("loop { }")).unwrap();

    let second = host.submit(InboundMessage::execute("cube(1, 1, 1)"));
    assert!(matches!(second, Err(Error::SandboxBusy)));

    first.cancel();
    let report = first.wait().await;
    assert!(!report.result.is_completed());

    let third = host.execute(InboundMessage::execute("cube(1, 1, 1)")).await.unwrap();
    assert!(third.result.is_completed());
}
