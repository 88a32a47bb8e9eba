//! Wire codec round-trips for every Action and Observation variant.

use warden_core::events::{Action, Observation, SearchMatch};
use warden_core::events::observation::CommandOutcome;

fn roundtrip_action(action: Action) {
    let encoded = serde_json::to_string(&action).expect("encode action");
    let decoded: Action = serde_json::from_str(&encoded).expect("decode action");
    assert_eq!(action, decoded, "action did not round-trip: {encoded}");
}

fn roundtrip_observation(observation: Observation) {
    let encoded = serde_json::to_string(&observation).expect("encode observation");
    let decoded: Observation = serde_json::from_str(&encoded).expect("decode observation");
    assert_eq!(observation, decoded, "observation did not round-trip: {encoded}");
}

#[test]
fn every_action_variant_round_trips() {
    roundtrip_action(Action::Run {
        command: "cargo test".into(),
        working_dir: Some("crates/app".into()),
        timeout_secs: Some(120),
        background: false,
    });
    roundtrip_action(Action::run("echo minimal"));
    roundtrip_action(Action::Run {
        command: "python -m http.server".into(),
        working_dir: None,
        timeout_secs: None,
        background: true,
    });
    roundtrip_action(Action::write("src/lib.rs", "pub fn f() {}"));
    roundtrip_action(Action::Read {
        path: "README.md".into(),
        start_line: Some(10),
        end_line: Some(20),
    });
    roundtrip_action(Action::read("README.md"));
    roundtrip_action(Action::Edit {
        path: "src/main.rs".into(),
        old_str: "let x = 1;".into(),
        new_str: "let x = 2;".into(),
    });
    roundtrip_action(Action::Delete {
        path: "tmp/scratch".into(),
    });
    roundtrip_action(Action::CreateDirectory {
        path: "src/models".into(),
    });
    roundtrip_action(Action::Search {
        query: r"fn \w+\(".into(),
        path: Some("src".into()),
        file_pattern: Some("*.rs".into()),
        case_sensitive: true,
    });
    roundtrip_action(Action::Kill { process_id: 4242 });
}

#[test]
fn every_observation_variant_round_trips() {
    roundtrip_observation(
        CommandOutcome {
            command: "ls -la".into(),
            exit_code: 0,
            stdout: "total 0\n".into(),
            stderr: String::new(),
            working_dir: Some("/workspace".into()),
            duration_ms: 12,
        }
        .into(),
    );
    roundtrip_observation(Observation::file_read("a.txt", "contents"));
    roundtrip_observation(Observation::file_written("b.txt", 42));
    roundtrip_observation(Observation::file_edited("c.txt"));
    roundtrip_observation(Observation::search_result(
        "needle",
        vec![SearchMatch {
            file: "src/lib.rs".into(),
            line: 7,
            text: "let needle = true;".into(),
        }],
    ));
    roundtrip_observation(Observation::error("command not found"));
    roundtrip_observation(Observation::success_message("done"));
    roundtrip_observation(Observation::null());
}

#[test]
fn action_wire_shape_uses_snake_case_discriminator() {
    let encoded = serde_json::to_value(Action::CreateDirectory {
        path: "x".into(),
    })
    .unwrap();
    assert_eq!(encoded["action_type"], "create_directory");
}

#[test]
fn observation_always_carries_success_and_content() {
    let variants = [
        Observation::file_read("p", "c"),
        Observation::file_written("p", 1),
        Observation::file_edited("p"),
        Observation::search_result("q", vec![]),
        Observation::error("e"),
        Observation::success_message("s"),
        Observation::null(),
    ];
    for observation in variants {
        let value = serde_json::to_value(&observation).unwrap();
        assert!(value.get("success").is_some(), "missing success: {value}");
        assert!(value.get("content").is_some(), "missing content: {value}");
        assert!(value.get("observation_type").is_some());
    }
}
