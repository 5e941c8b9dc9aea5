//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "test"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Registry build, parse and update behaviour across message types."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use simbus_common::time::FixedClock;
use simbus_msg::{
    JsonMap, Message, MessageGenerator, Parsed, QuantityBlock, Registry, SimulationState,
    StatusValue, ValidationError,
};

fn registry() -> Registry {
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    Registry::with_defaults(Arc::new(clock))
}

fn object(value: Value) -> JsonMap {
    value.as_object().cloned().expect("json object")
}

fn resource_state_attributes(state_of_charge: Value) -> JsonMap {
    object(json!({
        "SimulationId": "sim1",
        "SourceProcessId": "battery",
        "MessageId": "battery-7",
        "EpochNumber": 1,
        "TriggeringMessageIds": ["manager-2"],
        "Bus": "bus1",
        "RealPower": {"Value": 12.0, "UnitOfMeasure": "kW"},
        "ReactivePower": {"Value": 0.5, "UnitOfMeasure": "kV.A{r}"},
        "StateOfCharge": state_of_charge
    }))
}

#[test]
fn resource_state_checks_quantity_units() {
    let registry = registry();
    let err = registry
        .build(
            "ResourceState",
            resource_state_attributes(json!({"Value": 150, "UnitOfMeasure": "bogus-unit"})),
        )
        .expect_err("unknown unit");
    assert!(matches!(err, ValidationError::InvalidAttribute { ref attribute, .. } if attribute == "StateOfCharge"));

    let message = registry
        .build(
            "ResourceState",
            resource_state_attributes(json!({"Value": 55.5, "UnitOfMeasure": "kW"})),
        )
        .expect("valid resource state");
    let Message::ResourceState(state) = &message else {
        panic!("unexpected variant {message:?}");
    };
    assert_eq!(state.state_of_charge(), Some(&QuantityBlock::new(55.5, "kW").unwrap()));
    assert_eq!(message.epoch_number(), Some(1));
}

#[test]
fn serialized_messages_parse_back_to_equal_values() {
    let registry = registry();
    let mut generator = MessageGenerator::new("sim1", "manager", Arc::clone(registry.clock()));
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
    let epoch: Message = generator.epoch(1, ["manager-1"], start, end).unwrap().into();

    let encoded = registry.serialize(&epoch).unwrap();
    let text = String::from_utf8(encoded.clone()).unwrap();
    assert!(text.contains(r#""StartTime":"2024-01-01T00:00:00.000Z""#));
    assert!(!text.contains("Warnings"));

    assert_eq!(registry.parse(&encoded).unwrap(), Parsed::Message(epoch));
}

#[test]
fn parse_normalises_timestamps_to_utc_millis() {
    let payload = br#"{
        "Type": "Status",
        "SimulationId": "sim1",
        "SourceProcessId": "compA",
        "MessageId": "compA-3",
        "Timestamp": "2024-01-01T03:00:00.123456+03:00",
        "EpochNumber": 2,
        "TriggeringMessageIds": ["manager-5"],
        "Value": "error",
        "Description": "solver diverged",
        "Unrelated": 1
    }"#;
    let parsed = registry().parse(payload).unwrap();
    let Some(Message::Status(status)) = parsed.into_message() else {
        panic!("expected a status message");
    };
    assert_eq!(status.value(), StatusValue::Error);
    assert_eq!(status.description(), Some("solver diverged"));
    assert_eq!(
        simbus_common::time::to_iso_string(&status.header().timestamp()),
        "2024-01-01T00:00:00.123Z"
    );
}

#[test]
fn invalid_payloads_report_the_failing_attribute() {
    let registry = registry();
    let cases = [
        (json!({"SimulationState": "paused"}), "SimulationState"),
        (json!({"SimulationId": ""}), "SimulationId"),
        (json!({"MessageId": 5}), "MessageId"),
    ];
    for (patch, attribute) in cases {
        let mut attributes = object(json!({
            "Type": "SimState",
            "SimulationId": "sim1",
            "SourceProcessId": "manager",
            "MessageId": "manager-1",
            "Timestamp": "2024-01-01T00:00:00Z",
            "SimulationState": "running"
        }));
        for (key, value) in object(patch) {
            attributes.insert(key, value);
        }
        let err = registry
            .parse_value(Value::Object(attributes))
            .expect_err("invalid payload");
        assert_eq!(err.attribute(), Some(attribute), "{err}");
    }
}

#[test]
fn attribute_updates_keep_messages_valid() {
    let registry = registry();
    let mut generator = MessageGenerator::new("sim1", "manager", Arc::clone(registry.clock()));
    let mut state: Message = generator
        .simulation_state(SimulationState::Running)
        .unwrap()
        .into();

    state.set_attribute("SimulationState", json!("stopped")).unwrap();
    assert!(matches!(
        &state,
        Message::SimulationState(message) if message.simulation_state() == SimulationState::Stopped
    ));

    let snapshot = state.clone();
    let err = state
        .set_attribute("SimulationState", json!("paused"))
        .expect_err("not a simulation state");
    assert_eq!(err.attribute(), Some("SimulationState"));
    assert!(state.set_attribute("Timestamp", json!("not-a-date")).is_err());
    assert!(state.set_attribute("Surprise", json!(true)).is_err());
    assert_eq!(state, snapshot);
}

#[test]
fn epoch_window_update_is_checked_against_the_record() {
    let registry = registry();
    let mut epoch = registry
        .build(
            "Epoch",
            object(json!({
                "SimulationId": "sim1",
                "SourceProcessId": "manager",
                "MessageId": "manager-4",
                "EpochNumber": 3,
                "TriggeringMessageIds": ["manager-3"],
                "StartTime": "2024-01-01T02:00:00Z",
                "EndTime": "2024-01-01T03:00:00Z"
            })),
        )
        .unwrap();
    let err = epoch
        .set_attribute("EndTime", json!("2024-01-01T01:00:00Z"))
        .expect_err("end before start");
    assert!(matches!(err, ValidationError::InvalidRecord { .. }));
    epoch
        .set_attribute("EndTime", json!("2024-01-01T04:00:00Z"))
        .unwrap();
    assert_eq!(
        epoch.attribute("EndTime"),
        Some(json!("2024-01-01T04:00:00.000Z"))
    );
}

#[test]
fn message_ids_strictly_increase_across_message_types() {
    let registry = registry();
    let mut generator = MessageGenerator::new("sim1", "compA", Arc::clone(registry.clock()));
    let mut ids = Vec::new();
    ids.push(generator.status_ready(0, ["manager-1"]).unwrap().header().message_id().to_owned());
    ids.push(generator.general(JsonMap::new()).unwrap().header().message_id().to_owned());
    ids.push(
        generator
            .status_error(1, ["manager-2"], "boom")
            .unwrap()
            .header()
            .message_id()
            .to_owned(),
    );
    let numbers: Vec<u64> = ids
        .iter()
        .map(|id| id.rsplit('-').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(ids.iter().all(|id| id.starts_with("compA-")));
}

fn valid_attributes() -> Vec<(&'static str, JsonMap)> {
    let result = |extra: Value| {
        let mut attributes = object(json!({
            "SimulationId": "sim1",
            "SourceProcessId": "compA",
            "MessageId": "compA-4",
            "EpochNumber": 2,
            "TriggeringMessageIds": ["manager-3"]
        }));
        attributes.extend(object(extra));
        attributes
    };
    vec![
        (
            "SimState",
            object(json!({
                "SimulationId": "sim1",
                "SourceProcessId": "manager",
                "MessageId": "manager-1",
                "SimulationState": "running"
            })),
        ),
        (
            "Epoch",
            result(json!({
                "StartTime": "2024-01-01T00:00:00Z",
                "EndTime": "2024-01-01T01:00:00Z"
            })),
        ),
        ("Status", result(json!({"Value": "ready"}))),
        (
            "ResourceState",
            resource_state_attributes(json!({"Value": 40.0, "UnitOfMeasure": "%"})),
        ),
        ("Result", result(json!({"Forecast": [1.5, 2.5], "Horizon": "PT1H"}))),
        (
            "General",
            object(json!({
                "SimulationId": "sim1",
                "SourceProcessId": "compA",
                "MessageId": "compA-9",
                "Note": "free form"
            })),
        ),
    ]
}

#[test]
fn every_builtin_type_survives_serialize_and_parse() {
    let registry = registry();
    let cases = valid_attributes();
    let mut covered: Vec<&str> = cases.iter().map(|(tag, _)| *tag).collect();
    covered.sort_unstable();
    assert_eq!(covered, registry.message_types());

    for (tag, attributes) in cases {
        let built = registry
            .build(tag, attributes)
            .unwrap_or_else(|err| panic!("{tag}: {err}"));
        assert_eq!(built.message_type(), tag);
        let encoded = registry.serialize(&built).unwrap();
        assert_eq!(registry.parse(&encoded).unwrap(), Parsed::Message(built), "{tag}");
    }
}

#[test]
fn every_required_attribute_of_every_builtin_type_is_enforced() {
    let registry = registry();
    for (tag, attributes) in valid_attributes() {
        let built = registry.build(tag, attributes).unwrap();
        let wire: Value = serde_json::from_slice(&registry.serialize(&built).unwrap()).unwrap();
        let required: Vec<String> = registry
            .schema(tag)
            .unwrap()
            .required_attributes()
            .map(str::to_owned)
            .collect();
        assert!(required.iter().any(|name| name == "Timestamp"), "{tag}");

        for name in required {
            let mut missing = object(wire.clone());
            missing.remove(&name);
            let parsed = registry.parse_value(Value::Object(missing));
            if name == "Type" {
                assert!(matches!(parsed, Ok(Parsed::Untyped(_))), "{tag} without Type");
                continue;
            }
            let err = parsed.expect_err("missing required attribute");
            assert!(
                matches!(err, ValidationError::MissingAttribute { ref attribute, .. } if *attribute == name),
                "{tag} without {name}: {err}"
            );
        }
    }
}

#[test]
fn result_types_reject_negative_epoch_numbers() {
    let registry = registry();
    for (tag, mut attributes) in valid_attributes() {
        if !attributes.contains_key("EpochNumber") {
            continue;
        }
        attributes.insert("EpochNumber".to_owned(), json!(-1));
        let err = registry.build(tag, attributes).expect_err("negative epoch");
        assert_eq!(err.attribute(), Some("EpochNumber"), "{tag}: {err}");
    }
}
