use super::*;

fn sample_record() -> ObjectRecord {
    ObjectRecord {
        id: "obj-1".to_owned(),
        x: 120.0,
        y: 340.5,
        width: 100.0,
        height: 100.0,
        color: "#3182CE".to_owned(),
        created_by: Some("user-1".to_owned()),
        created_at: 1_000.0,
        updated_at: 2_000.0,
        workspace_id: "ws-1".to_owned(),
    }
}

fn sample_frame() -> Frame {
    Frame {
        id: "frame-1".to_owned(),
        ts: 42,
        workspace_id: Some("ws-1".to_owned()),
        from: Some("user-1".to_owned()),
        op: op::OBJECT_CREATED.to_owned(),
        data: to_data(&sample_record()),
    }
}

// =============================================================
// Codec round trips
// =============================================================

#[test]
fn encode_decode_round_trip_preserves_frame() {
    let frame = sample_frame();
    let bytes = encode_frame(&frame);
    let decoded = decode_frame(&bytes).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn encode_frame_outputs_non_empty_binary() {
    let bytes = encode_frame(&sample_frame());
    assert!(!bytes.is_empty());
}

#[test]
fn decode_frame_rejects_malformed_bytes() {
    let err = decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_frame_defaults_missing_data_to_empty_object() {
    let wire = WireFrame {
        id: "frame-1".to_owned(),
        ts: 1,
        workspace_id: None,
        from: None,
        op: op::PRESENCE_LEAVE.to_owned(),
        data: None,
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, serde_json::json!({}));
}

#[test]
fn decode_frame_converts_nan_number_to_json_null() {
    let wire = WireFrame {
        id: "frame-1".to_owned(),
        ts: 1,
        workspace_id: None,
        from: None,
        op: op::CURSOR_MOVED.to_owned(),
        data: Some(prost_types::Value {
            kind: Some(prost_types::value::Kind::NumberValue(f64::NAN)),
        }),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, Value::Null);
}

#[test]
fn wire_conversion_preserves_empty_optional_fields() {
    let frame = Frame {
        id: String::new(),
        ts: 0,
        workspace_id: None,
        from: None,
        op: String::new(),
        data: serde_json::json!({}),
    };

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded, frame);
}

#[test]
fn nested_payload_round_trips() {
    let frame = Frame {
        id: "frame-nested".to_owned(),
        ts: -99,
        workspace_id: Some("ws-1".to_owned()),
        from: Some("u".to_owned()),
        op: op::PRESENCE_SNAPSHOT.to_owned(),
        data: serde_json::json!({
            "users": [
                {"user_id": "a", "display_name": "A", "color": "#fff", "conn_id": "c1"},
                {"user_id": "b", "display_name": "B", "color": "#000", "conn_id": "c2"}
            ],
            "meta": {"next": null, "count": 2.0}
        }),
    };

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded, frame);
}

#[test]
fn integer_json_numbers_are_normalized_to_float_numbers() {
    let frame = Frame {
        id: "frame-int".to_owned(),
        ts: 1,
        workspace_id: None,
        from: None,
        op: op::CURSOR_MOVED.to_owned(),
        data: serde_json::json!({"count": 2}),
    };

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.data.get("count"), Some(&serde_json::json!(2.0)));
}

// =============================================================
// Typed payload accessors
// =============================================================

#[test]
fn object_record_payload_round_trips_through_codec() {
    let frame = sample_frame();
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    let record = decoded.object_record().expect("record payload");
    assert_eq!(record, sample_record());
}

#[test]
fn object_record_payload_missing_field_is_rejected() {
    let frame = Frame {
        id: "frame-1".to_owned(),
        ts: 1,
        workspace_id: Some("ws-1".to_owned()),
        from: None,
        op: op::OBJECT_CREATED.to_owned(),
        data: serde_json::json!({"id": "obj-1", "x": 1.0}),
    };
    let err = frame.object_record().expect_err("payload should be invalid");
    assert!(matches!(err, CodecError::Payload(_)));
}

#[test]
fn cursor_payload_round_trips_through_codec() {
    let cursor = CursorPayload {
        user_id: "user-1".to_owned(),
        display_name: "Ada".to_owned(),
        color: "#38A169".to_owned(),
        x: 10.0,
        y: 20.0,
        visible: true,
        ts: 5_000.0,
    };
    let frame = Frame {
        id: "frame-1".to_owned(),
        ts: 5_000,
        workspace_id: Some("ws-1".to_owned()),
        from: Some("user-1".to_owned()),
        op: op::CURSOR_MOVED.to_owned(),
        data: to_data(&cursor),
    };
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.cursor_payload().expect("cursor payload"), cursor);
}

#[test]
fn presence_snapshot_round_trips_through_codec() {
    let snapshot = PresenceSnapshot {
        users: vec![PresencePayload {
            user_id: "user-1".to_owned(),
            display_name: "Ada".to_owned(),
            color: "#38A169".to_owned(),
            conn_id: "conn-1".to_owned(),
        }],
    };
    let frame = Frame {
        id: "frame-1".to_owned(),
        ts: 1,
        workspace_id: Some("ws-1".to_owned()),
        from: None,
        op: op::PRESENCE_SNAPSHOT.to_owned(),
        data: to_data(&snapshot),
    };
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(
        decoded.presence_snapshot().expect("snapshot payload"),
        snapshot
    );
}

#[test]
fn presence_payload_wrong_shape_is_rejected() {
    let frame = Frame {
        id: "frame-1".to_owned(),
        ts: 1,
        workspace_id: None,
        from: None,
        op: op::PRESENCE_JOIN.to_owned(),
        data: serde_json::json!(42),
    };
    assert!(frame.presence_payload().is_err());
}

// =============================================================
// ObjectPatch serde
// =============================================================

#[test]
fn patch_default_is_all_none() {
    let p = ObjectPatch::default();
    assert!(p.x.is_none());
    assert!(p.y.is_none());
    assert!(p.width.is_none());
    assert!(p.height.is_none());
}

#[test]
fn patch_skip_serializing_none_fields() {
    let p = ObjectPatch { x: Some(10.0), updated_at: 99.0, ..Default::default() };
    let serialized = serde_json::to_string(&p).expect("serialize");
    assert!(serialized.contains("\"x\""));
    assert!(serialized.contains("\"updated_at\""));
    assert!(!serialized.contains("\"y\""));
    assert!(!serialized.contains("\"width\""));
    assert!(!serialized.contains("\"height\""));
}

#[test]
fn patch_serde_round_trip() {
    let p = ObjectPatch {
        x: Some(1.0),
        y: Some(2.0),
        width: Some(3.0),
        height: Some(4.0),
        updated_at: 5.0,
    };
    let serialized = serde_json::to_string(&p).expect("serialize");
    let back: ObjectPatch = serde_json::from_str(&serialized).expect("deserialize");
    assert_eq!(back, p);
}
