use chronicle_codec::envelope;
use chronicle_codec::Transcoder;
use chronicle_types::{DomainEvent, EntityId, Topic};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn arb_json_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ]
}

fn arb_payload() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::hash_map("[a-z]{1,8}", arb_json_scalar(), 0..6)
        .prop_map(|fields| fields.into_iter().collect())
}

proptest! {
    #[test]
    fn event_round_trips_through_encoded_bytes(
        version in 0u64..10_000,
        kind in "[a-z]{2,8}#[A-Z][a-zA-Z]{2,12}",
        payload in arb_payload(),
    ) {
        let codec = Transcoder::new();
        let id = EntityId::new();
        let topic = Topic::new(&kind);
        let event = DomainEvent::new(id, version, topic.clone(), payload);

        let bytes = codec.encode_event(&event).unwrap();
        let decoded = codec.decode_event(id, version, topic, &bytes).unwrap();

        prop_assert_eq!(decoded, event);
    }

    #[test]
    fn encoding_the_same_event_twice_is_byte_identical(
        version in 0u64..10_000,
        payload in arb_payload(),
    ) {
        let codec = Transcoder::new();
        let event = DomainEvent::new(EntityId::new(), version, Topic::new("acct#Touched"), payload);

        let first = codec.encode_event(&event).unwrap();
        let second = codec.encode_event(&event).unwrap();

        prop_assert_eq!(first, second);
    }

    #[test]
    fn uuid_envelope_round_trips(bytes in any::<[u8; 16]>()) {
        let uuid = uuid::Uuid::from_bytes(bytes);
        let encoded = envelope::encode_uuid(uuid);
        let decoded = envelope::decode_uuid(&encoded).unwrap();
        prop_assert_eq!(decoded, uuid);
    }

    #[test]
    fn decimal_envelope_round_trips(units in -1_000_000i64..1_000_000, scale in 0u32..8) {
        let decimal = rust_decimal::Decimal::new(units, scale);
        let encoded = envelope::encode_decimal(decimal);
        let decoded = envelope::decode_decimal(&encoded).unwrap();
        prop_assert_eq!(decoded, decimal);
    }

    #[test]
    fn set_envelope_is_order_independent(mut values in prop::collection::vec(0i64..1000, 0..10)) {
        values.sort_unstable();
        values.dedup();
        let as_json: Vec<Value> = values.iter().map(|v| Value::from(*v)).collect();

        let mut shuffled = as_json.clone();
        shuffled.reverse();

        let a = envelope::encode_set(as_json);
        let b = envelope::encode_set(shuffled);

        prop_assert_eq!(a, b);
    }
}
