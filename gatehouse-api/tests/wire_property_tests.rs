//! Property-Based Tests for Cache Keys and Engine Wire Shapes
//!
//! A request's cache key depends on its content, never on the order its
//! JSON keys arrived in, and a message carried through either engine's
//! wire shape comes back unchanged. Carried from one engine's shape to the
//! other's, a message keeps every field both engines share.

use gatehouse_api::dispatch::{
    EntityRequest, ObjectMessageA, ObjectMessageB, ObjectRequest, ObjectResponse, ObjectResponseB, WireShape,
};
use gatehouse_api::response_cache::{cache_key, decode_key, fingerprint};
use gatehouse_core::EngineClass;
use gatehouse_test_utils::generators::{arb_engine_class, arb_json_entries, arb_json_value, arb_table_slug};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn to_map(entries: Vec<(String, Value)>) -> Map<String, Value> {
    entries.into_iter().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_cache_key_ignores_key_order(
        table_slug in arb_table_slug(),
        entries in arb_json_entries(),
        env in "[a-z0-9-]{1,16}",
    ) {
        let mut reversed = entries.clone();
        reversed.reverse();

        let first = ObjectRequest {
            table_slug: table_slug.clone(),
            project_id: env.clone(),
            data: to_map(entries),
        };
        let second = ObjectRequest {
            data: to_map(reversed),
            ..first.clone()
        };

        let fp_first = fingerprint(&first).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let fp_second = fingerprint(&second).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(&fp_first, &fp_second);

        let key = cache_key(&table_slug, &fp_first, &env);
        prop_assert_eq!(&key, &cache_key(&table_slug, &fp_second, &env));
        prop_assert_eq!(decode_key(&key), Some(format!("{}|{}|{}", table_slug, fp_first, env)));
    }

    #[test]
    fn prop_distinct_data_distinct_fingerprint(
        entries in arb_json_entries(),
        extra in arb_json_value(),
    ) {
        let data = to_map(entries);
        let mut changed = data.clone();
        // A key outside the generator's alphabet cannot collide with an existing one.
        changed.insert("X-extra".to_string(), extra);

        let fp = fingerprint(&data).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let fp_changed = fingerprint(&changed).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_ne!(fp, fp_changed);
    }

    #[test]
    fn prop_object_request_survives_either_engine(
        engine in arb_engine_class(),
        table_slug in arb_table_slug(),
        entries in arb_json_entries(),
        env in "[a-z0-9-]{1,16}",
    ) {
        let req = ObjectRequest {
            table_slug,
            project_id: env,
            data: to_map(entries),
        };
        let wire = req.encode(engine).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let back = ObjectRequest::decode(engine, wire).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(back, req);
    }

    #[test]
    fn prop_entity_request_survives_either_engine(
        engine in arb_engine_class(),
        id in prop::option::of("[a-z0-9-]{1,16}"),
        entries in arb_json_entries(),
        env in "[a-z0-9-]{1,16}",
    ) {
        let req = EntityRequest {
            project_id: env,
            id,
            data: to_map(entries),
        };
        let wire = req.encode(engine).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let back = EntityRequest::decode(engine, wire).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(back, req);
    }

    #[test]
    fn prop_engine_b_answer_decodes_like_engine_a(
        table_slug in arb_table_slug(),
        data in arb_json_value(),
        is_cached in any::<bool>(),
        custom_message in "[a-z ]{0,24}",
    ) {
        let mut raw = serde_json::json!({
            "table_slug": table_slug,
            "data": data,
            "is_cached": is_cached,
        });
        let from_a = ObjectResponse::decode(EngineClass::A, raw.clone())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        raw["custom_message"] = Value::String(custom_message);
        let from_b = ObjectResponse::decode(EngineClass::B, raw)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(from_a, from_b);
    }

    #[test]
    fn prop_engine_a_message_carries_into_engine_b(
        table_slug in arb_table_slug(),
        entries in arb_json_entries(),
        project_id in "[a-z0-9-]{1,16}",
    ) {
        let a = ObjectMessageA {
            table_slug,
            project_id,
            data: to_map(entries),
        };
        let raw_a = serde_json::to_value(&a).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let common = ObjectRequest::decode(EngineClass::A, raw_a)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let raw_b = common.encode(EngineClass::B).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let b: ObjectMessageB = serde_json::from_value(raw_b).map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(&b, &ObjectMessageB {
            table_slug: a.table_slug.clone(),
            project_id: a.project_id.clone(),
            data: a.data.clone(),
            env_id: String::new(),
            blocked_builder: false,
        });

        // And back again.
        let raw_b = serde_json::to_value(&b).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let common = ObjectRequest::decode(EngineClass::B, raw_b)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let raw_a = common.encode(EngineClass::A).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let back: ObjectMessageA = serde_json::from_value(raw_a).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(back, a);
    }

    #[test]
    fn prop_engine_b_message_carries_into_engine_a(
        table_slug in arb_table_slug(),
        entries in arb_json_entries(),
        project_id in "[a-z0-9-]{1,16}",
        env_id in "[a-z0-9-]{0,16}",
        blocked_builder in any::<bool>(),
    ) {
        let b = ObjectMessageB {
            table_slug,
            project_id,
            data: to_map(entries),
            env_id,
            blocked_builder,
        };
        let raw_b = serde_json::to_value(&b).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let common = ObjectRequest::decode(EngineClass::B, raw_b)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let raw_a = common.encode(EngineClass::A).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(raw_a.get("env_id").is_none());
        prop_assert!(raw_a.get("blocked_builder").is_none());
        let a: ObjectMessageA = serde_json::from_value(raw_a).map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(a, ObjectMessageA {
            table_slug: b.table_slug.clone(),
            project_id: b.project_id.clone(),
            data: b.data.clone(),
        });
    }

    #[test]
    fn prop_engine_b_answer_carries_into_engine_a(
        table_slug in arb_table_slug(),
        data in arb_json_value(),
        is_cached in any::<bool>(),
        custom_message in "[a-z ]{0,24}",
    ) {
        let b = ObjectResponseB {
            table_slug,
            data,
            is_cached,
            custom_message,
        };
        let raw_b = serde_json::to_value(&b).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let common = ObjectResponse::decode(EngineClass::B, raw_b)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let raw_a = common.encode(EngineClass::A).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(raw_a.get("custom_message").is_none());

        let a = ObjectResponse::decode(EngineClass::A, raw_a)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let raw_b = a.encode(EngineClass::B).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let back: ObjectResponseB = serde_json::from_value(raw_b).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(back, ObjectResponseB { custom_message: String::new(), ..b });
    }
}
