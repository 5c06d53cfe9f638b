#![no_main]

use libfuzzer_sys::fuzz_target;
use lifeline_events::{extract_array, extract_structured, EventNode, JsonShape};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);

    if let Ok(value) = extract_structured(&raw, JsonShape::Object) {
        assert!(value.is_object());
    }

    if let Ok(items) = extract_array(&raw) {
        let clean = serde_json::to_string(&items).expect("values serialize");
        let again = extract_array(&clean).expect("clean output must re-extract");
        assert_eq!(again, items);
        for item in &items {
            if let Ok(node) = EventNode::from_llm_value(item) {
                assert!(node.event_id.is_empty());
                assert!(node.subevent.is_empty());
                assert!(!node.name.trim().is_empty());
            }
        }
    }
});
