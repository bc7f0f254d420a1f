//! S3. Tool mapper falls back safely: a tool type that matches none of the
//! discovery families still gets mapped, at reduced confidence, and the
//! mapping is announced on the bus.

use agentmesh_core::config::{BusConfig, ToolMapperConfig};
use agentmesh_core::event_bus::EventBus;
use agentmesh_core::tool::mapper::{ToolMapper, UnknownToolRequest};
use agentmesh_core::tool::ToolCategory;

#[tokio::test]
async fn unknown_tool_type_maps_through_fallback() {
    let bus = EventBus::new(&BusConfig::default());
    let (_id, mut completed_rx) = bus.subscribe("tool.mapping.completed");
    let mapper = ToolMapper::new(ToolMapperConfig::default(), bus).unwrap();

    // "quantum-widget-doohickey" matches none of discover()'s family
    // substrings ("search"/"file"/"data"/"analysis"/"visual"/"ml"/"model"),
    // so it must fall through to fallback()'s generic branch.
    let request = UnknownToolRequest {
        tool_type: "quantum-widget-doohickey".to_string(),
        parameters: serde_json::json!({}),
        context_subset: serde_json::json!({}),
        required_version: None,
        external: false,
    };

    let result = mapper.map(&request).unwrap();
    assert_eq!(result.tool_name, "web-search");
    assert_eq!(result.category, ToolCategory::Generic);
    assert!(result.confidence >= 0.3);
    assert!(!result.from_cache);
    assert!(result.success);
    assert!(result.fallback_used);
    assert!(result.discovery_attempted);

    let event = completed_rx
        .recv()
        .await
        .expect("tool.mapping.completed published");
    assert_eq!(event.data["toolType"], "quantum-widget-doohickey");
    assert_eq!(event.data["mapped"], "web-search");
    assert_eq!(event.data["fallbackUsed"], true);
}
