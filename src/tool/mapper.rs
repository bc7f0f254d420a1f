//! Unknown-tool-request mapper: security gate → cache → discovery →
//! fallback mapping → version check (§4.5 Mapper contract).

use super::ToolCategory;
use crate::config::ToolMapperConfig;
use crate::event_bus::EventBus;
use crate::store::{BoundedStore, EvictionPolicy};
use crate::types::error::ToolError;
use crate::types::event::{event_type, Event};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownToolRequest {
    pub tool_type: String,
    pub parameters: serde_json::Value,
    /// Only the fields that participate in the cache key are kept here;
    /// full request context lives with the caller.
    pub context_subset: serde_json::Value,
    pub required_version: Option<String>,
    pub external: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionCompatibility {
    Compatible,
    Incompatible,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMappingResult {
    pub tool_name: String,
    pub category: ToolCategory,
    pub confidence: f32,
    pub from_cache: bool,
    pub version_compatibility: Option<VersionCompatibility>,
    /// True whenever a tool name was produced, via discovery or fallback.
    /// Only a security-gate rejection (returned as an `Err`, never as this
    /// struct) counts as unsuccessful.
    pub success: bool,
    /// Set when `discover()` found no matching family and `fallback()`'s
    /// lower-confidence heuristics were used instead.
    pub fallback_used: bool,
    /// Set once discovery has been attempted for this request (always true
    /// off the non-cached path; `false` only for a cache hit, which skips
    /// discovery entirely).
    pub discovery_attempted: bool,
    pub security_reason: Option<String>,
    pub processing_ms: u64,
}

const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf",
    "format c:",
    "mkfs",
    "sudo ",
    "chmod 777",
    ":(){ :|:& };:",
];

pub struct ToolMapper {
    config: ToolMapperConfig,
    cache: BoundedStore<String, ToolMappingResult>,
    bus: EventBus,
}

impl ToolMapper {
    pub fn new(config: ToolMapperConfig, bus: EventBus) -> Result<Self, ToolError> {
        if config.fallback_timeout_ms < 1000 {
            return Err(ToolError::InvalidConfig(
                "fallbackTimeout must be >= 1000ms".into(),
            ));
        }
        let cache_store_config = crate::config::StoreConfig {
            max_size: 10_000,
            default_ttl: Some(config.cache_ttl),
        };
        Ok(Self {
            config,
            cache: BoundedStore::new(EvictionPolicy::Ttl, &cache_store_config),
            bus,
        })
    }

    pub fn map(&self, request: &UnknownToolRequest) -> Result<ToolMappingResult, ToolError> {
        let started = std::time::Instant::now();

        // 1. Security gate.
        if let Some(reason) = self.security_violation(request) {
            let _ = self.bus.publish(Event::new(
                event_type::TOOL_MAPPING_ERROR,
                "tool_mapper",
                None,
                serde_json::json!({ "toolType": request.tool_type, "securityReason": reason }),
            ));
            return Err(ToolError::SecurityViolation(reason));
        }

        // 2. Cache lookup.
        let key = self.cache_key(request);
        if let Some(mut cached) = self.cache.get(&key) {
            cached.from_cache = true;
            cached.discovery_attempted = false;
            cached.processing_ms = started.elapsed().as_millis() as u64;
            return Ok(cached);
        }

        // 3. Discovery + 4. Fallback mapping.
        let mut result = self
            .discover(&request.tool_type)
            .unwrap_or_else(|| self.fallback(&request.tool_type));
        result.from_cache = false;

        // 5. Version check.
        if let Some(required) = &request.required_version {
            result.version_compatibility = Some(self.check_version(required));
        }

        result.processing_ms = started.elapsed().as_millis() as u64;
        self.cache.set(key, result.clone())?;
        let _ = self.bus.publish(Event::new(
            event_type::TOOL_MAPPING_COMPLETED,
            "tool_mapper",
            None,
            serde_json::json!({
                "toolType": request.tool_type,
                "mapped": result.tool_name,
                "fallbackUsed": result.fallback_used,
            }),
        ));
        Ok(result)
    }

    fn security_violation(&self, request: &UnknownToolRequest) -> Option<String> {
        let haystack = format!(
            "{} {}",
            request.tool_type,
            request.parameters.to_string().to_ascii_lowercase()
        );
        let haystack = haystack.to_ascii_lowercase();
        for pattern in DANGEROUS_PATTERNS {
            if haystack.contains(pattern) {
                return Some(format!("matches dangerous pattern: {pattern}"));
            }
        }
        if request.external && !self.config.allow_external_tools {
            return Some("external tools are disabled".to_string());
        }
        None
    }

    fn cache_key(&self, request: &UnknownToolRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.tool_type.as_bytes());
        hasher.update(request.parameters.to_string().as_bytes());
        hasher.update(request.context_subset.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn discover(&self, tool_type: &str) -> Option<ToolMappingResult> {
        let lower = tool_type.to_ascii_lowercase();
        let (name, category) = if lower.contains("search") {
            ("web-search", ToolCategory::Search)
        } else if lower.contains("file") {
            ("file-read", ToolCategory::File)
        } else if lower.contains("data") || lower.contains("analysis") {
            ("database-query", ToolCategory::Data)
        } else if lower.contains("visual") {
            ("visualization-render", ToolCategory::Visualization)
        } else if lower.contains("ml") || lower.contains("model") {
            ("model-invoke", ToolCategory::Ml)
        } else {
            return None;
        };
        Some(ToolMappingResult {
            tool_name: name.to_string(),
            category,
            confidence: 0.9,
            from_cache: false,
            version_compatibility: None,
            success: true,
            fallback_used: false,
            discovery_attempted: true,
            security_reason: None,
            processing_ms: 0,
        })
    }

    fn fallback(&self, tool_type: &str) -> ToolMappingResult {
        let lower = tool_type.to_ascii_lowercase();
        let (name, category, confidence) = if lower.contains("search") {
            ("web-search", ToolCategory::Search, 0.6)
        } else if lower.contains("file") {
            ("file-read", ToolCategory::File, 0.6)
        } else if lower.contains("data") {
            ("database-query", ToolCategory::Data, 0.5)
        } else {
            ("web-search", ToolCategory::Generic, 0.3)
        };
        ToolMappingResult {
            tool_name: name.to_string(),
            category,
            confidence,
            from_cache: false,
            version_compatibility: None,
            success: true,
            fallback_used: true,
            discovery_attempted: true,
            security_reason: None,
            processing_ms: 0,
        }
    }

    fn check_version(&self, required: &str) -> VersionCompatibility {
        match required.split('.').next().and_then(|v| v.parse::<u32>().ok()) {
            Some(major) if major <= 1 => VersionCompatibility::Compatible,
            Some(_) => VersionCompatibility::Incompatible,
            None => VersionCompatibility::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;

    fn mapper() -> ToolMapper {
        ToolMapper::new(ToolMapperConfig::default(), EventBus::new(&BusConfig::default())).unwrap()
    }

    fn request(tool_type: &str) -> UnknownToolRequest {
        UnknownToolRequest {
            tool_type: tool_type.to_string(),
            parameters: serde_json::json!({}),
            context_subset: serde_json::json!({}),
            required_version: None,
            external: false,
        }
    }

    #[test]
    fn security_gate_rejects_dangerous_pattern() {
        let mapper = mapper();
        let mut req = request("shell-exec");
        req.parameters = serde_json::json!({ "cmd": "rm -rf /" });
        assert!(matches!(mapper.map(&req), Err(ToolError::SecurityViolation(_))));
    }

    #[test]
    fn external_tools_disabled_rejects_external_request() {
        let mut config = ToolMapperConfig::default();
        config.allow_external_tools = false;
        let mapper = ToolMapper::new(config, EventBus::new(&BusConfig::default())).unwrap();
        let mut req = request("custom-search");
        req.external = true;
        assert!(matches!(mapper.map(&req), Err(ToolError::SecurityViolation(_))));
    }

    #[test]
    fn discovery_maps_known_family() {
        let mapper = mapper();
        let result = mapper.map(&request("web-search-tool")).unwrap();
        assert_eq!(result.tool_name, "web-search");
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn fallback_maps_unknown_type_to_generic() {
        let mapper = mapper();
        let result = mapper.map(&request("frobnicate-widget")).unwrap();
        assert_eq!(result.tool_name, "web-search");
        assert_eq!(result.category, ToolCategory::Generic);
    }

    #[test]
    fn cache_hit_sets_from_cache_flag() {
        let mapper = mapper();
        let req = request("file-thing");
        let first = mapper.map(&req).unwrap();
        assert!(!first.from_cache);
        assert!(first.discovery_attempted);
        let second = mapper.map(&req).unwrap();
        assert!(second.from_cache);
        assert!(!second.discovery_attempted);
    }

    #[test]
    fn discovery_hit_reports_no_fallback() {
        let mapper = mapper();
        let result = mapper.map(&request("web-search-tool")).unwrap();
        assert!(result.success);
        assert!(!result.fallback_used);
        assert!(result.discovery_attempted);
        assert!(result.security_reason.is_none());
    }

    #[test]
    fn construction_rejects_short_fallback_timeout() {
        let mut config = ToolMapperConfig::default();
        config.fallback_timeout_ms = 10;
        assert!(ToolMapper::new(config, EventBus::new(&BusConfig::default())).is_err());
    }

    #[test]
    fn version_check_flags_incompatible_major() {
        let mapper = mapper();
        let mut req = request("data-query");
        req.required_version = Some("2.0".to_string());
        let result = mapper.map(&req).unwrap();
        assert_eq!(
            result.version_compatibility,
            Some(VersionCompatibility::Incompatible)
        );
    }
}
