use serde_json::{Map, Value};

use crate::core::errors::RagError;

const SEARCH_PROVIDERS: [&str; 5] = ["serpapi", "google", "brave", "bing", "duckduckgo"];

pub fn validate_config(config: &Value) -> Result<(), RagError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(search) = expect_optional_object(root, "search")? {
        validate_enum_field(search, "search.provider", "provider", &SEARCH_PROVIDERS)?;
        validate_u64_field(search, "search.max_results", "max_results", 1, 100)?;
        validate_u64_field(search, "search.timeout_secs", "timeout_secs", 1, 600)?;
        for key in ["location", "hl", "gl", "google_domain"] {
            validate_optional_string_field(search, &format!("search.{}", key), key)?;
        }
    }

    if let Some(fetch) = expect_optional_object(root, "fetch")? {
        validate_optional_string_field(fetch, "fetch.user_agent", "user_agent")?;
        validate_u64_field(fetch, "fetch.interval_ms", "interval_ms", 0, 60_000)?;
        validate_u64_field(fetch, "fetch.timeout_secs", "timeout_secs", 1, 600)?;
        validate_u64_field(fetch, "fetch.max_bytes", "max_bytes", 1024, 100_000_000)?;
        validate_bool_field(fetch, "fetch.block_private_hosts", "block_private_hosts")?;
        validate_string_array_field(fetch, "fetch.url_denylist", "url_denylist")?;
    }

    if let Some(chunking) = expect_optional_object(root, "chunking")? {
        validate_u64_field(chunking, "chunking.chunk_size", "chunk_size", 1, 1_000_000)?;
        validate_u64_field(
            chunking,
            "chunking.chunk_overlap",
            "chunk_overlap",
            0,
            1_000_000,
        )?;
        let size = chunking.get("chunk_size").and_then(|v| v.as_u64());
        let overlap = chunking.get("chunk_overlap").and_then(|v| v.as_u64());
        if let (Some(size), Some(overlap)) = (size, overlap) {
            if overlap >= size {
                return Err(RagError::BadRequest(format!(
                    "Invalid config at 'chunking.chunk_overlap': {} must be smaller than chunk_size {}",
                    overlap, size
                )));
            }
        }
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_required_string_field(embedding, "embedding.base_url", "base_url")?;
        validate_required_string_field(embedding, "embedding.model", "model")?;
        validate_u64_field(embedding, "embedding.batch_size", "batch_size", 1, 4096)?;
        validate_u64_field(embedding, "embedding.timeout_secs", "timeout_secs", 1, 3600)?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(retrieval, "retrieval.search_k", "search_k", 1, 1000)?;
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 1000)?;
        validate_u64_field(retrieval, "retrieval.token_limit", "token_limit", 1, 1_000_000)?;
        validate_bool_field(retrieval, "retrieval.keyword_fallback", "keyword_fallback")?;
    }

    if let Some(llm) = expect_optional_object(root, "llm")? {
        validate_required_string_field(llm, "llm.base_url", "base_url")?;
        validate_required_string_field(llm, "llm.model", "model")?;
        validate_u64_field(llm, "llm.timeout_secs", "timeout_secs", 1, 3600)?;
        validate_i64_field(llm, "llm.max_tokens", "max_tokens", 1, 1_000_000)?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, RagError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(RagError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_i64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: i64,
    max: i64,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(number) = value.as_i64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(RagError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_required_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
    // Sections are merged over defaults, so an absent key is fine.
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if text.trim().is_empty() {
        return Err(RagError::BadRequest(format!(
            "Invalid config at '{}': value cannot be empty",
            path
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_str().is_none() {
        return Err(config_type_error(path, "string"));
    }
    Ok(())
}

fn validate_enum_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    allowed: &[&str],
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if !allowed.contains(&text) {
        return Err(RagError::BadRequest(format!(
            "Invalid config at '{}': expected one of {}",
            path,
            allowed.join(", ")
        )));
    }
    Ok(())
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(RagError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> RagError {
    RagError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
