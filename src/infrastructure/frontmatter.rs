use crate::infrastructure::error::InfraError;
use serde_yaml::{Mapping, Value};

const DELIMITER: &str = "---";

/// Splits a note into its front-matter YAML and the remaining body.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix(DELIMITER)?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let marker = line.trim_end_matches(['\r', '\n']);
        if marker == DELIMITER || marker == "..." {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

fn parse_mapping(yaml: &str) -> Result<Mapping, InfraError> {
    if yaml.trim().is_empty() {
        return Ok(Mapping::new());
    }
    match serde_yaml::from_str::<Value>(yaml)? {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(Mapping::new()),
        other => Err(InfraError::TaskNote(format!(
            "front matter is not a mapping: {other:?}"
        ))),
    }
}

/// Sets `key` in the note's front matter, creating the block when the note has none.
/// Other keys keep their order and the body is left as it is.
pub fn set_frontmatter_field(content: &str, key: &str, value: &str) -> Result<String, InfraError> {
    let (mut mapping, body) = match split_frontmatter(content) {
        Some((yaml, body)) => (parse_mapping(yaml)?, body),
        None => (Mapping::new(), content),
    };
    mapping.insert(
        Value::String(key.to_string()),
        Value::String(value.to_string()),
    );
    let yaml = serde_yaml::to_string(&mapping)?;
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n{body}"))
}

pub fn read_frontmatter_field(content: &str, key: &str) -> Result<Option<String>, InfraError> {
    let Some((yaml, _)) = split_frontmatter(content) else {
        return Ok(None);
    };
    let mapping = parse_mapping(yaml)?;
    Ok(mapping.get(key).and_then(|value| match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }))
}
