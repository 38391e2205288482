use llama_core::{ChatError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;
use std::env;

// Supports both ${VAR} and ${VAR:-default}
static ENV_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex pattern")
});

/// Recursively substitute environment variables in every string scalar of a YAML document
pub fn substitute_env_vars(value: &mut Value) -> Result<()> {
    match value {
        Value::String(s) => {
            *s = substitute_in_string(s)?;
        }
        Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Tagged(tagged) => {
            substitute_env_vars(&mut tagged.value)?;
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

fn substitute_in_string(input: &str) -> Result<String> {
    let mut missing_vars = Vec::new();

    let result = ENV_VAR_REGEX.replace_all(input, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing_vars.push(var_name.to_string());
                    String::new()
                }
            },
        }
    });

    if !missing_vars.is_empty() {
        return Err(ChatError::Config(format!(
            "Missing required environment variables: {}. Please set these variables before loading the configuration.",
            missing_vars.join(", ")
        )));
    }

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_env_vars() {
        env::set_var("LLAMA_CHAT_TEST_VAR", "test_value");

        let mut value: Value = serde_yaml::from_str(
            r#"
path: "${LLAMA_CHAT_TEST_VAR}/some/path"
default: "${LLAMA_CHAT_NON_EXISTENT:-default_value}"
nested:
  value: "${LLAMA_CHAT_TEST_VAR}"
list:
  - "${LLAMA_CHAT_TEST_VAR}"
count: 3
"#,
        )
        .unwrap();

        substitute_env_vars(&mut value).unwrap();

        assert_eq!(value["path"].as_str(), Some("test_value/some/path"));
        assert_eq!(value["default"].as_str(), Some("default_value"));
        assert_eq!(value["nested"]["value"].as_str(), Some("test_value"));
        assert_eq!(value["list"][0].as_str(), Some("test_value"));
        assert_eq!(value["count"].as_u64(), Some(3));

        env::remove_var("LLAMA_CHAT_TEST_VAR");
    }

    #[test]
    fn test_missing_variable_is_reported() {
        let mut value = Value::String("${LLAMA_CHAT_DEFINITELY_UNSET}".into());
        let err = substitute_env_vars(&mut value).unwrap_err();
        assert!(err.to_string().contains("LLAMA_CHAT_DEFINITELY_UNSET"));
    }

    #[test]
    fn test_plain_strings_are_untouched() {
        let mut value = Value::String("no variables $HERE".into());
        substitute_env_vars(&mut value).unwrap();
        assert_eq!(value.as_str(), Some("no variables $HERE"));
    }
}
