use crate::error::{self, Result};
use crate::helm::Helm;
use log::info;
use serde_json::{Map, Value};
use snafu::{ensure, ResultExt};
use std::path::Path;

/// Free-form sections of the values file that are allowed to stay untyped.
pub const DEFAULT_IGNORED_PATHS: [&str; 6] = [
    "/zitadel/configmapConfig",
    "/zitadel/secretConfig",
    "/extraManifests",
    "/metrics/serviceMonitor/tlsConfig",
    "/metrics/serviceMonitor/relabellings",
    "/metrics/serviceMonitor/metricRelabellings",
];

const STRING_MAP_MARKER: &str = "(map[string]string)";

fn is_primitive(kind: &str) -> bool {
    matches!(kind, "string" | "integer" | "boolean" | "number" | "null")
}

fn str_field<'a>(object: &'a Map<String, Value>, key: &str) -> &'a str {
    object.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Every property path in `schema` that is an opaque `object` or `array` without any nested
/// structure. References, primitives, arrays of primitives and objects documented as
/// `(map[string]string)` are typed. Paths in `ignored` are skipped with everything below them.
pub fn untyped_schema_paths(schema: &Value, ignored: &[&str]) -> Vec<String> {
    let mut failures = Vec::new();
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        walk(properties, "", ignored, &mut failures);
    }
    failures.sort();
    failures
}

fn walk(properties: &Map<String, Value>, path: &str, ignored: &[&str], failures: &mut Vec<String>) {
    for (name, property) in properties {
        let path = format!("{}/{}", path, name);
        if ignored.contains(&path.as_str()) {
            continue;
        }
        let property = match property.as_object() {
            Some(property) => property,
            None => continue,
        };
        if property.contains_key("$ref") {
            continue;
        }
        let nested = property.get("properties").and_then(Value::as_object);
        match str_field(property, "type") {
            kind if is_primitive(kind) => {}
            "array" => {
                let items = match property.get("items").and_then(Value::as_object) {
                    Some(items) => items,
                    None => {
                        failures.push(path);
                        continue;
                    }
                };
                if items.contains_key("$ref") {
                    continue;
                }
                match str_field(items, "type") {
                    "string" | "integer" | "boolean" | "number" => {}
                    "object" if str_field(items, "description").contains(STRING_MAP_MARKER) => {}
                    "object" => match items.get("properties").and_then(Value::as_object) {
                        Some(nested) => walk(nested, &format!("{}[]", path), ignored, failures),
                        None => failures.push(path),
                    },
                    _ => failures.push(path),
                }
            }
            "object" if str_field(property, "description").contains(STRING_MAP_MARKER) => {}
            "object" => match nested {
                Some(nested) => walk(nested, &path, ignored, failures),
                None => failures.push(path),
            },
            "" => {
                if let Some(nested) = nested {
                    walk(nested, &path, ignored, failures);
                }
            }
            _ => {}
        }
    }
}

/// Fails with the offending paths if the committed schema has untyped fields.
pub fn check_schema_typed(schema: &Value) -> Result<()> {
    let paths = untyped_schema_paths(schema, &DEFAULT_IGNORED_PATHS);
    ensure!(paths.is_empty(), error::UntypedSchemaSnafu { paths });
    Ok(())
}

pub fn read_json(path: &Path) -> Result<Value> {
    let data = std::fs::read(path).context(error::FileSnafu { path })?;
    serde_json::from_slice(&data).context(error::JsonParseSnafu {
        what: path.display().to_string(),
    })
}

/// The arguments that regenerate `values.schema.json` from `values.yaml` into `output`.
pub fn schema_args(values: &Path, output: &Path) -> Vec<String> {
    vec![
        "-f".to_string(),
        values.display().to_string(),
        "-o".to_string(),
        output.display().to_string(),
        "--draft".to_string(),
        "2020".to_string(),
        "--use-helm-docs".to_string(),
        "--k8s-schema-version".to_string(),
        "v1.30.0".to_string(),
    ]
}

/// Regenerates the schema of the chart at `chart` into a scratch directory and compares it with
/// the committed `values.schema.json` as JSON values.
pub async fn schema_in_sync(helm: &Helm, chart: &Path) -> Result<()> {
    let committed = read_json(&chart.join("values.schema.json"))?;
    let scratch = tempfile::tempdir().context(error::IoSnafu {
        action: "create scratch directory",
    })?;
    let generated_path = scratch.path().join("values.schema.json");
    let args = schema_args(&chart.join("values.yaml"), &generated_path);
    helm.schema(chart, &args).await?;
    let generated = read_json(&generated_path)?;
    ensure!(
        committed == generated,
        error::SchemaOutOfSyncSnafu {
            args: format!(
                "schema {}",
                schema_args(
                    &chart.join("values.yaml"),
                    &chart.join("values.schema.json")
                )
                .join(" ")
            ),
        }
    );
    info!("Values schema of '{}' is in sync", chart.display());
    Ok(())
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use serde_json::json;
    use std::io::Write;

    fn schema() -> Value {
        json!({
            "properties": {
                "replicaCount": {"type": "integer"},
                "podAnnotations": {"type": "object", "description": "Annotations (map[string]string)"},
                "resources": {"$ref": "https://k8s.io/api/core/v1/ResourceRequirements"},
                "imagePullSecrets": {"type": "array", "items": {"type": "string"}},
                "extraContainers": {"type": "array"},
                "tolerations": {"type": "array", "items": {"type": "object"}},
                "env": {"type": "array", "items": {"type": "object", "properties": {
                    "name": {"type": "string"},
                    "valueFrom": {"type": "object"}
                }}},
                "zitadel": {"properties": {
                    "masterkey": {"type": "string"},
                    "configmapConfig": {"type": "object"},
                    "dbSslCaCrt": {"type": "object"}
                }},
                "extraManifests": {"type": "array"}
            }
        })
    }

    #[test]
    fn finds_untyped_paths() {
        assert_eq!(
            untyped_schema_paths(&schema(), &DEFAULT_IGNORED_PATHS),
            vec![
                "/env[]/valueFrom",
                "/extraContainers",
                "/tolerations",
                "/zitadel/dbSslCaCrt"
            ]
        );
    }

    #[test]
    fn ignores_are_exact_paths() {
        let paths = untyped_schema_paths(&schema(), &[]);
        assert!(paths.contains(&"/zitadel/configmapConfig".to_string()));
        assert!(paths.contains(&"/extraManifests".to_string()));
    }

    #[test]
    fn typed_schema_passes() {
        let typed = json!({"properties": {"image": {"type": "object", "properties": {
            "repository": {"type": "string"},
            "pullPolicy": {"type": "string"}
        }}}});
        check_schema_typed(&typed).unwrap();
        assert!(matches!(
            check_schema_typed(&schema()),
            Err(Error::UntypedSchema { .. })
        ));
    }

    #[test]
    fn read_schema_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"properties": {}}"#).unwrap();
        assert_eq!(read_json(file.path()).unwrap(), json!({"properties": {}}));
        assert!(matches!(
            read_json(Path::new("/nonexistent/values.schema.json")),
            Err(Error::File { .. })
        ));
    }

    #[test]
    fn regenerate_args() {
        let args = schema_args(Path::new("values.yaml"), Path::new("/tmp/out.json"));
        assert_eq!(args[..4], ["-f", "values.yaml", "-o", "/tmp/out.json"]);
        assert_eq!(args.last().map(String::as_str), Some("v1.30.0"));
    }
}
