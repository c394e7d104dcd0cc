/*!

Typed access to the output of `helm template`. The suites that only need rendered manifests parse
them here instead of installing the chart.

!*/

use crate::error::{self, Error, Result};
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use snafu::{ensure, ResultExt};

/// The documents of a rendered release, in the order Helm printed them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifests {
    documents: Vec<Value>,
}

impl Manifests {
    /// Splits `rendered` into its YAML documents. Documents that only hold comments, like the
    /// `# Source:` lines of templates that rendered nothing, are dropped.
    pub fn parse(rendered: &str) -> Result<Self> {
        let documents = split_documents(rendered)
            .into_iter()
            .filter(|document| has_content(document))
            .map(|document| {
                serde_yaml::from_str::<Value>(&document).context(error::SerdeYamlSnafu {
                    what: "rendered manifests",
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { documents })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// The `kind` of every document.
    pub fn kinds(&self) -> Vec<&str> {
        self.documents.iter().filter_map(kind).collect()
    }

    /// Every document of kind `K`.
    pub fn of_kind<K>(&self) -> Result<Vec<K>>
    where
        K: k8s_openapi::Resource + DeserializeOwned,
    {
        self.documents
            .iter()
            .filter(|document| kind(document) == Some(K::KIND))
            .map(|document| {
                serde_yaml::from_value(document.clone()).context(error::SerdeYamlSnafu {
                    what: K::KIND,
                })
            })
            .collect()
    }

    /// The only document of kind `K`.
    pub fn single<K>(&self) -> Result<K>
    where
        K: k8s_openapi::Resource + DeserializeOwned,
    {
        let mut objects = self.of_kind::<K>()?;
        ensure!(
            objects.len() <= 1,
            error::MismatchSnafu {
                what: format!("number of rendered {} objects", K::KIND),
                expected: "1",
                actual: objects.len().to_string(),
            }
        );
        objects.pop().ok_or_else(|| Error::NotFound {
            what: format!("a rendered {}", K::KIND),
        })
    }
}

fn split_documents(rendered: &str) -> Vec<String> {
    let mut documents = vec![String::new()];
    for line in rendered.lines() {
        if line.trim_end() == "---" {
            documents.push(String::new());
        } else if let Some(current) = documents.last_mut() {
            current.push_str(line);
            current.push('\n');
        }
    }
    documents
}

fn has_content(document: &str) -> bool {
    document.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with('#')
    })
}

fn kind(document: &Value) -> Option<&str> {
    document.get("kind").and_then(Value::as_str)
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::rbac::v1::{Role, RoleBinding};

    const RBAC: &str = r#"---
# Source: zitadel/templates/rbac_zitadel.yaml
apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: rbac-labels
  namespace: default
  labels:
    app.kubernetes.io/name: zitadel
rules:
  - apiGroups: [""]
    resources: ["secrets"]
    verbs: ["get", "create"]
---
# Source: zitadel/templates/rbac_zitadel.yaml
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: rbac-labels
  namespace: default
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: Role
  name: rbac-labels
subjects:
  - kind: ServiceAccount
    name: rbac-labels
    namespace: default
"#;

    #[test]
    fn splits_documents_by_kind() {
        let manifests = Manifests::parse(RBAC).unwrap();
        assert_eq!(manifests.kinds(), vec!["Role", "RoleBinding"]);
        let role: Role = manifests.single().unwrap();
        assert_eq!(role.metadata.name.as_deref(), Some("rbac-labels"));
        assert_eq!(
            role.metadata.labels.unwrap().get("app.kubernetes.io/name"),
            Some(&"zitadel".to_string())
        );
        let bindings: Vec<RoleBinding> = manifests.of_kind().unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].role_ref.name, "rbac-labels");
    }

    #[test]
    fn comment_only_documents_are_dropped() {
        let manifests = Manifests::parse("---\n# Source: zitadel/templates/hpa_login.yaml\n").unwrap();
        assert!(manifests.is_empty());
        assert!(matches!(
            manifests.single::<Deployment>(),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn more_than_one_is_not_single() {
        let twice = format!("{}{}", RBAC, RBAC);
        let manifests = Manifests::parse(&twice).unwrap();
        assert_eq!(manifests.len(), 4);
        assert!(matches!(
            manifests.single::<Role>(),
            Err(Error::Mismatch { .. })
        ));
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(matches!(
            Manifests::parse("kind: [Role"),
            Err(Error::SerdeYaml { .. })
        ));
    }
}
