//! Template processing
//!
//! Loads an OpenShift `Template` (JSON or YAML), resolves its parameters,
//! substitutes them into the template objects and stamps the template labels
//! onto every object. The rendered objects are then created one by one.
//!
//! # Parameter substitution
//!
//! - `${NAME}` anywhere in a string is replaced by the parameter value.
//! - A string that is exactly `${{NAME}}` is replaced by the value parsed as
//!   JSON, so `"${{REPLICAS}}"` becomes the number `3`.
//! - Placeholders naming undeclared parameters are left untouched.
//!
//! # Example
//!
//! ```ignore
//! let rendered = template::render("file:///tmp/eap.json", &params, &labels).await?;
//! let created = template::apply(client.as_ref(), "itest", &rendered).await?;
//! ```

use crate::client::{ClusterClient, ClusterError, Labels};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Errors from template processing
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Failed to fetch template {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to parse template {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("Missing value for required template parameter: {0}")]
    MissingParameter(String),

    #[error("Template object #{index} is invalid: {reason}")]
    InvalidObject { index: usize, reason: String },

    #[error("Template apply failed after creating {} object(s): {source}", .created.len())]
    PartialApply {
        created: Vec<DynamicObject>,
        source: ClusterError,
    },
}

/// OpenShift `Template`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Template {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub objects: Vec<Value>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Template parameter declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Only `expression` is understood
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<String>,
    /// Generator expression, e.g. `[a-zA-Z0-9]{16}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Objects produced by rendering a template, in template order
#[derive(Debug, Clone, Default)]
pub struct RenderedTemplate {
    /// Template name, if the template had one
    pub name: Option<String>,
    /// Labels stamped onto every object
    pub labels: Labels,
    pub objects: Vec<DynamicObject>,
}

/// Fetch the raw template text from a URL or path
///
/// Supports `http://`, `https://`, `file://` and bare filesystem paths.
pub async fn fetch(url: &str) -> Result<String, TemplateError> {
    let fetch_err = |reason: String| TemplateError::Fetch {
        url: url.to_string(),
        reason,
    };

    if url.starts_with("http://") || url.starts_with("https://") {
        let response = reqwest::get(url)
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| fetch_err(e.to_string()))?;
        return response.text().await.map_err(|e| fetch_err(e.to_string()));
    }

    let path = url.strip_prefix("file://").unwrap_or(url);
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| fetch_err(e.to_string()))
}

/// Parse template text (JSON is accepted as YAML)
pub fn parse(url: &str, text: &str) -> Result<Template, TemplateError> {
    let template: Template = serde_yaml::from_str(text).map_err(|e| TemplateError::Parse {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match template.kind.as_deref() {
        None | Some("Template") => Ok(template),
        Some(other) => Err(TemplateError::Parse {
            url: url.to_string(),
            reason: format!("expected kind Template, got {other}"),
        }),
    }
}

/// Fetch, parse and render a template
pub async fn render(
    url: &str,
    parameters: &BTreeMap<String, String>,
    extra_labels: &Labels,
) -> Result<RenderedTemplate, TemplateError> {
    let text = fetch(url).await?;
    let template = parse(url, &text)?;

    debug!(
        url = %url,
        template = ?template.metadata.name,
        objects = template.objects.len(),
        "Loaded template"
    );

    template.render(parameters, extra_labels)
}

/// Create every rendered object in order
///
/// Stops at the first failure. The objects created so far are returned in
/// [`TemplateError::PartialApply`] so the caller can roll them back.
pub async fn apply(
    client: &dyn ClusterClient,
    namespace: &str,
    rendered: &RenderedTemplate,
) -> Result<Vec<DynamicObject>, TemplateError> {
    let mut created = Vec::with_capacity(rendered.objects.len());

    for object in &rendered.objects {
        match client.create_object(namespace, object).await {
            Ok(obj) => created.push(obj),
            Err(source) => return Err(TemplateError::PartialApply { created, source }),
        }
    }

    info!(
        namespace = %namespace,
        template = ?rendered.name,
        count = created.len(),
        "Created template objects"
    );

    Ok(created)
}

/// Service account named by an object's pod template, if any
#[must_use]
pub fn service_account_of(object: &DynamicObject) -> Option<&str> {
    let pod_spec = object.data.get("spec")?.get("template")?.get("spec")?;
    pod_spec
        .get("serviceAccountName")
        .or_else(|| pod_spec.get("serviceAccount"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

impl Template {
    /// Resolve parameters, substitute them and stamp labels
    ///
    /// `extra_labels` are merged into the template's own labels first.
    pub fn render(
        mut self,
        parameters: &BTreeMap<String, String>,
        extra_labels: &Labels,
    ) -> Result<RenderedTemplate, TemplateError> {
        self.labels
            .extend(extra_labels.iter().map(|(k, v)| (k.clone(), v.clone())));

        let values = self.resolve_parameters(parameters)?;

        let objects = std::mem::take(&mut self.objects)
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                let mut object: DynamicObject = serde_json::from_value(substitute(raw, &values))
                    .map_err(|e| TemplateError::InvalidObject {
                        index,
                        reason: e.to_string(),
                    })?;

                if object.types.is_none() {
                    return Err(TemplateError::InvalidObject {
                        index,
                        reason: "missing apiVersion/kind".to_string(),
                    });
                }

                object
                    .metadata
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .extend(self.labels.iter().map(|(k, v)| (k.clone(), v.clone())));

                Ok(object)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RenderedTemplate {
            name: self.metadata.name,
            labels: self.labels,
            objects,
        })
    }

    /// Final value of every declared parameter
    fn resolve_parameters(
        &self,
        supplied: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, TemplateError> {
        for name in supplied.keys() {
            if !self.parameters.iter().any(|p| &p.name == name) {
                warn!(
                    template = ?self.metadata.name,
                    parameter = %name,
                    "Ignoring value for undeclared template parameter"
                );
            }
        }

        let mut values = BTreeMap::new();
        for param in &self.parameters {
            let value = supplied
                .get(&param.name)
                .cloned()
                .or_else(|| param.value.clone().filter(|v| !v.is_empty()))
                .or_else(|| match (param.generate.as_deref(), param.from.as_deref()) {
                    (Some("expression"), Some(expr)) => generate(expr),
                    _ => None,
                });

            match value {
                Some(v) => {
                    values.insert(param.name.clone(), v);
                }
                None if param.required => {
                    return Err(TemplateError::MissingParameter(param.name.clone()));
                }
                None => {
                    values.insert(param.name.clone(), String::new());
                }
            }
        }

        Ok(values)
    }
}

fn substitute(value: Value, values: &BTreeMap<String, String>) -> Value {
    match value {
        Value::String(s) => substitute_string(&s, values),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| substitute(v, values)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute(v, values)))
                .collect(),
        ),
        other => other,
    }
}

fn substitute_string(s: &str, values: &BTreeMap<String, String>) -> Value {
    if s.starts_with("${{") {
        if let Some((name, len)) = placeholder(s) {
            if len == s.len() {
                if let Some(v) = values.get(name) {
                    return serde_json::from_str(v).unwrap_or_else(|_| Value::String(v.clone()));
                }
            }
        }
    }
    Value::String(expand(s, values))
}

fn expand(input: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        if let Some((name, len)) = placeholder(tail) {
            match values.get(name) {
                Some(v) => out.push_str(v),
                None => out.push_str(&tail[..len]),
            }
            rest = &tail[len..];
        } else {
            out.push_str("${");
            rest = &tail[2..];
        }
    }

    out.push_str(rest);
    out
}

/// `${NAME}` or `${{NAME}}` at the start of `s`: the name and placeholder length
fn placeholder(s: &str) -> Option<(&str, usize)> {
    let is_name = |n: &str| !n.is_empty() && n.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if let Some(inner) = s.strip_prefix("${{") {
        let end = inner.find("}}")?;
        let name = &inner[..end];
        return is_name(name).then_some((name, end + 5));
    }

    let inner = s.strip_prefix("${")?;
    let end = inner.find('}')?;
    let name = &inner[..end];
    is_name(name).then_some((name, end + 3))
}

/// Random bytes drawn from v4 UUIDs
#[derive(Default)]
struct Entropy {
    pool: Vec<u8>,
}

impl Entropy {
    fn pick(&mut self, len: usize) -> usize {
        if self.pool.is_empty() {
            self.pool.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        }
        usize::from(self.pool.pop().unwrap_or_default()) % len
    }
}

fn escape_class(c: char) -> Option<Vec<char>> {
    match c {
        'w' => Some(('a'..='z').chain('A'..='Z').chain('0'..='9').chain(['_']).collect()),
        'd' => Some(('0'..='9').collect()),
        'a' => Some(('a'..='z').chain('A'..='Z').collect()),
        'A' => Some("~!@#$%^&*()-_+={}[]\\|<,>.?/\"';:`".chars().collect()),
        _ => None,
    }
}

fn char_class(body: &[char]) -> Option<Vec<char>> {
    let mut set = Vec::new();
    let mut i = 0;
    while i < body.len() {
        if body[i] == '\\' {
            set.extend(escape_class(*body.get(i + 1)?)?);
            i += 2;
        } else if i + 2 < body.len() && body[i + 1] == '-' {
            set.extend(body[i]..=body[i + 2]);
            i += 3;
        } else {
            set.push(body[i]);
            i += 1;
        }
    }
    (!set.is_empty()).then_some(set)
}

/// Expand a generator expression such as `[a-z]{4}\d{2}-literal`
///
/// Returns `None` for expressions it does not understand.
fn generate(expression: &str) -> Option<String> {
    let chars: Vec<char> = expression.chars().collect();
    let mut entropy = Entropy::default();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let (class, next) = match chars[i] {
            '[' => {
                let end = i + chars[i..].iter().position(|&c| c == ']')?;
                (char_class(&chars[i + 1..end])?, end + 1)
            }
            '\\' => (escape_class(*chars.get(i + 1)?)?, i + 2),
            c => (vec![c], i + 1),
        };

        let (count, next) = if chars.get(next) == Some(&'{') {
            let end = next + chars[next..].iter().position(|&c| c == '}')?;
            let count: usize = chars[next + 1..end].iter().collect::<String>().parse().ok()?;
            (count, end + 1)
        } else {
            (1, next)
        };

        for _ in 0..count {
            out.push(class[entropy.pick(class.len())]);
        }
        i = next;
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEMPLATE: &str = r#"
apiVersion: template.openshift.io/v1
kind: Template
metadata:
  name: eap-app
labels:
  template: eap-app
parameters:
  - name: APPLICATION_NAME
    value: eap-app
  - name: REPLICAS
    value: "1"
  - name: IMAGE
    required: true
  - name: ADMIN_PASSWORD
    generate: expression
    from: "[a-zA-Z0-9]{12}"
  - name: OPTIONAL_FLAG
objects:
  - apiVersion: v1
    kind: Service
    metadata:
      name: ${APPLICATION_NAME}
    spec:
      ports:
        - port: 8080
  - apiVersion: apps.openshift.io/v1
    kind: DeploymentConfig
    metadata:
      name: ${APPLICATION_NAME}
    spec:
      replicas: ${{REPLICAS}}
      template:
        spec:
          serviceAccountName: ${APPLICATION_NAME}-sa
          containers:
            - name: ${APPLICATION_NAME}
              image: ${IMAGE}
              env:
                - name: ADMIN_PASSWORD
                  value: ${ADMIN_PASSWORD}
                - name: FLAG
                  value: "x${OPTIONAL_FLAG}y"
                - name: UNKNOWN
                  value: ${NOT_DECLARED}
"#;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn rendered(pairs: &[(&str, &str)], labels: &[(&str, &str)]) -> RenderedTemplate {
        parse("inline", TEMPLATE)
            .unwrap()
            .render(&params(pairs), &params(labels))
            .unwrap()
    }

    #[test]
    fn test_extra_labels_reach_every_object() {
        let out = rendered(&[("IMAGE", "eap:7")], &[("app", "x")]);

        assert_eq!(out.objects.len(), 2);
        for obj in &out.objects {
            let labels = obj.metadata.labels.as_ref().unwrap();
            assert_eq!(labels.get("app"), Some(&"x".to_string()));
            assert_eq!(labels.get("template"), Some(&"eap-app".to_string()));
        }
        assert_eq!(out.name.as_deref(), Some("eap-app"));
    }

    #[test]
    fn test_string_and_whole_value_substitution() {
        let out = rendered(&[("IMAGE", "eap:7"), ("REPLICAS", "3")], &[]);
        let dc = &out.objects[1];

        assert_eq!(dc.metadata.name.as_deref(), Some("eap-app"));
        assert_eq!(dc.data["spec"]["replicas"], json!(3));

        let container = &dc.data["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], json!("eap:7"));
        assert_eq!(container["env"][1]["value"], json!("xy"));
        assert_eq!(container["env"][2]["value"], json!("${NOT_DECLARED}"));
    }

    #[test]
    fn test_generated_parameter() {
        let out = rendered(&[("IMAGE", "eap:7")], &[]);
        let password = out.objects[1].data["spec"]["template"]["spec"]["containers"][0]["env"][0]
            ["value"]
            .as_str()
            .unwrap()
            .to_string();

        assert_eq!(password.len(), 12);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = parse("inline", TEMPLATE)
            .unwrap()
            .render(&BTreeMap::new(), &Labels::new())
            .unwrap_err();
        assert!(matches!(err, TemplateError::MissingParameter(ref name) if name == "IMAGE"));
    }

    #[test]
    fn test_undeclared_parameter_is_ignored() {
        let out = rendered(&[("IMAGE", "eap:7"), ("BOGUS", "1")], &[]);
        assert_eq!(out.objects.len(), 2);
    }

    #[test]
    fn test_service_account_lookup() {
        let out = rendered(&[("IMAGE", "eap:7")], &[]);
        assert_eq!(service_account_of(&out.objects[1]), Some("eap-app-sa"));
        assert_eq!(service_account_of(&out.objects[0]), None);
    }

    #[test]
    fn test_legacy_service_account_field() {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "DeploymentConfig",
            "metadata": { "name": "dc" },
            "spec": { "template": { "spec": { "serviceAccount": "legacy" } } }
        }))
        .unwrap();
        assert_eq!(service_account_of(&obj), Some("legacy"));
    }

    #[test]
    fn test_json_template() {
        let text = r#"{
            "kind": "Template",
            "metadata": { "name": "tiny" },
            "objects": [{ "apiVersion": "v1", "kind": "Secret", "metadata": { "name": "s" } }]
        }"#;
        let out = parse("inline", text)
            .unwrap()
            .render(&BTreeMap::new(), &params(&[("app", "x")]))
            .unwrap();

        assert_eq!(out.objects.len(), 1);
        assert_eq!(
            out.objects[0].metadata.labels.as_ref().unwrap().get("app"),
            Some(&"x".to_string())
        );
    }

    #[test]
    fn test_wrong_kind_is_a_parse_error() {
        let err = parse("inline", "kind: Pod\nmetadata:\n  name: p\n").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { .. }));
    }

    #[test]
    fn test_object_without_kind_is_invalid() {
        let text = "kind: Template\nobjects:\n  - metadata:\n      name: nameless\n";
        let err = parse("inline", text)
            .unwrap()
            .render(&BTreeMap::new(), &Labels::new())
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidObject { index: 0, .. }));
    }

    #[test]
    fn test_expand_edge_cases() {
        let values = params(&[("A", "1")]);
        assert_eq!(expand("${A}-${A}", &values), "1-1");
        assert_eq!(expand("${", &values), "${");
        assert_eq!(expand("${not a name}", &values), "${not a name}");
        assert_eq!(expand("pre${{A}}post", &values), "pre1post");
        assert_eq!(expand("$A", &values), "$A");
    }

    #[test]
    fn test_generate_expressions() {
        let value = generate("[A-F]{4}\\d{3}-x").unwrap();
        assert_eq!(value.len(), 9);
        assert!(value[..4].chars().all(|c| ('A'..='F').contains(&c)));
        assert!(value[4..7].chars().all(|c| c.is_ascii_digit()));
        assert!(value.ends_with("-x"));

        assert!(generate("[unterminated").is_none());
        assert!(generate("\\q").is_none());
    }

    #[tokio::test]
    async fn test_fetch_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.yaml");
        tokio::fs::write(&path, TEMPLATE).await.unwrap();

        let bare = fetch(path.to_str().unwrap()).await.unwrap();
        let url = fetch(&format!("file://{}", path.display())).await.unwrap();
        assert_eq!(bare, url);
        assert!(bare.contains("eap-app"));
    }

    #[tokio::test]
    async fn test_fetch_missing_file() {
        let err = fetch("file:///definitely/not/here.yaml").await.unwrap_err();
        assert!(matches!(err, TemplateError::Fetch { .. }));
    }
}
