//! Go-template-style `{{ ... }}` placeholder handling shared by the
//! validator (which only checks which placeholders are used) and the
//! inline provider (which substitutes them).
//!
//! Only two placeholder shapes are allowed: `device.metadata.name` and
//! `device.metadata.labels[<key>]` (or the dotted `.metadata.labels.<key>`
//! spelling). Anything else is rejected rather than silently ignored.

const NAME_PLACEHOLDER: &str = "device.metadata.name";
const BRACKET_PREFIX: &str = "device.metadata.labels[";
const DOTTED_PREFIX: &str = ".metadata.labels.";

/// A placeholder found in template content, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    DeviceName,
    DeviceLabel(String),
    Unsupported(String),
}

fn classify(expr: &str) -> Placeholder {
    let expr = expr.trim();
    if expr == NAME_PLACEHOLDER {
        return Placeholder::DeviceName;
    }
    if let Some(rest) = expr.strip_prefix(BRACKET_PREFIX) {
        if let Some(key) = rest.strip_suffix(']') {
            let key = key.trim_matches(['"', '\'']);
            if !key.is_empty() {
                return Placeholder::DeviceLabel(key.to_string());
            }
        }
    }
    if let Some(key) = expr.strip_prefix(DOTTED_PREFIX) {
        if !key.is_empty() {
            return Placeholder::DeviceLabel(key.to_string());
        }
    }
    Placeholder::Unsupported(expr.to_string())
}

/// Extract every `{{ ... }}` placeholder in `content`, classified.
pub fn placeholders(content: &str) -> Vec<Placeholder> {
    let mut found = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            break;
        };
        found.push(classify(&after_open[..end]));
        rest = &after_open[end + 2..];
    }
    found
}

/// Substitute every recognized placeholder in `content`. Callers must have
/// already validated (via [`placeholders`]) that no `Unsupported` variant
/// is present.
pub fn render(content: &str, device_name: &str, labels: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut output = String::new();
    let mut rest = content;
    loop {
        let Some(start) = rest.find("{{") else {
            output.push_str(rest);
            break;
        };
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            output.push_str(&rest[start..]);
            break;
        };
        let replacement = match classify(&after_open[..end]) {
            Placeholder::DeviceName => device_name.to_string(),
            Placeholder::DeviceLabel(key) => labels
                .get(&key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            Placeholder::Unsupported(raw) => format!("{{{{ {raw} }}}}"),
        };
        output.push_str(&replacement);
        rest = &after_open[end + 2..];
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_device_name_placeholder() {
        assert_eq!(placeholders("{{ device.metadata.name }}"), vec![Placeholder::DeviceName]);
    }

    #[test]
    fn classifies_bracket_label_placeholder() {
        assert_eq!(
            placeholders("{{ device.metadata.labels[size] }}"),
            vec![Placeholder::DeviceLabel("size".to_string())]
        );
    }

    #[test]
    fn classifies_dotted_label_placeholder() {
        assert_eq!(
            placeholders("{{ .metadata.labels.size }}"),
            vec![Placeholder::DeviceLabel("size".to_string())]
        );
    }

    #[test]
    fn rejects_unsupported_placeholder() {
        assert_eq!(
            placeholders("{{ device.spec.os }}"),
            vec![Placeholder::Unsupported("device.spec.os".to_string())]
        );
    }

    #[test]
    fn renders_label_placeholder() {
        let mut labels = serde_json::Map::new();
        labels.insert("size".to_string(), json!("big"));
        let out = render("My version is {{ .metadata.labels.size }}", "dev-1", &labels);
        assert_eq!(out, "My version is big");
    }

    #[test]
    fn renders_device_name_placeholder() {
        let labels = serde_json::Map::new();
        let out = render("host={{ device.metadata.name }}", "dev-1", &labels);
        assert_eq!(out, "host=dev-1");
    }
}
