//! Hadoop configuration file helpers
//!
//! Two formats are handled:
//! - Hadoop XML documents (`<configuration><property>...</property></configuration>`),
//!   edited line by line so comments and layout survive.
//! - Whitespace separated props files (`name<TAB>value`, `#` comments).
//!
//! All functions work on file contents; callers fetch and push the files.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

fn property_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<property>\s*<name>\s*([^<]+?)\s*</name>\s*<value>([^<]*)</value>")
            .expect("property regex is valid")
    })
}

fn value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<value>[^<]*</value>").expect("value regex is valid"))
}

/// An empty configuration document.
pub fn empty_configuration() -> String {
    "<?xml version=\"1.0\"?>\n<configuration>\n</configuration>\n".to_string()
}

/// Render a full configuration document from a parameter map.
pub fn render_configuration(params: &BTreeMap<String, String>) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<configuration>\n");
    for (name, value) in params {
        out.push_str(&property_line(name, value));
    }
    out.push_str("</configuration>\n");
    out
}

fn property_line(name: &str, value: &str) -> String {
    format!(
        "  <property><name>{}</name><value>{}</value></property>\n",
        name, value
    )
}

/// First value of `name` in the document.
pub fn read_param_in_xml(content: &str, name: &str) -> Option<String> {
    property_re()
        .captures_iter(content)
        .find(|c| &c[1] == name)
        .map(|c| c[2].to_string())
}

/// Values of the requested parameters; the last definition wins.
pub fn read_in_xml(content: &str, names: &[String]) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    if names.is_empty() {
        return params;
    }
    for caps in property_re().captures_iter(content) {
        if names.iter().any(|n| n == &caps[1]) {
            params.insert(caps[1].to_string(), caps[2].to_string());
        }
    }
    params
}

/// Assign `value` to `name`, returning the edited document.
///
/// Returns `None` when nothing was assigned: the parameter exists and
/// `replace_if_present` is false, or it is absent and `create_if_absent` is
/// false.
pub fn replace_in_xml(
    content: &str,
    name: &str,
    value: &str,
    create_if_absent: bool,
    replace_if_present: bool,
) -> Option<String> {
    let present = read_param_in_xml(content, name).is_some();
    let replacement = format!("<value>{}</value>", value);

    if present {
        if !replace_if_present {
            return None;
        }
        let name_tag = format!("<name>{}</name>", name);
        let mut out = String::with_capacity(content.len() + value.len());
        let mut pending = false;
        let mut done = false;
        for line in content.split_inclusive('\n') {
            if !done && (pending || line.contains(&name_tag)) {
                if value_re().is_match(line) {
                    out.push_str(&value_re().replace(line, regex::NoExpand(&replacement)));
                    done = true;
                    pending = false;
                    continue;
                }
                pending = true;
            }
            out.push_str(line);
        }
        Some(out)
    } else {
        if !create_if_absent {
            return None;
        }
        let mut out = String::with_capacity(content.len() + 64);
        let mut inserted = false;
        for line in content.split_inclusive('\n') {
            if !inserted && line.contains("</configuration>") {
                out.push_str(&property_line(name, value));
                inserted = true;
            }
            out.push_str(line);
        }
        if !inserted {
            return None;
        }
        Some(out)
    }
}

fn parse_props_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some((name, value)) => Some((name, value.trim())),
        None => Some((line, "")),
    }
}

/// Parameters of a props file, optionally restricted to `names`.
pub fn read_in_props(content: &str, names: Option<&[String]>) -> BTreeMap<String, String> {
    content
        .lines()
        .filter_map(parse_props_line)
        .filter(|(name, _)| names.map_or(true, |ns| ns.iter().any(|n| n == name)))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Assign `value` to `name` in a props file, returning the edited content.
pub fn write_in_props(
    content: &str,
    name: &str,
    value: &str,
    create_if_absent: bool,
    override_existing: bool,
) -> Option<String> {
    let present = content
        .lines()
        .filter_map(parse_props_line)
        .any(|(n, _)| n == name);

    if present {
        if !override_existing {
            return None;
        }
        let mut out = String::with_capacity(content.len() + value.len());
        let mut done = false;
        for line in content.split_inclusive('\n') {
            if !done && parse_props_line(line).is_some_and(|(n, _)| n == name) {
                out.push_str(&format!("{}\t{}\n", name, value));
                done = true;
            } else {
                out.push_str(line);
            }
        }
        Some(out)
    } else if create_if_absent {
        let mut out = content.to_string();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("{}\t{}\n", name, value));
        Some(out)
    } else {
        None
    }
}
